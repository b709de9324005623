use service_core::error::AppError;
use thiserror::Error;

/// External status class of a domain error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Unauthorized,
    Conflict,
    NotFound,
    TooManyRequests,
    Internal,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Store operation timed out after {0}s")]
    StoreTimeout(u64),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No signing record for the link")]
    NoDbRecord,

    #[error("Link does not exist")]
    NoLink,

    #[error("Link does not exist or manager not found")]
    NoLinkOrNoManager,

    #[error("User does not exist")]
    UserNotExists,

    #[error("Login is frozen, try again later")]
    UserFrozen,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Only the corporation administrator can do this")]
    NotCorpAdmin,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("New password is the same as the old one")]
    SamePassword,

    #[error("Corporation administrator already exists")]
    CorpAdminExists,

    #[error("Corporation has not signed")]
    CorpSigningNotFound,

    #[error("Corporation has already signed")]
    CorpSigningReSigning,

    #[error("Corporation signing can not be deleted while managers exist")]
    CorpSigningCanNotDelete,

    #[error("Corporation manager already exists")]
    CorpManagerExists,

    #[error("Too many employee managers")]
    ManyEmployeeManagers,

    #[error("Email does not belong to the same corporation")]
    NotSameCorp,

    #[error("Administrator can not be an employee manager")]
    AdminAsManager,

    #[error("Email domain does not match the corporation")]
    UnmatchedEmailDomain,

    #[error("Email domain can not be used as a corporation domain")]
    InvalidCorpEmailDomain,

    #[error("Verification code not found")]
    CodeNotFound,

    #[error("Verification code expired")]
    CodeExpired,

    #[error("Verification code does not match")]
    CodeMismatch,

    #[error("Too many requests")]
    TooManyRequest,
}

impl ServiceError {
    /// Exhaustive; adding a variant without a class does not compile.
    pub fn status(&self) -> StatusClass {
        match self {
            ServiceError::Database(_)
            | ServiceError::StoreTimeout(_)
            | ServiceError::Internal(_)
            | ServiceError::EmailError(_) => StatusClass::Internal,

            ServiceError::NoLinkOrNoManager
            | ServiceError::UserFrozen
            | ServiceError::InvalidToken
            | ServiceError::NotCorpAdmin => StatusClass::Unauthorized,

            ServiceError::NoDbRecord
            | ServiceError::NoLink
            | ServiceError::UserNotExists
            | ServiceError::CorpSigningNotFound
            | ServiceError::CodeNotFound => StatusClass::NotFound,

            ServiceError::CorpAdminExists
            | ServiceError::CorpSigningReSigning
            | ServiceError::CorpManagerExists => StatusClass::Conflict,

            ServiceError::ValidationError(_)
            | ServiceError::InvalidPassword
            | ServiceError::SamePassword
            | ServiceError::CorpSigningCanNotDelete
            | ServiceError::ManyEmployeeManagers
            | ServiceError::NotSameCorp
            | ServiceError::AdminAsManager
            | ServiceError::UnmatchedEmailDomain
            | ServiceError::InvalidCorpEmailDomain
            | ServiceError::CodeExpired
            | ServiceError::CodeMismatch => StatusClass::BadRequest,

            ServiceError::TooManyRequest => StatusClass::TooManyRequests,
        }
    }

    /// System failures; the mutation may or may not have applied.
    pub fn is_retryable(&self) -> bool {
        self.status() == StatusClass::Internal
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err.status() {
            StatusClass::BadRequest => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            StatusClass::Unauthorized => AppError::Unauthorized(anyhow::anyhow!(err.to_string())),
            StatusClass::Conflict => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            StatusClass::NotFound => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            StatusClass::TooManyRequests => AppError::TooManyRequests(err.to_string(), None),
            StatusClass::Internal => match err {
                ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
                ServiceError::StoreTimeout(_) => {
                    AppError::DatabaseError(anyhow::anyhow!(err.to_string()))
                }
                ServiceError::EmailError(e) => AppError::EmailError(e),
                other => AppError::InternalError(anyhow::anyhow!(other.to_string())),
            },
        }
    }
}
