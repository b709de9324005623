//! Store capabilities for the signing aggregate and verification codes.
//!
//! Every mutation is one atomic single-document operation: the guard is evaluated
//! and the change applied in the same round trip.

use crate::models::{CorpSigning, LoginState, Manager, OrgKey, Role, SigningRecord, VerificationCode};
use crate::services::error::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The document exists but the guard did not hold.
    Rejected,
}

/// `matched_count` is 1 when an element matched the filter, 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Condition checked together with an append: at most `max_existing` managers
/// with `role` in `corporation_id` may already exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendGuard {
    pub corporation_id: String,
    pub role: Role,
    pub max_existing: usize,
}

/// Selects manager elements. Emails are compared lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerFilter {
    pub emails: Vec<String>,
    pub role: Option<Role>,
    pub corporation_id: Option<String>,
}

impl ManagerFilter {
    pub fn email(email: &str) -> Self {
        Self {
            emails: vec![email.to_lowercase()],
            ..Default::default()
        }
    }

    pub fn matches(&self, manager: &Manager) -> bool {
        self.emails.iter().any(|e| manager.email.eq_ignore_ascii_case(e))
            && self.role.map_or(true, |r| r == manager.role)
            && self
                .corporation_id
                .as_deref()
                .map_or(true, |c| c == manager.corporation_id)
    }
}

/// Fields of a manager element to overwrite; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerUpdate {
    pub password_hash: Option<String>,
    pub initial_password_changed: Option<bool>,
    pub login: Option<LoginState>,
}

impl ManagerUpdate {
    pub fn login(state: LoginState) -> Self {
        Self {
            login: Some(state),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none() && self.initial_password_changed.is_none() && self.login.is_none()
    }

    pub fn apply(&self, manager: &mut Manager) -> bool {
        let before = (
            manager.password_hash.clone(),
            manager.initial_password_changed,
            manager.login.clone(),
        );

        if let Some(hash) = &self.password_hash {
            manager.password_hash = hash.clone();
        }
        if let Some(changed) = self.initial_password_changed {
            manager.initial_password_changed = changed;
        }
        if let Some(login) = &self.login {
            manager.login = login.clone();
        }

        before
            != (
                manager.password_hash.clone(),
                manager.initial_password_changed,
                manager.login.clone(),
            )
    }
}

#[async_trait]
pub trait SigningStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    async fn find_record(&self, key: &OrgKey) -> Result<Option<SigningRecord>, ServiceError>;

    /// Create or replace the whole aggregate. Returns the id when a document was inserted.
    async fn upsert_record(
        &self,
        key: &OrgKey,
        record: &SigningRecord,
    ) -> Result<Option<String>, ServiceError>;

    /// Returns false when there was nothing to delete.
    async fn delete_record(&self, key: &OrgKey) -> Result<bool, ServiceError>;

    /// Appends all managers or none. Rejected when any email already exists in the
    /// record or the guard does not hold. `NoDbRecord` when the record is absent.
    async fn append_managers(
        &self,
        key: &OrgKey,
        managers: &[Manager],
        guard: &AppendGuard,
    ) -> Result<WriteOutcome, ServiceError>;

    /// Zero matched elements is success.
    async fn remove_managers(&self, key: &OrgKey, filter: &ManagerFilter) -> Result<(), ServiceError>;

    /// Zero matched elements is reported through [`UpdateOutcome`], not as an error.
    async fn update_manager(
        &self,
        key: &OrgKey,
        filter: &ManagerFilter,
        update: &ManagerUpdate,
    ) -> Result<UpdateOutcome, ServiceError>;

    /// Rejected when the corporation already signed in this record.
    async fn append_corporation(
        &self,
        key: &OrgKey,
        corporation: &CorpSigning,
    ) -> Result<WriteOutcome, ServiceError>;

    async fn add_corporation_domain(
        &self,
        key: &OrgKey,
        corporation_id: &str,
        domain: &str,
    ) -> Result<UpdateOutcome, ServiceError>;

    /// Rejected while managers of the corporation exist.
    async fn remove_corporation(
        &self,
        key: &OrgKey,
        corporation_id: &str,
    ) -> Result<WriteOutcome, ServiceError>;
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Stores `code` unless a live (unconsumed, unexpired at `now`) code exists for its key.
    async fn insert_code(
        &self,
        code: &VerificationCode,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, ServiceError>;

    async fn find_code(&self, id: &str) -> Result<Option<VerificationCode>, ServiceError>;

    /// Marks the code consumed if it is still unconsumed and has `code_hash`.
    /// Returns false when another caller got there first.
    async fn mark_consumed(&self, id: &str, code_hash: &str) -> Result<bool, ServiceError>;

    /// Counts a wrong guess against the unconsumed code with `code_hash` and
    /// consumes it when `max_attempts` is reached. Returns true when the code
    /// can no longer be used.
    async fn record_failed_attempt(
        &self,
        id: &str,
        code_hash: &str,
        max_attempts: u32,
    ) -> Result<bool, ServiceError>;
}
