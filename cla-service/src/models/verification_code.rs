//! Verification code model - short-lived, single-use codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a verification code proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    PasswordRetrieval,
    EmailDomain,
    EmailVerification,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::PasswordRetrieval => "password_retrieval",
            CodePurpose::EmailDomain => "email_domain",
            CodePurpose::EmailVerification => "email_verification",
        }
    }
}

/// Stored verification code. Only the SHA-256 hash of the code is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCode {
    /// `<purpose>:<recipient>`; one live code per key.
    #[serde(rename = "_id")]
    pub id: String,
    pub purpose: CodePurpose,
    pub recipient: String,
    pub code_hash: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub issued_utc: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expiry_utc: DateTime<Utc>,
    #[serde(default)]
    pub consumed: bool,
    /// Wrong guesses so far; the code is consumed once the limit is reached.
    #[serde(default)]
    pub failed_attempts: u32,
}

impl VerificationCode {
    pub fn key(purpose: CodePurpose, recipient: &str) -> String {
        format!("{}:{}", purpose.as_str(), recipient)
    }

    pub fn new(
        purpose: CodePurpose,
        recipient: String,
        code_hash: String,
        issued_utc: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::key(purpose, &recipient),
            purpose,
            recipient,
            code_hash,
            issued_utc,
            expiry_utc,
            consumed: false,
            failed_attempts: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_utc
    }

    /// Blocks a new issue for the same key.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && !self.is_expired(now)
    }
}
