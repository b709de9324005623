//! Verification code issuer.
//!
//! Codes are six random digits, stored as SHA-256 hashes and keyed by
//! `(purpose, recipient)`. A key holds at most one live code, and a code is
//! burned after `max_attempts` wrong guesses.

use crate::models::{CodePurpose, OrgKey, VerificationCode};
use crate::services::clock::Clock;
use crate::services::error::ServiceError;
use crate::services::store::{CodeStore, WriteOutcome};
use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

const CODE_LENGTH: usize = 6;

fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Recipient key for codes that only make sense within one link.
pub fn link_recipient(key: &OrgKey, email: &str) -> String {
    format!("{}/{}", key, email.trim().to_lowercase())
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct VerificationCodeIssuer {
    store: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_attempts: u32,
}

impl VerificationCodeIssuer {
    pub fn new(
        store: Arc<dyn CodeStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the plain code for delivery; only its hash is persisted.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, purpose: CodePurpose, recipient: &str) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let code = generate_code(CODE_LENGTH);
        let record = VerificationCode::new(
            purpose,
            recipient.to_string(),
            hash_code(&code),
            now,
            now + self.ttl,
        );

        match self.store.insert_code(&record, now).await? {
            WriteOutcome::Applied => {
                metrics::counter!("verification_codes_issued_total", "purpose" => purpose.as_str())
                    .increment(1);
                tracing::info!(recipient = %recipient, "Verification code issued");
                Ok(code)
            }
            WriteOutcome::Rejected => {
                tracing::warn!(recipient = %recipient, "Verification code requested while one is live");
                Err(ServiceError::TooManyRequest)
            }
        }
    }

    #[tracing::instrument(skip(self, submitted))]
    pub async fn consume(
        &self,
        purpose: CodePurpose,
        recipient: &str,
        submitted: &str,
    ) -> Result<(), ServiceError> {
        let id = VerificationCode::key(purpose, recipient);
        let stored = self
            .store
            .find_code(&id)
            .await?
            .filter(|c| !c.consumed)
            .ok_or(ServiceError::CodeNotFound)?;

        // Expiry wins over a mismatch so a stale correct code reads as expired.
        if stored.is_expired(self.clock.now()) {
            return Err(ServiceError::CodeExpired);
        }

        let submitted_hash = hash_code(submitted.trim());
        if !bool::from(submitted_hash.as_bytes().ct_eq(stored.code_hash.as_bytes())) {
            let exhausted = self
                .store
                .record_failed_attempt(&id, &stored.code_hash, self.max_attempts)
                .await?;
            metrics::counter!("verification_code_mismatches_total", "purpose" => purpose.as_str())
                .increment(1);
            if exhausted {
                tracing::warn!(recipient = %recipient, "Verification code burned after repeated mismatches");
            }
            return Err(ServiceError::CodeMismatch);
        }

        if !self.store.mark_consumed(&id, &stored.code_hash).await? {
            return Err(ServiceError::CodeNotFound);
        }

        tracing::info!(recipient = %recipient, "Verification code consumed");
        Ok(())
    }
}
