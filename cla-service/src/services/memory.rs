//! In-memory stores for tests and local runs.
//!
//! One mutex per store stands in for MongoDB's single-document atomicity: each
//! operation evaluates its guard and mutates under the same lock.

use crate::models::{CorpSigning, Manager, OrgKey, SigningRecord, VerificationCode};
use crate::services::error::ServiceError;
use crate::services::store::{
    AppendGuard, CodeStore, ManagerFilter, ManagerUpdate, SigningStore, UpdateOutcome,
    WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn lock<'a, T>(m: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, ServiceError> {
    m.lock()
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("{} mutex poisoned: {}", name, e)))
}

#[derive(Default)]
pub struct MemorySigningStore {
    records: Mutex<HashMap<OrgKey, SigningRecord>>,
}

impl MemorySigningStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<R>(
        &self,
        key: &OrgKey,
        f: impl FnOnce(&mut SigningRecord) -> R,
    ) -> Result<R, ServiceError> {
        let mut records = lock(&self.records, "Signing store")?;
        let record = records.get_mut(key).ok_or(ServiceError::NoDbRecord)?;
        Ok(f(record))
    }
}

#[async_trait]
impl SigningStore for MemorySigningStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        lock(&self.records, "Signing store").map(|_| ())
    }

    async fn find_record(&self, key: &OrgKey) -> Result<Option<SigningRecord>, ServiceError> {
        Ok(lock(&self.records, "Signing store")?.get(key).cloned())
    }

    async fn upsert_record(
        &self,
        key: &OrgKey,
        record: &SigningRecord,
    ) -> Result<Option<String>, ServiceError> {
        let mut records = lock(&self.records, "Signing store")?;
        let inserted = !records.contains_key(key);
        records.insert(key.clone(), record.clone());
        Ok(inserted.then(|| key.to_string()))
    }

    async fn delete_record(&self, key: &OrgKey) -> Result<bool, ServiceError> {
        Ok(lock(&self.records, "Signing store")?.remove(key).is_some())
    }

    async fn append_managers(
        &self,
        key: &OrgKey,
        managers: &[Manager],
        guard: &AppendGuard,
    ) -> Result<WriteOutcome, ServiceError> {
        self.with_record(key, |record| {
            let duplicate = managers
                .iter()
                .any(|m| record.manager_by_email(&m.email).is_some());
            let existing = record.count_managers(guard.role, &guard.corporation_id);

            if duplicate || existing > guard.max_existing {
                return WriteOutcome::Rejected;
            }

            record.managers.extend(managers.iter().cloned());
            WriteOutcome::Applied
        })
    }

    async fn remove_managers(&self, key: &OrgKey, filter: &ManagerFilter) -> Result<(), ServiceError> {
        self.with_record(key, |record| {
            record.managers.retain(|m| !filter.matches(m));
        })
    }

    async fn update_manager(
        &self,
        key: &OrgKey,
        filter: &ManagerFilter,
        update: &ManagerUpdate,
    ) -> Result<UpdateOutcome, ServiceError> {
        self.with_record(key, |record| {
            let (matched, modified) = record
                .managers
                .iter_mut()
                .filter(|m| filter.matches(m))
                .fold((false, false), |(_, modified), m| (true, update.apply(m) || modified));

            UpdateOutcome {
                matched_count: u64::from(matched),
                modified_count: u64::from(modified),
            }
        })
    }

    async fn append_corporation(
        &self,
        key: &OrgKey,
        corporation: &CorpSigning,
    ) -> Result<WriteOutcome, ServiceError> {
        self.with_record(key, |record| {
            if record.corporation(&corporation.corporation_id).is_some() {
                return WriteOutcome::Rejected;
            }
            record.corporations.push(corporation.clone());
            WriteOutcome::Applied
        })
    }

    async fn add_corporation_domain(
        &self,
        key: &OrgKey,
        corporation_id: &str,
        domain: &str,
    ) -> Result<UpdateOutcome, ServiceError> {
        self.with_record(key, |record| {
            let mut outcome = UpdateOutcome::default();
            if let Some(corp) = record
                .corporations
                .iter_mut()
                .find(|c| c.corporation_id == corporation_id)
            {
                outcome.matched_count = 1;
                if !corp.email_domains.iter().any(|d| d == domain) {
                    corp.email_domains.push(domain.to_string());
                    outcome.modified_count = 1;
                }
            }
            outcome
        })
    }

    async fn remove_corporation(
        &self,
        key: &OrgKey,
        corporation_id: &str,
    ) -> Result<WriteOutcome, ServiceError> {
        self.with_record(key, |record| {
            if record.managers.iter().any(|m| m.corporation_id == corporation_id) {
                return WriteOutcome::Rejected;
            }
            record
                .corporations
                .retain(|c| c.corporation_id != corporation_id);
            WriteOutcome::Applied
        })
    }
}

#[derive(Default)]
pub struct MemoryCodeStore {
    codes: Mutex<HashMap<String, VerificationCode>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.codes.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn insert_code(
        &self,
        code: &VerificationCode,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, ServiceError> {
        let mut codes = lock(&self.codes, "Code store")?;
        if codes.get(&code.id).is_some_and(|c| c.is_live(now)) {
            return Ok(WriteOutcome::Rejected);
        }
        codes.insert(code.id.clone(), code.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn find_code(&self, id: &str) -> Result<Option<VerificationCode>, ServiceError> {
        Ok(lock(&self.codes, "Code store")?.get(id).cloned())
    }

    async fn mark_consumed(&self, id: &str, code_hash: &str) -> Result<bool, ServiceError> {
        let mut codes = lock(&self.codes, "Code store")?;
        match codes.get_mut(id) {
            Some(code) if !code.consumed && code.code_hash == code_hash => {
                code.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failed_attempt(
        &self,
        id: &str,
        code_hash: &str,
        max_attempts: u32,
    ) -> Result<bool, ServiceError> {
        let mut codes = lock(&self.codes, "Code store")?;
        match codes.get_mut(id) {
            Some(code) if !code.consumed && code.code_hash == code_hash => {
                code.failed_attempts += 1;
                code.consumed = code.failed_attempts >= max_attempts;
                Ok(code.consumed)
            }
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Duration;

    fn key() -> OrgKey {
        OrgKey::new("github", "acme", "")
    }

    fn manager(email: &str, role: Role) -> Manager {
        Manager::new(
            String::new(),
            email.to_string(),
            role,
            "example_com".to_string(),
            "hash".to_string(),
            Utc::now(),
        )
    }

    fn guard(role: Role, max_existing: usize) -> AppendGuard {
        AppendGuard {
            corporation_id: "example_com".to_string(),
            role,
            max_existing,
        }
    }

    async fn store_with_record() -> MemorySigningStore {
        let store = MemorySigningStore::new();
        store
            .upsert_record(&key(), &SigningRecord::new(&key(), Utc::now()))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_operations_without_record_report_no_db_record() {
        let store = MemorySigningStore::new();
        let err = store
            .append_managers(&key(), &[manager("a@example.com", Role::Admin)], &guard(Role::Admin, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoDbRecord));

        let err = store
            .remove_managers(&key(), &ManagerFilter::email("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoDbRecord));
    }

    #[tokio::test]
    async fn test_upsert_reports_insert_only_once() {
        let store = MemorySigningStore::new();
        let record = SigningRecord::new(&key(), Utc::now());
        assert!(store.upsert_record(&key(), &record).await.unwrap().is_some());
        assert!(store.upsert_record(&key(), &record).await.unwrap().is_none());
        assert!(store.delete_record(&key()).await.unwrap());
        assert!(!store.delete_record(&key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_is_all_or_nothing() {
        let store = store_with_record().await;
        store
            .append_managers(&key(), &[manager("bob@example.com", Role::Manager)], &guard(Role::Manager, 4))
            .await
            .unwrap();

        let outcome = store
            .append_managers(
                &key(),
                &[
                    manager("carol@example.com", Role::Manager),
                    manager("bob@example.com", Role::Manager),
                ],
                &guard(Role::Manager, 3),
            )
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Rejected);

        let record = store.find_record(&key()).await.unwrap().unwrap();
        assert_eq!(record.managers.len(), 1);
    }

    #[tokio::test]
    async fn test_append_respects_guard() {
        let store = store_with_record().await;
        let first = store
            .append_managers(&key(), &[manager("admin@example.com", Role::Admin)], &guard(Role::Admin, 0))
            .await
            .unwrap();
        let second = store
            .append_managers(&key(), &[manager("boss@example.com", Role::Admin)], &guard(Role::Admin, 0))
            .await
            .unwrap();

        assert_eq!(first, WriteOutcome::Applied);
        assert_eq!(second, WriteOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_update_reports_whether_a_manager_matched() {
        let store = store_with_record().await;
        store
            .append_managers(&key(), &[manager("bob@example.com", Role::Manager)], &guard(Role::Manager, 4))
            .await
            .unwrap();
        let update = ManagerUpdate {
            initial_password_changed: Some(true),
            ..Default::default()
        };

        let outcome = store
            .update_manager(&key(), &ManagerFilter::email("ghost@example.com"), &update)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::default());

        let outcome = store
            .update_manager(&key(), &ManagerFilter::email("Bob@Example.com"), &update)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome {
                matched_count: 1,
                modified_count: 1,
            }
        );

        // same values again: matched, nothing modified
        let outcome = store
            .update_manager(&key(), &ManagerFilter::email("bob@example.com"), &update)
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 1);
        assert_eq!(outcome.modified_count, 0);
    }

    #[tokio::test]
    async fn test_remove_missing_element_is_success() {
        let store = store_with_record().await;
        store
            .remove_managers(&key(), &ManagerFilter::email("ghost@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_code_insert_blocks_while_live() {
        let store = MemoryCodeStore::new();
        let now = Utc::now();
        let code = VerificationCode::new(
            crate::models::CodePurpose::PasswordRetrieval,
            "bob@example.com".to_string(),
            "h1".to_string(),
            now,
            now + Duration::seconds(300),
        );

        assert_eq!(store.insert_code(&code, now).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(store.insert_code(&code, now).await.unwrap(), WriteOutcome::Rejected);
        assert_eq!(
            store
                .insert_code(&code, now + Duration::seconds(300))
                .await
                .unwrap(),
            WriteOutcome::Applied
        );

        assert!(store.mark_consumed(&code.id, "h1").await.unwrap());
        assert!(!store.mark_consumed(&code.id, "h1").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempts_consume_the_code_at_the_limit() {
        let store = MemoryCodeStore::new();
        let now = Utc::now();
        let code = VerificationCode::new(
            crate::models::CodePurpose::PasswordRetrieval,
            "bob@example.com".to_string(),
            "h1".to_string(),
            now,
            now + Duration::seconds(300),
        );
        store.insert_code(&code, now).await.unwrap();

        assert!(!store.record_failed_attempt(&code.id, "h1", 3).await.unwrap());
        assert!(!store.record_failed_attempt(&code.id, "h1", 3).await.unwrap());
        assert!(store.record_failed_attempt(&code.id, "h1", 3).await.unwrap());

        let stored = store.find_code(&code.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 3);
        assert!(stored.consumed);
        assert!(!store.mark_consumed(&code.id, "h1").await.unwrap());
    }
}
