//! Manager lifecycle: corporation administrators and employee managers.

use crate::config::SigningConfig;
use crate::models::{
    CheckResult, CodePurpose, CorpSigning, Manager, ManagerSummary, OrgKey, Role, SigningRecord,
};
use crate::services::clock::Clock;
use crate::services::email::{
    AddingCorpManager, CodeNotice, EmailMessage, EmailProvider, EmailTemplate, RemovingCorpManager,
};
use crate::services::error::ServiceError;
use crate::services::policy::{IdentityPolicy, corporation_id};
use crate::services::store::{AppendGuard, ManagerFilter, ManagerUpdate, SigningStore, WriteOutcome};
use crate::services::verification::{VerificationCodeIssuer, link_recipient};
use crate::utils::{
    Password, PasswordHashString, generate_one_time_password, hash_password, verify_password,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Candidate employee manager.
#[derive(Debug, Clone)]
pub struct NewManager {
    pub name: String,
    pub email: String,
}

#[derive(Clone)]
pub struct ManagerService {
    store: Arc<dyn SigningStore>,
    codes: VerificationCodeIssuer,
    email: Arc<dyn EmailProvider>,
    clock: Arc<dyn Clock>,
    policy: IdentityPolicy,
    max_employee_managers: usize,
    platform_url: String,
}

impl ManagerService {
    pub fn new(
        store: Arc<dyn SigningStore>,
        codes: VerificationCodeIssuer,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        config: &SigningConfig,
        platform_url: String,
    ) -> Self {
        Self {
            store,
            codes,
            email,
            clock,
            policy: IdentityPolicy::new(config),
            max_employee_managers: config.max_employee_managers(),
            platform_url,
        }
    }

    pub fn policy(&self) -> &IdentityPolicy {
        &self.policy
    }

    /// Creates the administrator of a corporation that has signed on this link,
    /// for the admin email recorded at signing time.
    /// A random one-time password is emailed to the administrator.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn create_admin(&self, key: &OrgKey, email: &str) -> Result<ManagerSummary, ServiceError> {
        let email = email.trim().to_lowercase();
        let corp_id = corporation_id(&email)
            .ok_or_else(|| ServiceError::ValidationError(format!("Invalid email: {}", email)))?;

        let record = self
            .store
            .find_record(key)
            .await?
            .ok_or(ServiceError::CorpSigningNotFound)?;
        let corp = record
            .corporation(&corp_id)
            .ok_or(ServiceError::CorpSigningNotFound)?;

        if !corp.admin_email.trim().eq_ignore_ascii_case(&email) {
            return Err(ServiceError::ValidationError(format!(
                "{} is not the administrator email the corporation signed with",
                email
            )));
        }

        if record.admin_of(&corp_id).is_some() {
            return Err(ServiceError::CorpAdminExists);
        }

        let (manager, password) = self.new_manager(&corp.admin_name, &email, Role::Admin, &corp_id)?;
        let guard = AppendGuard {
            corporation_id: corp_id.clone(),
            role: Role::Admin,
            max_existing: 0,
        };

        match self.store.append_managers(key, std::slice::from_ref(&manager), &guard).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Rejected) => return Err(ServiceError::CorpAdminExists),
            Err(ServiceError::NoDbRecord) => return Err(ServiceError::CorpSigningNotFound),
            Err(e) => return Err(e),
        }

        tracing::info!(corporation_id = %corp_id, "Corporation admin created");
        metrics::counter!("corp_managers_created_total", "role" => "admin").increment(1);

        let msg = AddingCorpManager {
            admin: true,
            id: &manager.id,
            user: &manager.name,
            email: &manager.email,
            password: password.as_str(),
            org: &key.org_id,
            platform_url: &self.platform_url,
        }
        .message();
        self.notify(&msg).await;

        Ok(manager.summary())
    }

    /// All-or-nothing batch add of employee managers by the corporation admin.
    #[tracing::instrument(skip(self, candidates), fields(link = %key, count = candidates.len()))]
    pub async fn add_employee_managers(
        &self,
        key: &OrgKey,
        requester: &str,
        candidates: &[NewManager],
    ) -> Result<Vec<ManagerSummary>, ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        let corp = self.requester_corporation(&record, requester)?;

        let candidates = dedupe(candidates);
        if candidates.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one manager is required".to_string(),
            ));
        }

        for c in &candidates {
            self.check_same_corporation(&record, corp, &c.email)?;

            if record
                .manager_by_email(&c.email)
                .is_some_and(|m| m.role == Role::Admin)
                || corp.admin_email.eq_ignore_ascii_case(&c.email)
            {
                return Err(ServiceError::AdminAsManager);
            }

            if record.manager_by_email(&c.email).is_some() {
                return Err(ServiceError::CorpManagerExists);
            }
        }

        let existing = record.count_managers(Role::Manager, &corp.corporation_id);
        if existing + candidates.len() > self.max_employee_managers {
            return Err(ServiceError::ManyEmployeeManagers);
        }

        let mut created = Vec::with_capacity(candidates.len());
        for c in &candidates {
            created.push(self.new_manager(&c.name, &c.email, Role::Manager, &corp.corporation_id)?);
        }
        let managers: Vec<Manager> = created.iter().map(|(m, _)| m.clone()).collect();
        let guard = AppendGuard {
            corporation_id: corp.corporation_id.clone(),
            role: Role::Manager,
            max_existing: self.max_employee_managers - candidates.len(),
        };

        match self.store.append_managers(key, &managers, &guard).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Rejected) => {
                return Err(self.explain_rejected_append(key, &managers, &guard).await);
            }
            Err(ServiceError::NoDbRecord) => return Err(ServiceError::NoLink),
            Err(e) => return Err(e),
        }

        tracing::info!(
            corporation_id = %corp.corporation_id,
            added = managers.len(),
            "Employee managers added"
        );
        metrics::counter!("corp_managers_created_total", "role" => "manager")
            .increment(managers.len() as u64);

        for (manager, password) in &created {
            let msg = AddingCorpManager {
                admin: false,
                id: &manager.id,
                user: &manager.name,
                email: &manager.email,
                password: password.as_str(),
                org: &key.org_id,
                platform_url: &self.platform_url,
            }
            .message();
            self.notify(&msg).await;
        }

        Ok(managers.iter().map(Manager::summary).collect())
    }

    /// Removes employee managers of the requester's corporation. Unknown emails are
    /// a no-op; the removed managers are returned and notified.
    #[tracing::instrument(skip(self, emails), fields(link = %key, count = emails.len()))]
    pub async fn delete_employee_managers(
        &self,
        key: &OrgKey,
        requester: &str,
        emails: &[String],
    ) -> Result<Vec<ManagerSummary>, ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        let corp = self.requester_corporation(&record, requester)?;

        let mut seen = HashSet::new();
        let emails: Vec<String> = emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| seen.insert(e.clone()))
            .collect();

        for email in &emails {
            let domain_ok = self
                .policy
                .validate_new_manager_email(email, &corp.email_domains)
                .is_ok();
            if !domain_ok {
                return Err(ServiceError::NotSameCorp);
            }
        }

        let filter = ManagerFilter {
            emails,
            role: Some(Role::Manager),
            corporation_id: Some(corp.corporation_id.clone()),
        };
        let removed: Vec<ManagerSummary> = record
            .managers
            .iter()
            .filter(|m| filter.matches(m))
            .map(Manager::summary)
            .collect();

        match self.store.remove_managers(key, &filter).await {
            Ok(()) => {}
            Err(ServiceError::NoDbRecord) => return Err(ServiceError::NoLink),
            Err(e) => return Err(e),
        }

        tracing::info!(
            corporation_id = %corp.corporation_id,
            removed = removed.len(),
            "Employee managers deleted"
        );

        if !removed.is_empty() {
            let msg = RemovingCorpManager {
                to: removed.iter().map(|m| m.email.clone()).collect(),
                org: &key.org_id,
                platform_url: &self.platform_url,
            }
            .message();
            self.notify(&msg).await;
        }

        Ok(removed)
    }

    /// Password login by account id or email. Login state is written back on
    /// every checked attempt, successful or not.
    #[tracing::instrument(skip(self, password), fields(link = %key))]
    pub async fn authenticate(
        &self,
        key: &OrgKey,
        user: &str,
        password: &Password,
    ) -> Result<CheckResult, ServiceError> {
        let record = self
            .store
            .find_record(key)
            .await?
            .ok_or(ServiceError::NoLinkOrNoManager)?;
        let manager = record
            .manager_by_account(user.trim())
            .ok_or(ServiceError::UserNotExists)?;

        let now = self.clock.now();
        if let Err(e) = self.policy.check_login_allowed(&manager.login, now) {
            tracing::warn!(user_id = %manager.id, "Login attempt while frozen");
            metrics::counter!("manager_logins_total", "outcome" => "frozen").increment(1);
            return Err(e);
        }

        let hash = PasswordHashString::new(manager.password_hash.clone());
        let success = verify_password(password, &hash).is_ok();
        let login = self.policy.record_login_result(&manager.login, success, now);

        if login != manager.login {
            match self
                .store
                .update_manager(key, &ManagerFilter::email(&manager.email), &ManagerUpdate::login(login.clone()))
                .await
            {
                Ok(outcome) if outcome.matched_count == 0 => {
                    return Err(ServiceError::NoLinkOrNoManager);
                }
                Ok(_) => {}
                Err(ServiceError::NoDbRecord) => return Err(ServiceError::NoLinkOrNoManager),
                Err(e) => return Err(e),
            }
        }

        if !success {
            if login.frozen_until_utc.is_some() {
                tracing::warn!(
                    user_id = %manager.id,
                    failed_count = login.failed_count,
                    "Manager login frozen"
                );
            } else {
                tracing::info!(
                    user_id = %manager.id,
                    failed_count = login.failed_count,
                    "Manager login failed"
                );
            }
            metrics::counter!("manager_logins_total", "outcome" => "failed").increment(1);
            return Err(ServiceError::NoLinkOrNoManager);
        }

        metrics::counter!("manager_logins_total", "outcome" => "success").increment(1);
        tracing::info!(user_id = %manager.id, role = %manager.role, "Manager authenticated");

        Ok(CheckResult {
            user_id: manager.id.clone(),
            name: manager.name.clone(),
            email: manager.email.clone(),
            role: manager.role,
            corporation_id: manager.corporation_id.clone(),
            initial_password_changed: manager.initial_password_changed,
        })
    }

    #[tracing::instrument(skip(self, old_password, new_password), fields(link = %key))]
    pub async fn reset_password(
        &self,
        key: &OrgKey,
        email: &str,
        old_password: &Password,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        let record = self
            .store
            .find_record(key)
            .await?
            .ok_or(ServiceError::NoLinkOrNoManager)?;
        let manager = record
            .manager_by_email(email)
            .ok_or(ServiceError::UserNotExists)?;

        self.policy.validate_password_change(
            old_password,
            new_password,
            &PasswordHashString::new(manager.password_hash.clone()),
        )?;

        let update = ManagerUpdate {
            password_hash: Some(hash_new_password(new_password)?),
            initial_password_changed: Some(true),
            login: None,
        };
        self.update_or_no_manager(key, &manager.email, &update).await?;

        tracing::info!(user_id = %manager.id, "Manager password reset");
        Ok(())
    }

    /// Managers with `role`; employee managers are limited to `requester_corp_id`.
    pub async fn list_managers(
        &self,
        key: &OrgKey,
        role: Role,
        requester_corp_id: &str,
    ) -> Result<Vec<ManagerSummary>, ServiceError> {
        let Some(record) = self.store.find_record(key).await? else {
            return Ok(Vec::new());
        };

        Ok(record
            .managers
            .iter()
            .filter(|m| m.role == role)
            .filter(|m| role != Role::Manager || m.corporation_id == requester_corp_id)
            .map(Manager::summary)
            .collect())
    }

    /// Emails a password-retrieval code to a manager of the link.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn request_password_retrieval(&self, key: &OrgKey, email: &str) -> Result<(), ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        let manager = record
            .manager_by_email(email.trim())
            .ok_or(ServiceError::UserNotExists)?;

        let code = self
            .codes
            .issue(CodePurpose::PasswordRetrieval, &link_recipient(key, &manager.email))
            .await?;

        let msg = CodeNotice {
            template: EmailTemplate::PasswordRetrieval,
            email: &manager.email,
            org: &key.org_id,
            corporation: &manager.corporation_id,
            code: &code,
            ttl_minutes: self.codes.ttl().num_minutes(),
        }
        .message();
        self.notify(&msg).await;

        Ok(())
    }

    /// Sets a new password after the retrieval code is proven; also clears any freeze.
    #[tracing::instrument(skip(self, code, new_password), fields(link = %key))]
    pub async fn retrieve_password(
        &self,
        key: &OrgKey,
        email: &str,
        code: &str,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        let manager = record
            .manager_by_email(email.trim())
            .ok_or(ServiceError::UserNotExists)?;

        self.policy.validate_new_password(new_password)?;
        self.codes
            .consume(
                CodePurpose::PasswordRetrieval,
                &link_recipient(key, &manager.email),
                code,
            )
            .await?;

        let update = ManagerUpdate {
            password_hash: Some(hash_new_password(new_password)?),
            initial_password_changed: Some(true),
            login: Some(Default::default()),
        };
        self.update_or_no_manager(key, &manager.email, &update).await?;

        tracing::info!(user_id = %manager.id, "Manager password retrieved");
        Ok(())
    }

    fn new_manager(
        &self,
        name: &str,
        email: &str,
        role: Role,
        corp_id: &str,
    ) -> Result<(Manager, Password), ServiceError> {
        let rules = self.policy.password_policy();
        let password = generate_one_time_password(rules.min_length.max(12).min(rules.max_length));
        let manager = Manager::new(
            name.trim().to_string(),
            email.trim().to_lowercase(),
            role,
            corp_id.to_string(),
            hash_new_password(&password)?,
            self.clock.now(),
        );
        Ok((manager, password))
    }

    /// The requester must be the admin of a corporation that signed on this link.
    fn requester_corporation<'a>(
        &self,
        record: &'a SigningRecord,
        requester: &str,
    ) -> Result<&'a CorpSigning, ServiceError> {
        let admin = record
            .manager_by_email(requester)
            .filter(|m| m.role == Role::Admin)
            .ok_or(ServiceError::NotCorpAdmin)?;

        record
            .corporation(&admin.corporation_id)
            .ok_or(ServiceError::CorpSigningNotFound)
    }

    fn check_same_corporation(
        &self,
        record: &SigningRecord,
        corp: &CorpSigning,
        email: &str,
    ) -> Result<(), ServiceError> {
        if self
            .policy
            .validate_new_manager_email(email, &corp.email_domains)
            .is_ok()
        {
            return Ok(());
        }

        let belongs_elsewhere = record.corporations.iter().any(|other| {
            other.corporation_id != corp.corporation_id
                && self
                    .policy
                    .validate_new_manager_email(email, &other.email_domains)
                    .is_ok()
        });

        if belongs_elsewhere {
            Err(ServiceError::NotSameCorp)
        } else {
            Err(ServiceError::UnmatchedEmailDomain)
        }
    }

    /// Re-reads the record to report why a guarded append was rejected.
    async fn explain_rejected_append(
        &self,
        key: &OrgKey,
        managers: &[Manager],
        guard: &AppendGuard,
    ) -> ServiceError {
        let record = match self.store.find_record(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return ServiceError::NoLink,
            Err(e) => return e,
        };

        if managers.iter().any(|m| record.manager_by_email(&m.email).is_some()) {
            ServiceError::CorpManagerExists
        } else if record.count_managers(guard.role, &guard.corporation_id) > guard.max_existing {
            ServiceError::ManyEmployeeManagers
        } else {
            ServiceError::CorpManagerExists
        }
    }

    async fn update_or_no_manager(
        &self,
        key: &OrgKey,
        email: &str,
        update: &ManagerUpdate,
    ) -> Result<(), ServiceError> {
        match self
            .store
            .update_manager(key, &ManagerFilter::email(email), update)
            .await
        {
            Ok(outcome) if outcome.matched_count == 0 => Err(ServiceError::NoLinkOrNoManager),
            Ok(_) => Ok(()),
            Err(ServiceError::NoDbRecord) => Err(ServiceError::NoLinkOrNoManager),
            Err(e) => Err(e),
        }
    }

    /// Delivery failures are logged; the operation already committed.
    async fn notify(&self, msg: &EmailMessage) {
        if let Err(e) = self.email.send(msg).await {
            tracing::warn!(
                error = %e,
                template = msg.template.as_str(),
                "Failed to send notification"
            );
        }
    }
}

fn hash_new_password(password: &Password) -> Result<String, ServiceError> {
    hash_password(password)
        .map(PasswordHashString::into_string)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))
}

fn dedupe(candidates: &[NewManager]) -> Vec<NewManager> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .map(|c| NewManager {
            name: c.name.trim().to_string(),
            email: c.email.trim().to_lowercase(),
        })
        .filter(|c| seen.insert(c.email.clone()))
        .collect()
}
