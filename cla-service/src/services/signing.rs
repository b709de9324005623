//! Link and corporation signing lifecycle.

use crate::config::SigningConfig;
use crate::models::{CodePurpose, CorpSigning, OrgKey, Role, SigningRecord};
use crate::services::clock::Clock;
use crate::services::email::{CodeNotice, EmailProvider, EmailTemplate};
use crate::services::error::ServiceError;
use crate::services::policy::{IdentityPolicy, domain_to_corporation_id, email_domain};
use crate::services::store::{SigningStore, WriteOutcome};
use crate::services::verification::{VerificationCodeIssuer, link_recipient};
use std::sync::Arc;

#[derive(Clone)]
pub struct CorpSigningService {
    store: Arc<dyn SigningStore>,
    codes: VerificationCodeIssuer,
    email: Arc<dyn EmailProvider>,
    clock: Arc<dyn Clock>,
    policy: IdentityPolicy,
}

impl CorpSigningService {
    pub fn new(
        store: Arc<dyn SigningStore>,
        codes: VerificationCodeIssuer,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        config: &SigningConfig,
    ) -> Self {
        Self {
            store,
            codes,
            email,
            clock,
            policy: IdentityPolicy::new(config),
        }
    }

    /// Creates the empty signing record of a link. Returns false if it already exists.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn open_link(&self, key: &OrgKey) -> Result<bool, ServiceError> {
        if self.store.find_record(key).await?.is_some() {
            return Ok(false);
        }

        let record = SigningRecord::new(key, self.clock.now());
        let id = self.store.upsert_record(key, &record).await?;
        tracing::info!(record_id = ?id, "Link opened");
        Ok(true)
    }

    /// Drops the signing record together with every signing and manager.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn close_link(&self, key: &OrgKey) -> Result<(), ServiceError> {
        if !self.store.delete_record(key).await? {
            return Err(ServiceError::NoLink);
        }
        tracing::info!("Link closed");
        Ok(())
    }

    /// Registers a corporation signing; the admin email's domain becomes the
    /// corporation id and its first registered domain.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn sign_as_corporation(
        &self,
        key: &OrgKey,
        corporation_name: &str,
        admin_email: &str,
        admin_name: &str,
    ) -> Result<CorpSigning, ServiceError> {
        let admin_email = admin_email.trim().to_lowercase();
        let domain = email_domain(&admin_email)
            .ok_or_else(|| ServiceError::ValidationError(format!("Invalid email: {}", admin_email)))?;
        self.policy.validate_corp_email_domain(&domain)?;

        let corp = CorpSigning {
            corporation_id: domain_to_corporation_id(&domain),
            corporation_name: corporation_name.trim().to_string(),
            admin_email,
            admin_name: admin_name.trim().to_string(),
            email_domains: vec![domain],
            signed_utc: self.clock.now(),
        };

        match self.store.append_corporation(key, &corp).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Rejected) => return Err(ServiceError::CorpSigningReSigning),
            Err(ServiceError::NoDbRecord) => return Err(ServiceError::NoLink),
            Err(e) => return Err(e),
        }

        tracing::info!(corporation_id = %corp.corporation_id, "Corporation signed");
        metrics::counter!("corp_signings_total").increment(1);
        Ok(corp)
    }

    /// Removes a corporation signing; refused while any of its managers exist.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn remove_corp_signing(&self, key: &OrgKey, corporation_id: &str) -> Result<(), ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        if record.corporation(corporation_id).is_none() {
            return Err(ServiceError::CorpSigningNotFound);
        }

        match self.store.remove_corporation(key, corporation_id).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Rejected) => return Err(ServiceError::CorpSigningCanNotDelete),
            Err(ServiceError::NoDbRecord) => return Err(ServiceError::NoLink),
            Err(e) => return Err(e),
        }

        tracing::info!(corporation_id = %corporation_id, "Corporation signing removed");
        Ok(())
    }

    pub async fn list_corporations(&self, key: &OrgKey) -> Result<Vec<CorpSigning>, ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        Ok(record.corporations)
    }

    /// Sends a code to `email` proving the admin controls a mailbox of the new domain.
    #[tracing::instrument(skip(self), fields(link = %key))]
    pub async fn request_email_domain_code(
        &self,
        key: &OrgKey,
        requester: &str,
        email: &str,
    ) -> Result<(), ServiceError> {
        let corp = self.admin_corporation(key, requester).await?;
        let email = email.trim().to_lowercase();
        let domain = email_domain(&email)
            .ok_or_else(|| ServiceError::ValidationError(format!("Invalid email: {}", email)))?;
        self.policy.validate_corp_email_domain(&domain)?;

        let code = self
            .codes
            .issue(CodePurpose::EmailDomain, &link_recipient(key, &email))
            .await?;

        let msg = CodeNotice {
            template: EmailTemplate::AddingCorpEmailDomain,
            email: &email,
            org: &key.org_id,
            corporation: &corp.corporation_name,
            code: &code,
            ttl_minutes: self.codes.ttl().num_minutes(),
        }
        .message();
        if let Err(e) = self.email.send(&msg).await {
            tracing::warn!(error = %e, "Failed to send email domain code");
        }

        Ok(())
    }

    /// Adds the domain of `email` to the admin's corporation once `code` checks out.
    #[tracing::instrument(skip(self, code), fields(link = %key))]
    pub async fn add_email_domain(
        &self,
        key: &OrgKey,
        requester: &str,
        email: &str,
        code: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let corp = self.admin_corporation(key, requester).await?;
        let email = email.trim().to_lowercase();
        let domain = email_domain(&email)
            .ok_or_else(|| ServiceError::ValidationError(format!("Invalid email: {}", email)))?;
        self.policy.validate_corp_email_domain(&domain)?;

        self.codes
            .consume(CodePurpose::EmailDomain, &link_recipient(key, &email), code)
            .await?;

        match self
            .store
            .add_corporation_domain(key, &corp.corporation_id, &domain)
            .await
        {
            Ok(outcome) if outcome.matched_count == 0 => {
                return Err(ServiceError::CorpSigningNotFound);
            }
            Ok(_) => {}
            Err(ServiceError::NoDbRecord) => return Err(ServiceError::NoLink),
            Err(e) => return Err(e),
        }

        tracing::info!(corporation_id = %corp.corporation_id, domain = %domain, "Email domain added");

        let mut domains = corp.email_domains;
        if !domains.contains(&domain) {
            domains.push(domain);
        }
        Ok(domains)
    }

    async fn admin_corporation(&self, key: &OrgKey, requester: &str) -> Result<CorpSigning, ServiceError> {
        let record = self.store.find_record(key).await?.ok_or(ServiceError::NoLink)?;
        let admin = record
            .manager_by_email(requester)
            .filter(|m| m.role == Role::Admin)
            .ok_or(ServiceError::NotCorpAdmin)?;

        record
            .corporation(&admin.corporation_id)
            .cloned()
            .ok_or(ServiceError::CorpSigningNotFound)
    }
}
