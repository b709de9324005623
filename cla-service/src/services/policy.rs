//! Identity policy.
//!
//! Stateless rules for manager emails, corporation domains, password changes and
//! login throttling. Time is always passed in by the caller.

use crate::config::SigningConfig;
use crate::models::LoginState;
use crate::services::error::ServiceError;
use crate::utils::{Password, PasswordHashString, verify_password};
use chrono::{DateTime, Duration, Utc};

/// Password complexity violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordRule {
    TooShort { min_length: usize, actual_length: usize },
    TooLong { max_length: usize, actual_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingNumber,
    MissingSpecial,
}

impl std::fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordRule::TooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PasswordRule::TooLong {
                max_length,
                actual_length,
            } => write!(
                f,
                "Password must be at most {} characters (got {})",
                max_length, actual_length
            ),
            PasswordRule::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PasswordRule::MissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PasswordRule::MissingNumber => write!(f, "Password must contain at least one number"),
            PasswordRule::MissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), PasswordRule> {
        let len = password.chars().count();
        if len < self.min_length {
            return Err(PasswordRule::TooShort {
                min_length: self.min_length,
                actual_length: len,
            });
        }

        if len > self.max_length {
            return Err(PasswordRule::TooLong {
                max_length: self.max_length,
                actual_length: len,
            });
        }

        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(PasswordRule::MissingUppercase);
        }

        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(PasswordRule::MissingLowercase);
        }

        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordRule::MissingNumber);
        }

        if password.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PasswordRule::MissingSpecial);
        }

        Ok(())
    }
}

/// Lower-cased domain of an email address.
pub fn email_domain(email: &str) -> Option<String> {
    let (local, domain) = email.trim().rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(domain.to_lowercase())
}

/// Corporation id of an email: its domain with `.` replaced by `_`.
pub fn corporation_id(email: &str) -> Option<String> {
    email_domain(email).map(|d| domain_to_corporation_id(&d))
}

pub fn domain_to_corporation_id(domain: &str) -> String {
    domain.to_lowercase().replace('.', "_")
}

/// Equal domains match; otherwise at least `min_parts` trailing labels must agree.
pub fn domain_matches(candidate: &str, registered: &str, min_parts: usize) -> bool {
    let candidate = candidate.to_lowercase();
    let registered = registered.to_lowercase();
    if candidate == registered {
        return true;
    }

    let shared = candidate
        .rsplit('.')
        .zip(registered.rsplit('.'))
        .take_while(|(a, b)| a == b)
        .count();

    shared >= min_parts
}

#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    min_same_domain_parts: usize,
    invalid_corp_domains: Vec<String>,
    max_failed_login: u32,
    frozen_period: Duration,
    checking_period: Duration,
    password: PasswordPolicy,
}

impl IdentityPolicy {
    pub fn new(cfg: &SigningConfig) -> Self {
        Self {
            min_same_domain_parts: cfg.min_same_domain_parts(),
            invalid_corp_domains: cfg.invalid_corp_email_domains(),
            max_failed_login: cfg.max_failed_login(),
            frozen_period: cfg.login_frozen_period(),
            checking_period: cfg.login_checking_period(),
            password: PasswordPolicy {
                min_length: cfg.password_min_length as usize,
                max_length: cfg.password_max_length as usize,
            },
        }
    }

    pub fn password_policy(&self) -> &PasswordPolicy {
        &self.password
    }

    pub fn validate_new_manager_email(
        &self,
        email: &str,
        corp_domains: &[String],
    ) -> Result<(), ServiceError> {
        let domain = email_domain(email).ok_or(ServiceError::UnmatchedEmailDomain)?;

        if corp_domains
            .iter()
            .any(|d| domain_matches(&domain, d, self.min_same_domain_parts))
        {
            Ok(())
        } else {
            Err(ServiceError::UnmatchedEmailDomain)
        }
    }

    pub fn validate_corp_email_domain(&self, domain: &str) -> Result<(), ServiceError> {
        let domain = domain.trim().to_lowercase();
        if !domain.contains('.') || self.invalid_corp_domains.iter().any(|d| *d == domain) {
            return Err(ServiceError::InvalidCorpEmailDomain);
        }
        Ok(())
    }

    /// Old password must verify, the candidate must differ and satisfy complexity.
    pub fn validate_password_change(
        &self,
        old: &Password,
        candidate: &Password,
        current_hash: &PasswordHashString,
    ) -> Result<(), ServiceError> {
        if verify_password(old, current_hash).is_err() {
            return Err(ServiceError::InvalidPassword);
        }

        if old.as_str() == candidate.as_str() {
            return Err(ServiceError::SamePassword);
        }

        self.validate_new_password(candidate)
    }

    pub fn validate_new_password(&self, candidate: &Password) -> Result<(), ServiceError> {
        self.password.check(candidate.as_str()).map_err(|rule| {
            tracing::debug!(rule = %rule, "Password rejected by policy");
            ServiceError::InvalidPassword
        })
    }

    pub fn check_login_allowed(
        &self,
        state: &LoginState,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if state.is_frozen_at(now) {
            return Err(ServiceError::UserFrozen);
        }
        Ok(())
    }

    pub fn record_login_result(
        &self,
        state: &LoginState,
        success: bool,
        now: DateTime<Utc>,
    ) -> LoginState {
        if success {
            return LoginState::default();
        }

        let thawed = matches!(state.frozen_until_utc, Some(until) if now >= until);
        let stale = matches!(state.last_failed_utc, Some(last) if now - last > self.checking_period);

        let failed_count = if thawed || stale {
            1
        } else {
            state.failed_count.saturating_add(1)
        };

        let frozen_until_utc = if failed_count >= self.max_failed_login {
            Some(now + self.frozen_period)
        } else {
            None
        };

        LoginState {
            failed_count,
            last_failed_utc: Some(now),
            frozen_until_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash_password;

    fn policy() -> IdentityPolicy {
        IdentityPolicy::new(&SigningConfig {
            invalid_corp_email_domain: "gmail.com,qq.com".to_string(),
            ..SigningConfig::default()
        })
    }

    #[test]
    fn test_corporation_id_from_email() {
        assert_eq!(
            corporation_id("admin@Example.com").as_deref(),
            Some("example_com")
        );
        assert_eq!(corporation_id("no-at-sign"), None);
        assert_eq!(corporation_id("@example.com"), None);
        assert_eq!(corporation_id("bob@localhost"), None);
    }

    #[test]
    fn test_manager_email_domain_matching() {
        let p = policy();
        let domains = vec!["example.com".to_string()];

        assert!(p.validate_new_manager_email("bob@example.com", &domains).is_ok());
        assert!(p
            .validate_new_manager_email("bob@mail.example.com", &domains)
            .is_ok());
        assert!(matches!(
            p.validate_new_manager_email("bob@other.com", &domains),
            Err(ServiceError::UnmatchedEmailDomain)
        ));
        assert!(matches!(
            p.validate_new_manager_email("bob@example.org", &domains),
            Err(ServiceError::UnmatchedEmailDomain)
        ));
    }

    #[test]
    fn test_public_mail_domain_is_not_a_corporation_domain() {
        let p = policy();
        assert!(p.validate_corp_email_domain("example.com").is_ok());
        assert!(matches!(
            p.validate_corp_email_domain("Gmail.com"),
            Err(ServiceError::InvalidCorpEmailDomain)
        ));
    }

    #[test]
    fn test_password_rules() {
        let pp = PasswordPolicy {
            min_length: 8,
            max_length: 16,
        };
        assert!(pp.check("Secur3!Pass").is_ok());
        assert!(matches!(pp.check("S3!a"), Err(PasswordRule::TooShort { .. })));
        assert!(matches!(
            pp.check("Secur3!Pass-way-too-long"),
            Err(PasswordRule::TooLong { .. })
        ));
        assert_eq!(pp.check("secur3!pass"), Err(PasswordRule::MissingUppercase));
        assert_eq!(pp.check("SECUR3!PASS"), Err(PasswordRule::MissingLowercase));
        assert_eq!(pp.check("Secure!Pass"), Err(PasswordRule::MissingNumber));
        assert_eq!(pp.check("Secur3Pass"), Err(PasswordRule::MissingSpecial));
    }

    #[test]
    fn test_password_change() {
        let p = policy();
        let old = Password::new("Old-Passw0rd");
        let hash = hash_password(&old).unwrap();

        assert!(matches!(
            p.validate_password_change(&Password::new("nope"), &Password::new("New-Passw0rd"), &hash),
            Err(ServiceError::InvalidPassword)
        ));
        assert!(matches!(
            p.validate_password_change(&old, &old.clone(), &hash),
            Err(ServiceError::SamePassword)
        ));
        assert!(matches!(
            p.validate_password_change(&old, &Password::new("weak"), &hash),
            Err(ServiceError::InvalidPassword)
        ));
        assert!(p
            .validate_password_change(&old, &Password::new("New-Passw0rd"), &hash)
            .is_ok());
    }

    #[test]
    fn test_freeze_after_threshold_then_thaw() {
        let p = policy();
        let start = Utc::now();
        let mut state = LoginState::default();

        for i in 0..5 {
            assert!(p.check_login_allowed(&state, start).is_ok());
            state = p.record_login_result(&state, false, start + Duration::seconds(i));
        }

        assert_eq!(state.failed_count, 5);
        let frozen_at = start + Duration::seconds(4);
        assert!(matches!(
            p.check_login_allowed(&state, frozen_at + Duration::seconds(299)),
            Err(ServiceError::UserFrozen)
        ));
        assert!(p
            .check_login_allowed(&state, frozen_at + Duration::seconds(300))
            .is_ok());

        // A failure after the thaw starts counting again.
        let after = p.record_login_result(&state, false, frozen_at + Duration::seconds(301));
        assert_eq!(after.failed_count, 1);
        assert!(after.frozen_until_utc.is_none());
    }

    #[test]
    fn test_success_resets_counter() {
        let p = policy();
        let now = Utc::now();
        let state = LoginState {
            failed_count: 4,
            last_failed_utc: Some(now),
            frozen_until_utc: None,
        };

        assert_eq!(p.record_login_result(&state, true, now), LoginState::default());
    }

    #[test]
    fn test_stale_failures_do_not_count() {
        let p = policy();
        let now = Utc::now();
        let state = LoginState {
            failed_count: 4,
            last_failed_utc: Some(now - Duration::seconds(301)),
            frozen_until_utc: None,
        };

        let next = p.record_login_result(&state, false, now);
        assert_eq!(next.failed_count, 1);
        assert!(next.frozen_until_utc.is_none());
    }
}
