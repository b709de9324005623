//! Manager accounts embedded in a signing record.

use super::opt_chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manager role within a corporation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Consecutive failed login bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginState {
    #[serde(default)]
    pub failed_count: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub last_failed_utc: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub frozen_until_utc: Option<DateTime<Utc>>,
}

impl LoginState {
    pub fn is_frozen_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.frozen_until_utc, Some(until) if now < until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manager {
    /// Account id, `<local-part>_<corporation_id>`.
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub role: Role,
    pub corporation_id: String,
    pub password_hash: String,
    #[serde(default)]
    pub initial_password_changed: bool,
    #[serde(default)]
    pub login: LoginState,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

impl Manager {
    pub fn new(
        name: String,
        email: String,
        role: Role,
        corporation_id: String,
        password_hash: String,
        created_utc: DateTime<Utc>,
    ) -> Self {
        let local = email.split('@').next().unwrap_or_default();
        Self {
            id: format!("{}_{}", local, corporation_id),
            name,
            email,
            role,
            corporation_id,
            password_hash,
            initial_password_changed: false,
            login: LoginState::default(),
            created_utc,
        }
    }

    /// A login identifier is either the account id or the email address.
    pub fn matches_account(&self, user: &str) -> bool {
        self.id == user || self.email.eq_ignore_ascii_case(user)
    }

    pub fn summary(&self) -> ManagerSummary {
        ManagerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            corporation_id: self.corporation_id.clone(),
        }
    }
}

/// Public view of a manager, without credentials or login state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub corporation_id: String,
}

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub corporation_id: String,
    pub initial_password_changed: bool,
}
