use super::manager::{Manager, Role};
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Identifies the CLA link a signing record belongs to. `repo_id` is empty for
/// an org-wide link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgKey {
    pub platform: String,
    pub org_id: String,
    #[serde(default)]
    pub repo_id: String,
}

impl OrgKey {
    pub fn new(
        platform: impl Into<String>,
        org_id: impl Into<String>,
        repo_id: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            org_id: org_id.into(),
            repo_id: repo_id.into(),
        }
    }
}

impl std::fmt::Display for OrgKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.repo_id.is_empty() {
            write!(f, "{}/{}", self.platform, self.org_id)
        } else {
            write!(f, "{}/{}/{}", self.platform, self.org_id, self.repo_id)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpSigning {
    pub corporation_id: String,
    pub corporation_name: String,
    pub admin_email: String,
    pub admin_name: String,
    #[serde(default)]
    pub email_domains: Vec<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub signed_utc: DateTime<Utc>,
}

/// Signing record: one per link, owns corporation signings and the manager roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub platform: String,
    pub org_id: String,
    #[serde(default)]
    pub repo_id: String,
    #[serde(default)]
    pub corporations: Vec<CorpSigning>,
    #[serde(default)]
    pub managers: Vec<Manager>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

impl SigningRecord {
    pub fn new(key: &OrgKey, created_utc: DateTime<Utc>) -> Self {
        Self {
            id: None,
            platform: key.platform.clone(),
            org_id: key.org_id.clone(),
            repo_id: key.repo_id.clone(),
            corporations: Vec::new(),
            managers: Vec::new(),
            created_utc,
        }
    }

    pub fn key(&self) -> OrgKey {
        OrgKey::new(&self.platform, &self.org_id, &self.repo_id)
    }

    pub fn corporation(&self, corporation_id: &str) -> Option<&CorpSigning> {
        self.corporations
            .iter()
            .find(|c| c.corporation_id == corporation_id)
    }

    pub fn manager_by_email(&self, email: &str) -> Option<&Manager> {
        self.managers
            .iter()
            .find(|m| m.email.eq_ignore_ascii_case(email))
    }

    pub fn manager_by_account(&self, user: &str) -> Option<&Manager> {
        self.managers.iter().find(|m| m.matches_account(user))
    }

    pub fn admin_of(&self, corporation_id: &str) -> Option<&Manager> {
        self.managers
            .iter()
            .find(|m| m.role == Role::Admin && m.corporation_id == corporation_id)
    }

    pub fn count_managers(&self, role: Role, corporation_id: &str) -> usize {
        self.managers
            .iter()
            .filter(|m| m.role == role && m.corporation_id == corporation_id)
            .count()
    }
}
