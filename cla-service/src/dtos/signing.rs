use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{CorpSigning, OrgKey};

/// Path captures of the `/links/...` and `/password-retrieval/...` routes.
/// `repo_id` is absent on org-wide links.
#[derive(Debug, Deserialize)]
pub struct LinkPath {
    pub platform: String,
    pub org_id: String,
    pub repo_id: Option<String>,
}

impl LinkPath {
    pub fn key(&self) -> OrgKey {
        OrgKey::new(
            self.platform.as_str(),
            self.org_id.as_str(),
            self.repo_id.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct CorporationPath {
    pub platform: String,
    pub org_id: String,
    pub repo_id: Option<String>,
    pub corp_id: String,
}

impl CorporationPath {
    pub fn key(&self) -> OrgKey {
        OrgKey::new(
            self.platform.as_str(),
            self.org_id.as_str(),
            self.repo_id.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkResponse {
    pub link: String,
    pub created: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignCorporationRequest {
    #[validate(length(min = 1, max = 200, message = "Corporation name must be 1-200 characters"))]
    pub corporation_name: String,

    #[validate(email(message = "Invalid email format"))]
    pub admin_email: String,

    #[validate(length(min = 1, max = 100, message = "Admin name must be 1-100 characters"))]
    pub admin_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CorporationResponse {
    pub corporation_id: String,
    pub corporation_name: String,
    pub admin_email: String,
    pub admin_name: String,
    pub email_domains: Vec<String>,
    pub signed_at: DateTime<Utc>,
}

impl From<CorpSigning> for CorporationResponse {
    fn from(corp: CorpSigning) -> Self {
        Self {
            corporation_id: corp.corporation_id,
            corporation_name: corp.corporation_name,
            admin_email: corp.admin_email,
            admin_name: corp.admin_name,
            email_domains: corp.email_domains,
            signed_at: corp.signed_utc,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CorporationsResponse {
    pub corporations: Vec<CorporationResponse>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailDomainCodeRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddEmailDomainRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailDomainsResponse {
    pub email_domains: Vec<String>,
}
