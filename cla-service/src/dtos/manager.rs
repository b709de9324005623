use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{CheckResult, ManagerSummary};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAdminRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Platform is required"))]
    pub platform: String,

    #[validate(length(min = 1, message = "Org id is required"))]
    pub org_id: String,

    #[serde(default)]
    pub repo_id: String,

    /// Account id or email.
    #[validate(length(min = 1, max = 254, message = "User is required"))]
    pub user: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(flatten)]
    pub manager: CheckResult,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Old password is required"))]
    pub old_password: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ListManagersQuery {
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct EmployeeManagerInput {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddEmployeeManagersRequest {
    #[validate(length(min = 1, message = "At least one manager is required"), nested)]
    pub managers: Vec<EmployeeManagerInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeleteEmployeeManagersRequest {
    #[validate(length(min = 1, message = "At least one email is required"))]
    pub emails: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManagersResponse {
    pub managers: Vec<ManagerSummary>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordRetrievalRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RetrievePasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_managers_validates_each_entry() {
        let req: AddEmployeeManagersRequest = serde_json::from_value(serde_json::json!({
            "managers": [
                {"name": "Bob", "email": "bob@example.com"},
                {"name": "", "email": "not-an-email"}
            ]
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let empty: AddEmployeeManagersRequest =
            serde_json::from_value(serde_json::json!({"managers": []})).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_valid_manager_batch_passes_validation() {
        let req = AddEmployeeManagersRequest {
            managers: vec![EmployeeManagerInput {
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
            }],
        };
        assert!(req.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&req.managers[0]).unwrap()["email"],
            "bob@example.com"
        );
    }

    #[test]
    fn test_login_request_repo_defaults_to_org_wide() {
        let req: LoginRequest = serde_json::from_value(serde_json::json!({
            "platform": "github",
            "org_id": "acme",
            "user": "bob@example.com",
            "password": "secret"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(req.repo_id.is_empty());
    }
}
