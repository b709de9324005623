use chrono::Duration;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::{Error as JwtError, ErrorKind},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{CheckResult, OrgKey, Role};
use crate::services::clock::Clock;

/// Signs and verifies manager access tokens (HS256).
///
/// `iat` and `exp` are stamped and checked against the same clock.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_seconds: i64,
    clock: Arc<dyn Clock>,
}

/// Claims of a manager access token; scoped to one link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerClaims {
    /// Manager account id
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub corporation_id: String,
    pub platform: String,
    pub org_id: String,
    pub repo_id: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl ManagerClaims {
    pub fn org_key(&self) -> OrgKey {
        OrgKey::new(&self.platform, &self.org_id, &self.repo_id)
    }
}

impl JwtService {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        tracing::info!("JWT service initialized with HS256 secret");
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_token_expiry_seconds: config.access_token_expiry_seconds,
            clock,
        }
    }

    pub fn expires_in(&self) -> i64 {
        self.access_token_expiry_seconds
    }

    pub fn generate_access_token(
        &self,
        key: &OrgKey,
        manager: &CheckResult,
    ) -> Result<String, anyhow::Error> {
        let now = self.clock.now();
        let exp = now + Duration::seconds(self.access_token_expiry_seconds);

        let claims = ManagerClaims {
            sub: manager.user_id.clone(),
            email: manager.email.clone(),
            role: manager.role,
            corporation_id: manager.corporation_id.clone(),
            platform: key.platform.clone(),
            org_id: key.org_id.clone(),
            repo_id: key.repo_id.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    pub fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<ManagerClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<ManagerClaims>(token, &self.decoding_key, &validation)?.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(ErrorKind::ExpiredSignature.into());
        }
        Ok(claims)
    }
}
