use chrono::Duration;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ClaConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// Public URL of the CLA platform, used in notification bodies.
    pub cla_platform_url: String,
    pub mongodb: MongoConfig,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub signing: SigningConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    /// Upper bound for a single store round trip.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub admin_api_key: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    /// Applies to the anonymous password-retrieval routes.
    pub password_retrieval_attempts: u32,
    pub password_retrieval_window_seconds: u64,
}

/// Tunables of the signing and manager-identity rules.
///
/// Every value that is unset or non-positive is replaced by its default in
/// [`SigningConfig::set_default`]; components receive the already-defaulted struct.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    pub max_size_of_cla_content: i64,
    /// Seconds.
    pub verification_code_expiry: i64,
    /// Comma separated public mail domains that can never identify a corporation.
    pub invalid_corp_email_domain: String,
    pub max_num_of_employee_manager: i64,
    pub min_num_of_same_email_domain_parts: i64,
    pub max_num_of_failed_login: i64,
    /// Seconds.
    pub period_of_login_frozen: i64,
    /// Seconds.
    pub period_of_login_checking: i64,
    pub password_min_length: i64,
    pub password_max_length: i64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        let mut cfg = Self {
            max_size_of_cla_content: 0,
            verification_code_expiry: 0,
            invalid_corp_email_domain: String::new(),
            max_num_of_employee_manager: 0,
            min_num_of_same_email_domain_parts: 0,
            max_num_of_failed_login: 0,
            period_of_login_frozen: 0,
            period_of_login_checking: 0,
            password_min_length: 0,
            password_max_length: 0,
        };
        cfg.set_default();
        cfg
    }
}

impl SigningConfig {
    pub fn set_default(&mut self) {
        if self.verification_code_expiry <= 0 {
            self.verification_code_expiry = 300;
        }

        if self.max_num_of_employee_manager <= 0 {
            self.max_num_of_employee_manager = 5;
        }

        if self.min_num_of_same_email_domain_parts <= 0 {
            self.min_num_of_same_email_domain_parts = 2;
        }

        if self.max_size_of_cla_content <= 0 {
            self.max_size_of_cla_content = 2 << 20;
        }

        if self.max_num_of_failed_login <= 0 {
            self.max_num_of_failed_login = 5;
        }

        if self.period_of_login_checking <= 0 {
            self.period_of_login_checking = 300;
        }

        if self.period_of_login_frozen <= 0 {
            self.period_of_login_frozen = 300;
        }

        if self.password_min_length <= 0 {
            self.password_min_length = 8;
        }

        if self.password_max_length < self.password_min_length {
            self.password_max_length = self.password_min_length.max(16);
        }
    }

    pub fn invalid_corp_email_domains(&self) -> Vec<String> {
        self.invalid_corp_email_domain
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn verification_code_ttl(&self) -> Duration {
        Duration::seconds(self.verification_code_expiry)
    }

    pub fn login_frozen_period(&self) -> Duration {
        Duration::seconds(self.period_of_login_frozen)
    }

    pub fn login_checking_period(&self) -> Duration {
        Duration::seconds(self.period_of_login_checking)
    }

    pub fn max_failed_login(&self) -> u32 {
        u32::try_from(self.max_num_of_failed_login).unwrap_or(u32::MAX)
    }

    pub fn max_employee_managers(&self) -> usize {
        usize::try_from(self.max_num_of_employee_manager).unwrap_or(usize::MAX)
    }

    pub fn min_same_domain_parts(&self) -> usize {
        usize::try_from(self.min_num_of_same_email_domain_parts).unwrap_or(usize::MAX)
    }
}

impl ClaConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mut signing = SigningConfig {
            max_size_of_cla_content: get_tunable("MAX_SIZE_OF_CLA_CONTENT")?,
            verification_code_expiry: get_tunable("VERIFICATION_CODE_EXPIRY")?,
            invalid_corp_email_domain: get_env(
                "INVALID_CORP_EMAIL_DOMAIN",
                Some("gmail.com,qq.com,163.com,126.com,outlook.com,hotmail.com,yahoo.com"),
                false,
            )?,
            max_num_of_employee_manager: get_tunable("MAX_NUM_OF_EMPLOYEE_MANAGER")?,
            min_num_of_same_email_domain_parts: get_tunable("MIN_NUM_OF_SAME_EMAIL_DOMAIN_PARTS")?,
            max_num_of_failed_login: get_tunable("MAX_NUM_OF_FAILED_LOGIN")?,
            period_of_login_frozen: get_tunable("PERIOD_OF_LOGIN_FROZEN")?,
            period_of_login_checking: get_tunable("PERIOD_OF_LOGIN_CHECKING")?,
            password_min_length: get_tunable("PASSWORD_MIN_LENGTH")?,
            password_max_length: get_tunable("PASSWORD_MAX_LENGTH")?,
        };
        signing.set_default();

        let config = ClaConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("cla-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            cla_platform_url: get_env(
                "CLA_PLATFORM_URL",
                Some("http://localhost:3000"),
                is_prod,
            )?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("cla_db"), is_prod)?,
                timeout_seconds: positive_or(
                    get_tunable("MONGODB_TIMEOUT_SECONDS")?,
                    DEFAULT_MONGODB_TIMEOUT_SECONDS,
                ),
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                access_token_expiry_seconds: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_SECONDS",
                    "3600",
                    is_prod,
                )?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("CLA Service"), is_prod)?,
                enabled: env::var("SMTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            security: SecurityConfig {
                admin_api_key: get_env("ADMIN_API_KEY", None, true)?,
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
            signing,
            rate_limit: RateLimitConfig {
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("20"), is_prod)?
                    .parse()
                    .unwrap_or(20),
                login_window_seconds: get_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
                password_retrieval_attempts: get_env(
                    "RATE_LIMIT_PASSWORD_RETRIEVAL_ATTEMPTS",
                    Some("5"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(5),
                password_retrieval_window_seconds: get_env(
                    "RATE_LIMIT_PASSWORD_RETRIEVAL_WINDOW_SECONDS",
                    Some("300"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(300),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_SECONDS must be positive"
            )));
        }

        if self.mongodb.timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MONGODB_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if !self.smtp.enabled {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SMTP_ENABLED must be true in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.jwt.secret.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least 32 bytes in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

const DEFAULT_MONGODB_TIMEOUT_SECONDS: u64 = 10;

fn positive_or(value: i64, default: u64) -> u64 {
    u64::try_from(value).ok().filter(|v| *v > 0).unwrap_or(default)
}

/// Signing tunables are optional everywhere; unset means "use the default".
fn get_tunable(key: &str) -> Result<i64, AppError> {
    match env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(0),
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e))),
        Err(_) => Ok(0),
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_default_replaces_non_positive_values() {
        let mut cfg = SigningConfig {
            max_size_of_cla_content: -1,
            verification_code_expiry: 0,
            invalid_corp_email_domain: String::new(),
            max_num_of_employee_manager: -3,
            min_num_of_same_email_domain_parts: 0,
            max_num_of_failed_login: 0,
            period_of_login_frozen: -10,
            period_of_login_checking: 0,
            password_min_length: 0,
            password_max_length: 0,
        };
        cfg.set_default();

        assert_eq!(cfg.verification_code_expiry, 300);
        assert_eq!(cfg.max_num_of_employee_manager, 5);
        assert_eq!(cfg.min_num_of_same_email_domain_parts, 2);
        assert_eq!(cfg.max_size_of_cla_content, 2 << 20);
        assert_eq!(cfg.max_num_of_failed_login, 5);
        assert_eq!(cfg.period_of_login_frozen, 300);
        assert_eq!(cfg.period_of_login_checking, 300);
        assert_eq!(cfg.password_min_length, 8);
        assert_eq!(cfg.password_max_length, 16);
    }

    #[test]
    fn test_set_default_keeps_configured_values() {
        let mut cfg = SigningConfig {
            verification_code_expiry: 60,
            max_num_of_employee_manager: 2,
            ..SigningConfig::default()
        };
        cfg.set_default();

        assert_eq!(cfg.verification_code_expiry, 60);
        assert_eq!(cfg.max_employee_managers(), 2);
    }

    #[test]
    fn test_invalid_corp_email_domains_are_normalized() {
        let cfg = SigningConfig {
            invalid_corp_email_domain: " Gmail.com, qq.com,,".to_string(),
            ..SigningConfig::default()
        };

        assert_eq!(cfg.invalid_corp_email_domains(), vec!["gmail.com", "qq.com"]);
    }

    fn dev_config() -> ClaConfig {
        ClaConfig {
            common: Default::default(),
            environment: Environment::Dev,
            service_name: "cla-service".to_string(),
            service_version: "0.1.0".to_string(),
            log_level: "info".to_string(),
            cla_platform_url: "https://cla.example.org".to_string(),
            mongodb: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "cla_db".to_string(),
                timeout_seconds: positive_or(0, DEFAULT_MONGODB_TIMEOUT_SECONDS),
            },
            jwt: JwtConfig {
                secret: "a-production-grade-secret-of-32-bytes!".to_string(),
                access_token_expiry_seconds: 3600,
            },
            smtp: SmtpConfig {
                host: "smtp.example.org".to_string(),
                port: 587,
                user: String::new(),
                password: String::new(),
                from_email: "noreply@example.org".to_string(),
                from_name: "CLA".to_string(),
                enabled: false,
            },
            security: SecurityConfig {
                admin_api_key: "operator-key".to_string(),
                allowed_origins: vec!["https://cla.example.org".to_string()],
            },
            signing: SigningConfig::default(),
            rate_limit: RateLimitConfig {
                login_attempts: 20,
                login_window_seconds: 60,
                password_retrieval_attempts: 5,
                password_retrieval_window_seconds: 300,
            },
        }
    }

    #[test]
    fn test_production_requires_smtp() {
        let mut cfg = dev_config();
        assert!(cfg.validate().is_ok());

        cfg.environment = Environment::Prod;
        assert!(matches!(cfg.validate(), Err(AppError::ConfigError(_))));

        cfg.smtp.enabled = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_non_positive_mongo_timeout_falls_back_to_default() {
        assert_eq!(positive_or(0, DEFAULT_MONGODB_TIMEOUT_SECONDS), 10);
        assert_eq!(positive_or(-5, DEFAULT_MONGODB_TIMEOUT_SECONDS), 10);
        assert_eq!(positive_or(30, DEFAULT_MONGODB_TIMEOUT_SECONDS), 30);
        assert_eq!(dev_config().mongodb.timeout_seconds, 10);
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
