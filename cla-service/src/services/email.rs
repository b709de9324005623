use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    AddingCorpAdmin,
    AddingCorpManager,
    RemovingCorpManager,
    VerificationCode,
    AddingCorpEmailDomain,
    PasswordRetrieval,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplate::AddingCorpAdmin => "adding corp admin",
            EmailTemplate::AddingCorpManager => "adding corp manager",
            EmailTemplate::RemovingCorpManager => "removing corp manager",
            EmailTemplate::VerificationCode => "verification code",
            EmailTemplate::AddingCorpEmailDomain => "adding corp email domain",
            EmailTemplate::PasswordRetrieval => "password retrieval",
        }
    }
}

/// Rendered notification. `has_secret` marks content that must never be logged.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub template: EmailTemplate,
    pub to: Vec<String>,
    pub subject: String,
    pub content: String,
    pub has_secret: bool,
}

/// New admin or employee manager with their one-time password.
pub struct AddingCorpManager<'a> {
    pub admin: bool,
    pub id: &'a str,
    pub user: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub org: &'a str,
    pub platform_url: &'a str,
}

impl AddingCorpManager<'_> {
    pub fn message(&self) -> EmailMessage {
        let (template, subject, role) = if self.admin {
            (
                EmailTemplate::AddingCorpAdmin,
                format!("Corporation administrator account of {}", self.org),
                "administrator",
            )
        } else {
            (
                EmailTemplate::AddingCorpManager,
                format!("Corporation manager account of {}", self.org),
                "employee manager",
            )
        };

        let content = format!(
            "Hello {},\n\n\
             You have been added as the corporation {} of the CLA signed with {}.\n\n\
             Account: {}\n\
             Email: {}\n\
             Password: {}\n\n\
             Please log in at {} and change the password immediately.\n",
            self.user, role, self.org, self.id, self.email, self.password, self.platform_url
        );

        EmailMessage {
            template,
            to: vec![self.email.to_string()],
            subject,
            content,
            has_secret: true,
        }
    }
}

pub struct RemovingCorpManager<'a> {
    pub to: Vec<String>,
    pub org: &'a str,
    pub platform_url: &'a str,
}

impl RemovingCorpManager<'_> {
    pub fn message(self) -> EmailMessage {
        let content = format!(
            "Hello,\n\n\
             You are no longer an employee manager of the CLA signed with {}.\n\
             Visit {} if you have any questions.\n",
            self.org, self.platform_url
        );

        EmailMessage {
            template: EmailTemplate::RemovingCorpManager,
            to: self.to,
            subject: format!("Removed as employee manager of {}", self.org),
            content,
            has_secret: false,
        }
    }
}

/// Codes for the password-retrieval, email-domain and email-verification flows.
pub struct CodeNotice<'a> {
    pub template: EmailTemplate,
    pub email: &'a str,
    pub org: &'a str,
    pub corporation: &'a str,
    pub code: &'a str,
    pub ttl_minutes: i64,
}

impl CodeNotice<'_> {
    pub fn message(&self) -> EmailMessage {
        let (subject, purpose) = match self.template {
            EmailTemplate::PasswordRetrieval => (
                format!("Retrieve the password of your {} CLA account", self.org),
                "to reset the password of your account".to_string(),
            ),
            EmailTemplate::AddingCorpEmailDomain => (
                format!("Add an email domain for {}", self.corporation),
                format!(
                    "to add the domain of {} to corporation {}",
                    self.email, self.corporation
                ),
            ),
            _ => (
                format!("Verification code for {}", self.org),
                format!("to verify {}", self.email),
            ),
        };

        let content = format!(
            "Hello,\n\n\
             Use the code {} {} for the CLA of {}.\n\
             The code expires in {} minutes and can be used once.\n",
            self.code, purpose, self.org, self.ttl_minutes
        );

        EmailMessage {
            template: self.template,
            to: vec![self.email.to_string()],
            subject,
            content,
            has_secret: true,
        }
    }
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, msg: &EmailMessage) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpEmailService {
    mailer: SmtpTransport,
    from: Mailbox,
}

impl SmtpEmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e: lettre::address::AddressError| AppError::ConfigError(e.into()))?;

        tracing::info!(host = %config.host, port = config.port, "SMTP email service initialized");

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailService {
    async fn send(&self, msg: &EmailMessage) -> Result<(), AppError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(msg.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &msg.to {
            builder = builder.to(to
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::BadRequest(e.into()))?);
        }
        let email = builder.body(msg.content.clone())?;

        // Send in blocking thread pool to avoid blocking the async runtime
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(
                    template = msg.template.as_str(),
                    recipients = msg.to.len(),
                    "Email sent successfully"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    template = msg.template.as_str(),
                    "Failed to send email"
                );
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

/// Development provider for when SMTP is disabled: logs that a message would
/// have been sent and keeps nothing. The body is never logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailService;

#[async_trait]
impl EmailProvider for LogEmailService {
    async fn send(&self, msg: &EmailMessage) -> Result<(), AppError> {
        tracing::info!(
            template = msg.template.as_str(),
            recipients = msg.to.len(),
            has_secret = msg.has_secret,
            "SMTP disabled, email not delivered"
        );
        Ok(())
    }
}

/// Records every message instead of delivering it. Test use only.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, email: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.to.iter().any(|t| t.eq_ignore_ascii_case(email)))
            .collect()
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send(&self, msg: &EmailMessage) -> Result<(), AppError> {
        tracing::debug!(template = msg.template.as_str(), "Mock email recorded");
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock email mutex poisoned: {}", e)))?
            .push(msg.clone());
        Ok(())
    }
}
