//! Contact-form relay.
//!
//! `POST /contact/submit` hands the form to a [`Mailer`]. [`SmtpMailer`]
//! relays it over STARTTLS SMTP using settings read from the environment
//! at send time, so a misconfigured relay only fails the contact request.

use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;

use crate::error::SqlChatError;

const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, Deserialize)]
pub struct ContactForm {
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub subject: String,
    pub message: String,
}

impl ContactForm {
    pub fn email_subject(&self) -> String {
        format!("[Portfolio Contact] {}", self.subject)
    }

    pub fn email_body(&self) -> String {
        let company = self
            .company
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("-");
        format!(
            "New contact form submission:\n\nName: {}\nCompany: {}\nSubject: {}\n\nMessage:\n{}",
            self.name, company, self.subject, self.message
        )
        .trim()
        .to_string()
    }
}

/// Sends contact-form messages.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, form: &ContactForm) -> Result<()>;
}

/// SMTP relay settings (`SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASS`,
/// `TO_EMAIL`, `FROM_EMAIL`).
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub to_email: String,
    pub from_email: String,
}

impl SmtpSettings {
    /// Resolve settings through `lookup`. `TO_EMAIL` falls back to
    /// `default_to`, `FROM_EMAIL` to the recipient.
    pub fn from_lookup(
        default_to: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SqlChatError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (Some(host), Some(user), Some(pass)) =
            (get("SMTP_HOST"), get("SMTP_USER"), get("SMTP_PASS"))
        else {
            return Err(SqlChatError::Mail(
                "SMTP configuration missing: ensure SMTP_HOST, SMTP_USER, SMTP_PASS are set"
                    .to_string(),
            ));
        };
        let port = match get("SMTP_PORT") {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| SqlChatError::Mail(format!("Invalid SMTP_PORT: {}", p)))?,
            None => DEFAULT_SMTP_PORT,
        };
        let to_email = get("TO_EMAIL")
            .or_else(|| default_to.map(str::to_string))
            .ok_or_else(|| SqlChatError::Mail("TO_EMAIL is not set".to_string()))?;
        let from_email = get("FROM_EMAIL").unwrap_or_else(|| to_email.clone());
        if !from_email.contains('@') {
            return Err(SqlChatError::Mail(
                "FROM_EMAIL must be a valid email address".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            user,
            pass,
            to_email,
            from_email,
        })
    }

    pub fn from_env(default_to: Option<&str>) -> Result<Self, SqlChatError> {
        Self::from_lookup(default_to, |key| std::env::var(key).ok())
    }
}

pub struct SmtpMailer {
    default_to: Option<String>,
}

impl SmtpMailer {
    pub fn new(default_to: Option<String>) -> Self {
        Self { default_to }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, form: &ContactForm) -> Result<()> {
        let settings = SmtpSettings::from_env(self.default_to.as_deref())?;

        let from: Mailbox = settings
            .from_email
            .parse()
            .map_err(|e| SqlChatError::Mail(format!("Invalid FROM_EMAIL: {}", e)))?;
        let to: Mailbox = settings
            .to_email
            .parse()
            .map_err(|e| SqlChatError::Mail(format!("Invalid TO_EMAIL: {}", e)))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(form.email_subject())
            .header(ContentType::TEXT_PLAIN)
            .body(form.email_body())
            .map_err(|e| SqlChatError::Mail(e.to_string()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| SqlChatError::Mail(e.to_string()))?
            .port(settings.port)
            .credentials(Credentials::new(settings.user, settings.pass))
            .build();

        transport
            .send(email)
            .await
            .map_err(|e| SqlChatError::Mail(e.to_string()))?;
        tracing::info!(subject = %form.subject, "contact message relayed");
        Ok(())
    }
}
