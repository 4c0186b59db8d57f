use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, SmtpSettings};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("malformed email address")]
    MalformedEmail,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("smtp server did not accept the connection")]
    Unavailable,
}

/// A contact form submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl Submission {
    pub fn from_form(fields: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let field = |key: &'static str| {
            fields
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or(ValidationError::MissingField(key))
        };

        let name = field("name")?;
        let email = field("email")?;
        let message = field("message")?;

        // The reply-to header must also survive lettre's stricter RFC 5322 parse
        if !is_valid_email(&email) || email.parse::<Address>().is_err() {
            return Err(ValidationError::MalformedEmail);
        }

        Ok(Self {
            name,
            email,
            message,
        })
    }
}

/// Minimal `local@domain.tld` shape check: no whitespace or extra `@`
/// anywhere, and a dot somewhere after a non-empty first domain label.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((label, rest)) = domain.split_once('.') else {
        return false;
    };

    let clean = |s: &str| !s.is_empty() && !s.contains('@') && !s.chars().any(char::is_whitespace);
    clean(local) && clean(label) && clean(rest)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub from_name: String,
    pub from_address: String,
    pub reply_to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message, returning the server's reply code.
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError>;

    /// Check connectivity and credentials without sending anything.
    async fn verify(&self) -> Result<(), MailError>;
}

pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, MailError> {
        let inner = match settings {
            SmtpSettings::Url(url) => AsyncSmtpTransport::<Tokio1Executor>::from_url(url)?.build(),
            SmtpSettings::Relay {
                host,
                port,
                secure,
                credentials,
            } => {
                let tls = TlsParameters::new(host.clone())?;
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                    .port(*port)
                    .tls(if *secure {
                        Tls::Wrapper(tls)
                    } else {
                        Tls::Opportunistic(tls)
                    });

                if let Some((user, pass)) = credentials {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }

                builder.build()
            }
        };

        Ok(Self { inner })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError> {
        let from = Mailbox::new(
            Some(mail.from_name.clone()),
            mail.from_address.parse::<Address>()?,
        );

        let message = Message::builder()
            .from(from)
            .reply_to(mail.reply_to.parse::<Mailbox>()?)
            .to(mail.to.parse::<Mailbox>()?)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())?;

        let response = self.inner.send(message).await?;
        Ok(response.code().to_string())
    }

    async fn verify(&self) -> Result<(), MailError> {
        if self.inner.test_connection().await? {
            Ok(())
        } else {
            Err(MailError::Unavailable)
        }
    }
}

/// Turns submissions into mail addressed to the site owner.
pub struct MailDispatcher {
    transport: Arc<dyn MailTransport>,
    sender_name: String,
    sender_address: String,
    recipient_address: String,
    subject: String,
}

impl MailDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, config: &Config) -> Self {
        Self {
            transport,
            sender_name: config.sender_name.clone(),
            sender_address: config.sender_address.clone(),
            recipient_address: config.recipient_address.clone(),
            subject: config.subject.clone(),
        }
    }

    pub fn compose(&self, submission: &Submission) -> OutgoingMail {
        OutgoingMail {
            to: self.recipient_address.clone(),
            from_name: self.sender_name.clone(),
            from_address: self.sender_address.clone(),
            reply_to: submission.email.clone(),
            subject: format!("{} from {}", self.subject, submission.name),
            body: submission.message.clone(),
        }
    }

    /// Single delivery attempt; failures are returned to the caller as-is.
    pub async fn dispatch(&self, submission: &Submission) -> Result<(), MailError> {
        let mail = self.compose(submission);
        let code = self.transport.send(&mail).await?;
        info!("Delivered message from {} ({})", submission.email, code);
        Ok(())
    }

    pub async fn verify(&self) -> Result<(), MailError> {
        self.transport.verify().await
    }
}
