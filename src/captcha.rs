//! CAPTCHA verification against the provider's `siteverify` endpoint.
//!
//! Exactly one provider is selected at startup from whichever key pair is
//! configured. With no provider configured, submissions are not challenged.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CaptchaKeys;

const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const HCAPTCHA_VERIFY_URL: &str = "https://api.hcaptcha.com/siteverify";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("verification request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Recaptcha,
    HCaptcha,
}

impl Provider {
    /// Form field the provider's widget writes its token into.
    pub fn response_field(self) -> &'static str {
        match self {
            Self::Recaptcha => "g-recaptcha-response",
            Self::HCaptcha => "h-captcha-response",
        }
    }

    fn verify_url(self) -> &'static str {
        match self {
            Self::Recaptcha => RECAPTCHA_VERIFY_URL,
            Self::HCaptcha => HCAPTCHA_VERIFY_URL,
        }
    }
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    fn provider(&self) -> Provider;

    /// Check a challenge token. `Ok(false)` means the provider rejected it.
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, CaptchaError>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// Verifier for providers speaking the reCAPTCHA-style `siteverify` protocol.
pub struct SiteVerifier {
    client: Client,
    provider: Provider,
    secret: String,
    verify_url: String,
}

impl SiteVerifier {
    pub fn new(provider: Provider, secret: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(VERIFY_TIMEOUT)
                .build()
                .unwrap_or_default(),
            provider,
            secret: secret.into(),
            verify_url: provider.verify_url().to_string(),
        }
    }

    pub fn from_keys(keys: &CaptchaKeys) -> Self {
        match keys {
            CaptchaKeys::Recaptcha { secret, .. } => Self::new(Provider::Recaptcha, secret.clone()),
            CaptchaKeys::HCaptcha { secret, .. } => Self::new(Provider::HCaptcha, secret.clone()),
        }
    }

    pub fn with_verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = url.into();
        self
    }
}

#[async_trait]
impl CaptchaVerifier for SiteVerifier {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, CaptchaError> {
        let mut params = vec![("secret", self.secret.as_str()), ("response", token)];
        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip));
        }

        let response: SiteVerifyResponse = self
            .client
            .post(&self.verify_url)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.success {
            debug!("{:?} token verified", self.provider);
        } else {
            warn!(
                "{:?} rejected token: {}",
                self.provider,
                response.error_codes.join(", ")
            );
        }

        Ok(response.success)
    }
}

pub fn verifier_for(keys: Option<&CaptchaKeys>) -> Option<Arc<dyn CaptchaVerifier>> {
    keys.map(|keys| Arc::new(SiteVerifier::from_keys(keys)) as Arc<dyn CaptchaVerifier>)
}
