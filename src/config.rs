use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json5";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SUBJECT: &str = "Form submission";
const DEFAULT_SENDER_NAME: &str = "Seance";
const DEFAULT_LIMIT_WINDOW_MS: u64 = 50_000;
const DEFAULT_LIMIT: u32 = 3;
const DEFAULT_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";
const DEFAULT_SMTP_PORT: u16 = 25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: json5::Error,
    },

    #[error("senderAddress is required")]
    MissingSender,

    #[error("recipientAddress is required")]
    MissingRecipient,
}

/// Raw settings as written in the JSON5 config file. Every field is optional;
/// environment variables take precedence over anything set here.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub allowed_hosts: Option<Vec<String>>,
    pub recaptcha_key: Option<String>,
    pub recaptcha_secret: Option<String>,
    pub h_captcha_key: Option<String>,
    pub h_captcha_secret: Option<String>,
    pub smtp: Option<SmtpFileConfig>,
    pub sender_address: Option<String>,
    pub sender_name: Option<String>,
    pub recipient_address: Option<String>,
    pub subject: Option<String>,
    pub limiter: Option<LimiterFileConfig>,
    pub trust_proxy: Option<usize>,
    pub assets_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtpFileConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: bool,
    pub auth: Option<SmtpAuth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpAuth {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimiterFileConfig {
    pub window_ms: Option<u64>,
    pub limit: Option<u32>,
    pub message: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        json5::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Which CAPTCHA provider guards submissions, with its key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaKeys {
    Recaptcha { site_key: String, secret: String },
    HCaptcha { site_key: String, secret: String },
}

impl CaptchaKeys {
    pub fn site_key(&self) -> &str {
        match self {
            Self::Recaptcha { site_key, .. } | Self::HCaptcha { site_key, .. } => site_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpSettings {
    /// `smtp://` or `smtps://` connection URL.
    Url(String),
    Relay {
        host: String,
        port: u16,
        /// Implicit TLS from the first byte; otherwise STARTTLS is attempted.
        secure: bool,
        credentials: Option<(String, String)>,
    },
}

#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub window: Duration,
    pub limit: u32,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Space-separated hosts allowed to frame the form.
    pub allowed_hosts: String,
    pub captcha: Option<CaptchaKeys>,
    pub smtp: SmtpSettings,
    pub sender_address: String,
    pub sender_name: String,
    pub recipient_address: String,
    pub subject: String,
    pub limiter: LimiterSettings,
    /// Number of reverse proxy hops whose forwarding headers are trusted.
    pub trust_proxy: usize,
    pub assets_dir: PathBuf,
}

impl Config {
    pub fn from_env(file: FileConfig) -> Result<Self, ConfigError> {
        Self::resolve(file, |key| env::var(key).ok())
    }

    /// Merge file settings with overrides from `lookup`. Empty override values
    /// are treated as unset.
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_var(var("PORT"))
            .filter(|p: &u16| *p != 0)
            .or(file.port.filter(|p| *p != 0))
            .unwrap_or(DEFAULT_PORT);

        let allowed_hosts = var("ALLOWEDHOSTS").unwrap_or_else(|| {
            file.allowed_hosts
                .clone()
                .unwrap_or_else(|| vec!["*".to_string()])
                .join(" ")
        });

        let recaptcha_key = var("RECAPTCHAKEY").or(file.recaptcha_key.clone());
        let recaptcha_secret = var("RECAPTCHASECRET").or(file.recaptcha_secret.clone());
        let h_captcha_key = var("HCAPTCHAKEY").or(file.h_captcha_key.clone());
        let h_captcha_secret = var("HCAPTCHASECRET").or(file.h_captcha_secret.clone());

        let captcha = match (recaptcha_key, recaptcha_secret, h_captcha_key, h_captcha_secret) {
            (Some(site_key), Some(secret), _, _) => Some(CaptchaKeys::Recaptcha { site_key, secret }),
            (_, _, Some(site_key), Some(secret)) => Some(CaptchaKeys::HCaptcha { site_key, secret }),
            _ => None,
        };

        let smtp_file = file.smtp.clone().unwrap_or_default();
        let smtp_user = smtp_file.auth.as_ref().map(|a| a.user.clone());
        let smtp = match var("SMTPURL").or(smtp_file.url.clone()) {
            Some(url) => SmtpSettings::Url(url),
            None => SmtpSettings::Relay {
                host: smtp_file.host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: smtp_file.port.unwrap_or(DEFAULT_SMTP_PORT),
                secure: smtp_file.secure,
                credentials: smtp_file.auth.map(|a| (a.user, a.pass)),
            },
        };

        let sender_address = var("SENDERADDRESS")
            .or(file.sender_address)
            .or(smtp_user)
            .ok_or(ConfigError::MissingSender)?;
        let recipient_address = var("RECIPIENTADDRESS")
            .or(file.recipient_address)
            .ok_or(ConfigError::MissingRecipient)?;

        let sender_name = var("SENDERNAME")
            .or(file.sender_name)
            .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string());
        let subject = var("SUBJECT")
            .or(file.subject)
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        let limiter_file = file.limiter.unwrap_or_default();
        let window_ms = parse_var(var("LIMITERWINDOWMS"))
            .filter(|ms: &u64| *ms > 0)
            .or(limiter_file.window_ms.filter(|ms| *ms > 0))
            .unwrap_or(DEFAULT_LIMIT_WINDOW_MS);
        let limit = parse_var(var("LIMITERLIMIT"))
            .filter(|n: &u32| *n > 0)
            .or(limiter_file.limit.filter(|n| *n > 0))
            .unwrap_or(DEFAULT_LIMIT);
        let limiter = LimiterSettings {
            window: Duration::from_millis(window_ms),
            limit,
            message: limiter_file
                .message
                .unwrap_or_else(|| DEFAULT_LIMIT_MESSAGE.to_string()),
        };

        let trust_proxy = parse_var(var("TRUSTPROXY")).or(file.trust_proxy).unwrap_or(1);

        let assets_dir = var("ASSETSDIR")
            .map(PathBuf::from)
            .or(file.assets_dir)
            .unwrap_or_else(|| PathBuf::from("assets"));

        Ok(Self {
            port,
            allowed_hosts,
            captcha,
            smtp,
            sender_address,
            sender_name,
            recipient_address,
            subject,
            limiter,
            trust_proxy,
            assets_dir,
        })
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let file = FileConfig {
        sender_address: Some("relay@example.com".to_string()),
        recipient_address: Some("owner@example.com".to_string()),
        ..Default::default()
    };
    Config::resolve(file, |_| None).unwrap()
}
