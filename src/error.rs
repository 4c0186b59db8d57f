//! Failure outcomes of a form submission.
//!
//! Every variant renders through the same result template so clients never
//! learn which check failed; details go to the server log only.

use axum::http::StatusCode;
use tracing::{debug, error, warn};

use crate::api::http::Page;
use crate::api::csp;
use crate::mail::{MailError, ValidationError};
use crate::views;

const INVALID_TEXT: &str =
    "There was something wrong with the form you submitted. Go back and try again.";
const DELIVERY_TEXT: &str =
    "An error occurred while attempting to deliver your message. Try again later.";

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("form data failed to validate: {0}")]
    Invalid(#[from] ValidationError),

    #[error("form body could not be decoded: {0}")]
    Undecodable(String),

    #[error("captcha verification failed")]
    CaptchaFailed,

    #[error("too many submissions from {client}")]
    RateLimited { client: String, message: String },

    #[error("failed to send email: {0}")]
    Delivery(#[from] MailError),
}

impl SubmitError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(_) | Self::Undecodable(_) | Self::CaptchaFailed => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log the failure and render the page shown to the submitter.
    pub fn render(&self, allowed_hosts: &str, dark: bool) -> Page {
        let markup = match self {
            Self::Invalid(_) | Self::Undecodable(_) | Self::CaptchaFailed => {
                warn!("Rejected submission: {}", self);
                views::result_page("Error", INVALID_TEXT, dark)
            }
            Self::RateLimited { message, .. } => {
                debug!("{}", self);
                views::rate_limit_page(message, dark)
            }
            Self::Delivery(err) => {
                error!("Failed to send email: {}", err);
                views::result_page("Error", DELIVERY_TEXT, dark)
            }
        };

        Page {
            status: self.status(),
            csp: csp::result_policy(allowed_hosts),
            markup,
        }
    }
}
