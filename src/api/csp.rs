use axum::{extract::Request, middleware::Next, response::Response};
use rand::RngCore;

const NONCE_BYTES: usize = 32;

/// Per-request nonce authorizing the form page's script tags.
#[derive(Debug, Clone)]
pub struct CspNonce(pub String);

pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Middleware: attach a fresh [`CspNonce`] to every request.
pub async fn assign_nonce(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(CspNonce(generate_nonce()));
    next.run(req).await
}

/// Policy for the form page. The CAPTCHA widgets need their origins in
/// `default-src`; scripts only run with the nonce.
pub fn form_policy(allowed_hosts: &str, nonce: &str) -> String {
    format!(
        "frame-ancestors 'self' {allowed_hosts}; \
         default-src 'self' https://www.google.com https://*.hcaptcha.com; \
         connect-src 'self' *; \
         script-src 'self' 'nonce-{nonce}'"
    )
}

/// Policy for result and error pages.
pub fn result_policy(allowed_hosts: &str) -> String {
    format!(
        "frame-ancestors 'self' {allowed_hosts}; \
         default-src 'self'; \
         connect-src 'self' *; \
         script-src 'self';"
    )
}
