use axum::{
    extract::{rejection::FormRejection, Extension, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use maud::Markup;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::client::{self, ClientInfo};
use super::csp::{self, CspNonce};
use super::oembed;
use crate::captcha::{self, CaptchaVerifier};
use crate::config::Config;
use crate::error::SubmitError;
use crate::limiter::{Decision, SubmissionLimiter};
use crate::mail::{MailDispatcher, Submission};
use crate::views::{self, FormView};

const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
    pub mailer: Arc<MailDispatcher>,
    pub limiter: Arc<SubmissionLimiter>,
}

impl AppState {
    pub fn new(config: Arc<Config>, mailer: Arc<MailDispatcher>) -> Self {
        let captcha = captcha::verifier_for(config.captcha.as_ref());
        let limiter = Arc::new(SubmissionLimiter::from_settings(&config.limiter));

        Self {
            config,
            captcha,
            mailer,
            limiter,
        }
    }
}

/// A rendered HTML page with its status and Content-Security-Policy.
pub struct Page {
    pub status: StatusCode,
    pub csp: String,
    pub markup: Markup,
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        let mut response = (self.status, Html(self.markup.into_string())).into_response();
        match HeaderValue::from_str(&self.csp) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(header::CONTENT_SECURITY_POLICY, value);
            }
            Err(e) => warn!("Dropping unrepresentable CSP header: {}", e),
        }
        response
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ThemeParams {
    #[serde(default)]
    pub dark: Option<String>,
}

impl ThemeParams {
    pub fn is_dark(&self) -> bool {
        matches!(self.dark.as_deref(), Some(v) if !v.is_empty() && v != "false")
    }
}

pub async fn index(
    State(state): State<AppState>,
    Extension(nonce): Extension<CspNonce>,
    Extension(client): Extension<ClientInfo>,
    Query(theme): Query<ThemeParams>,
    headers: HeaderMap,
    uri: Uri,
) -> Page {
    let domain = client.origin(&headers);
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!("{}{}", domain, path);

    let captcha = state
        .captcha
        .as_ref()
        .zip(state.config.captcha.as_ref())
        .map(|(verifier, keys)| (verifier.provider(), keys.site_key()));

    let markup = views::form_page(&FormView {
        nonce: &nonce.0,
        captcha,
        dark: theme.is_dark(),
        domain: &domain,
        url: &url,
    });

    Page {
        status: StatusCode::OK,
        csp: csp::form_policy(&state.config.allowed_hosts, &nonce.0),
        markup,
    }
}

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

/// Middleware on `POST /`: count the submission before the body is read.
pub async fn limit_submissions(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Query(theme): Query<ThemeParams>,
    req: Request,
    next: Next,
) -> Response {
    match state.limiter.check(client.key()) {
        Decision::Allowed { .. } => next.run(req).await,
        Decision::Limited => SubmitError::RateLimited {
            client: client.key().to_string(),
            message: state.config.limiter.message.clone(),
        }
        .render(&state.config.allowed_hosts, theme.is_dark())
        .into_response(),
    }
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Query(theme): Query<ThemeParams>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Page {
    let dark = theme.is_dark();
    let outcome = match form {
        Ok(Form(fields)) => process_submission(&state, &client, &fields).await,
        Err(rejection) => Err(SubmitError::Undecodable(rejection.body_text())),
    };

    match outcome {
        Ok(()) => Page {
            status: StatusCode::OK,
            csp: csp::result_policy(&state.config.allowed_hosts),
            markup: views::result_page(
                "Message sent",
                "Your message has been received. Thank you!",
                dark,
            ),
        },
        Err(err) => err.render(&state.config.allowed_hosts, dark),
    }
}

/// CAPTCHA check, validation, then a single delivery attempt.
async fn process_submission(
    state: &AppState,
    client: &ClientInfo,
    fields: &HashMap<String, String>,
) -> Result<(), SubmitError> {
    if let Some(verifier) = &state.captcha {
        let token = fields
            .get(verifier.provider().response_field())
            .filter(|t| !t.is_empty())
            .ok_or(SubmitError::CaptchaFailed)?;

        match verifier.verify(token, client.ip.as_deref()).await {
            Ok(true) => {}
            Ok(false) => return Err(SubmitError::CaptchaFailed),
            Err(e) => {
                warn!("CAPTCHA provider unavailable: {}", e);
                return Err(SubmitError::CaptchaFailed);
            }
        }
    }

    let submission = Submission::from_form(fields)?;
    state.mailer.dispatch(&submission).await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    info!(
        "Rate limiter: {} submissions per {} ms",
        state.limiter.limit(),
        state.limiter.window().as_millis()
    );
    match &state.captcha {
        Some(verifier) => info!("CAPTCHA provider: {:?}", verifier.provider()),
        None => info!("No CAPTCHA configured, submissions are not challenged"),
    }

    // route_layer keeps other methods on `/` out of the submission budget
    let submissions = post(submit)
        .route_layer(RequestBodyLimitLayer::new(MAX_FORM_BYTES))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_submissions));

    Router::new()
        .route("/", get(index))
        .route("/", submissions)
        .route("/services/oembed", get(oembed::oembed))
        .route("/services/oembed/", get(oembed::oembed))
        .route("/healthcheck", get(healthcheck))
        .nest_service("/assets", ServeDir::new(&state.config.assets_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), client::resolve_client))
                .layer(middleware::from_fn(csp::assign_nonce)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::{CaptchaError, Provider};
    use crate::config::{test_config, CaptchaKeys};
    use crate::mail::testing::RecordingTransport;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    const VALID_FORM: &str = "name=Ada+Lovelace&email=ada%40example.com&message=Hello+there";

    struct StubVerifier {
        accept: bool,
        calls: AtomicUsize,
    }

    impl StubVerifier {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CaptchaVerifier for StubVerifier {
        fn provider(&self) -> Provider {
            Provider::HCaptcha
        }

        async fn verify(&self, token: &str, _remote_ip: Option<&str>) -> Result<bool, CaptchaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.accept && token == "passed")
        }
    }

    struct TestApp {
        state: AppState,
        transport: Arc<RecordingTransport>,
    }

    impl TestApp {
        fn with(
            config: Config,
            transport: RecordingTransport,
            captcha: Option<Arc<dyn CaptchaVerifier>>,
        ) -> Self {
            let config = Arc::new(config);
            let transport = Arc::new(transport);
            let mailer = Arc::new(MailDispatcher::new(transport.clone(), &config));
            let state = AppState {
                limiter: Arc::new(SubmissionLimiter::from_settings(&config.limiter)),
                config,
                captcha,
                mailer,
            };
            Self { state, transport }
        }

        fn new() -> Self {
            Self::with(test_config(), RecordingTransport::default(), None)
        }

        fn router(&self) -> Router {
            create_router(self.state.clone())
        }
    }

    fn post_form(body: &str, client_ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("x-forwarded-for", client_ip)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn csp_header(response: &Response) -> String {
        response
            .headers()
            .get(header::CONTENT_SECURITY_POLICY)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let app = TestApp::new();

        let response = app
            .router()
            .oneshot(Request::builder().uri("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Healthy");
    }

    #[tokio::test]
    async fn test_index_nonce_matches_csp() {
        let app = TestApp::new();

        let response = app
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let policy = csp_header(&response);
        assert!(policy.starts_with("frame-ancestors 'self' *;"));
        let nonce = policy
            .split("'nonce-")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .unwrap()
            .to_string();
        assert_eq!(nonce.len(), 64);

        let html = body_string(response).await;
        assert!(html.contains(&format!(r#"nonce="{}""#, nonce)));
    }

    #[tokio::test]
    async fn test_index_nonces_are_fresh() {
        let app = TestApp::new();
        let router = app.router();

        let first = router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let second = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(csp_header(&first), csp_header(&second));
    }

    #[tokio::test]
    async fn test_index_renders_captcha_widget() {
        let mut config = test_config();
        config.captcha = Some(CaptchaKeys::HCaptcha {
            site_key: "h-site-key".into(),
            secret: "secret".into(),
        });
        let app = TestApp::with(
            config,
            RecordingTransport::default(),
            Some(Arc::new(StubVerifier::new(true))),
        );

        let response = app
            .router()
            .oneshot(Request::builder().uri("/?dark=1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let html = body_string(response).await;
        assert!(html.contains(r#"data-sitekey="h-site-key""#));
        assert!(html.contains(r#"<body class="dark">"#));
    }

    #[tokio::test]
    async fn test_valid_submission_sends_mail() {
        let app = TestApp::new();

        let response = app
            .router()
            .oneshot(post_form(VALID_FORM, "198.51.100.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let policy = csp_header(&response);
        assert!(!policy.contains("nonce-"));
        assert!(body_string(response).await.contains("Message sent"));

        let sent = app.transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reply_to, "ada@example.com");
        assert!(sent[0].subject.contains("Ada Lovelace"));
        assert_eq!(sent[0].body, "Hello there");
    }

    #[tokio::test]
    async fn test_invalid_submissions_send_nothing() {
        let app = TestApp::new();
        let router = app.router();

        let bodies = [
            "name=Ada&email=&message=Hi",
            "name=Ada&email=ada.example.com&message=Hi",
            "name=Ada&email=ada%40example&message=Hi",
            "name=&email=ada%40example.com&message=Hi",
            "name=Ada&email=ada%40example.com",
            "name=Ada&email=a%2Cb%40example.com&message=Hi",
            "name=Ada&email=a%3Cb%40example.com&message=Hi",
        ];

        for (i, body) in bodies.iter().enumerate() {
            let response = router
                .clone()
                .oneshot(post_form(body, &format!("198.51.100.{}", i + 10)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            assert!(body_string(response).await.contains("something wrong"));
        }

        assert_eq!(app.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_renders_500() {
        let app = TestApp::with(test_config(), RecordingTransport::failing(), None);

        let response = app
            .router()
            .oneshot(post_form(VALID_FORM, "198.51.100.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.contains("Try again later"));
        assert_eq!(app.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_captcha_failure_blocks_mail() {
        let verifier = Arc::new(StubVerifier::new(false));
        let app = TestApp::with(
            test_config(),
            RecordingTransport::default(),
            Some(verifier.clone()),
        );

        let body = format!("{}&h-captcha-response=passed", VALID_FORM);
        let response = app
            .router()
            .oneshot(post_form(&body, "198.51.100.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_captcha_token_skips_provider() {
        let verifier = Arc::new(StubVerifier::new(true));
        let app = TestApp::with(
            test_config(),
            RecordingTransport::default(),
            Some(verifier.clone()),
        );

        let response = app
            .router()
            .oneshot(post_form(VALID_FORM, "198.51.100.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(app.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_captcha_success_sends_mail() {
        let app = TestApp::with(
            test_config(),
            RecordingTransport::default(),
            Some(Arc::new(StubVerifier::new(true))),
        );

        let body = format!("{}&h-captcha-response=passed", VALID_FORM);
        let response = app
            .router()
            .oneshot(post_form(&body, "198.51.100.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_extra_submissions() {
        let mut config = test_config();
        config.limiter.limit = 2;
        config.limiter.window = Duration::from_millis(200);
        let app = TestApp::with(config, RecordingTransport::default(), None);
        let router = app.router();

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(post_form(VALID_FORM, "203.0.113.5"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = router
            .clone()
            .oneshot(post_form(VALID_FORM, "203.0.113.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(body_string(response).await.contains("Too many requests"));
        assert_eq!(app.transport.sent_count(), 2);

        // Another client is unaffected
        let response = router
            .clone()
            .oneshot(post_form(VALID_FORM, "203.0.113.6"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(300)).await;

        let response = router
            .oneshot(post_form(VALID_FORM, "203.0.113.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.transport.sent_count(), 4);
    }

    #[tokio::test]
    async fn test_identical_submissions_are_not_deduplicated() {
        let app = TestApp::new();
        let router = app.router();

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(post_form(VALID_FORM, "198.51.100.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(app.transport.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_get_requests_are_not_rate_limited() {
        let mut config = test_config();
        config.limiter.limit = 1;
        let app = TestApp::with(config, RecordingTransport::default(), None);
        let router = app.router();

        for _ in 0..5 {
            let response = router
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_other_methods_do_not_consume_submission_budget() {
        let mut config = test_config();
        config.limiter.limit = 1;
        let app = TestApp::with(config, RecordingTransport::default(), None);
        let router = app.router();

        for method in ["DELETE", "PUT", "OPTIONS", "PATCH"] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/")
                        .header("x-forwarded-for", "203.0.113.9")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "method: {}", method);
        }

        let response = router
            .oneshot(post_form(VALID_FORM, "203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.transport.sent_count(), 1);
    }

    async fn oembed_request(query: &str) -> Response {
        let app = TestApp::new();
        app.router()
            .oneshot(
                Request::builder()
                    .uri(format!("/services/oembed?{}", query))
                    .header("host", "contact.example.com")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_oembed_defaults() {
        let response = oembed_request("url=https%3A%2F%2Fcontact.example.com%2F").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["type"], "rich");
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["width"], 720);
        assert_eq!(json["height"], 600);
        assert!(json["html"]
            .as_str()
            .unwrap()
            .contains(r#"src="https://contact.example.com/""#));
    }

    #[tokio::test]
    async fn test_oembed_maxwidth() {
        let response =
            oembed_request("url=https%3A%2F%2Fcontact.example.com%2F%3Fdark%3Dtrue&maxwidth=100&maxheight=9000").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["width"], 100);
        assert_eq!(json["height"], 600);
        assert!(json["html"].as_str().unwrap().contains("/?dark=true"));
    }

    #[tokio::test]
    async fn test_oembed_maxwidth_with_units() {
        let response =
            oembed_request("url=https%3A%2F%2Fcontact.example.com%2F&maxwidth=100px&maxheight=250.5").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["width"], 100);
        assert_eq!(json["height"], 250);
    }

    #[tokio::test]
    async fn test_oembed_unknown_path() {
        let response = oembed_request("url=https%3A%2F%2Fcontact.example.com%2Fother").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = oembed_request("").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oembed_non_json_format() {
        let response = oembed_request("url=https%3A%2F%2Fcontact.example.com%2F&format=xml").await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

        let response = oembed_request("url=https%3A%2F%2Fcontact.example.com%2F&format=JSON").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_theme_flag() {
        let theme = |v: Option<&str>| ThemeParams {
            dark: v.map(str::to_string),
        };
        assert!(theme(Some("1")).is_dark());
        assert!(theme(Some("true")).is_dark());
        assert!(!theme(Some("false")).is_dark());
        assert!(!theme(Some("")).is_dark());
        assert!(!theme(None).is_dark());
    }
}
