use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use maud::html;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::client::ClientInfo;

pub const DEFAULT_WIDTH: u32 = 720;
pub const DEFAULT_HEIGHT: u32 = 600;

#[derive(Debug, Default, Deserialize)]
pub struct OembedParams {
    pub url: Option<String>,
    pub maxwidth: Option<String>,
    pub maxheight: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OembedResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    pub width: u32,
    pub height: u32,
    pub html: String,
}

#[derive(Debug, Serialize)]
struct NotFound {
    success: bool,
}

/// Requested dimension, capped at the default. Only the leading digits count
/// (`100px` is 100); values without any fall back to the default.
fn dimension(requested: Option<&str>, default: u32) -> u32 {
    requested
        .map(str::trim)
        .and_then(|v| {
            let end = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
            v[..end].parse::<u64>().ok()
        })
        .map_or(default, |v| v.min(u64::from(default)) as u32)
}

fn embed_html(src: &str, width: u32, height: u32) -> String {
    html! {
        iframe width=(width) height=(height) src=(src) frameBorder="0" style="max-width:100%" {}
    }
    .into_string()
}

/// oEmbed provider endpoint for the form page itself.
pub async fn oembed(
    Extension(client): Extension<ClientInfo>,
    headers: HeaderMap,
    Query(params): Query<OembedParams>,
) -> Response {
    let target = params
        .url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .filter(|u| u.path() == "/");

    let Some(target) = target else {
        debug!("oEmbed request for unknown url {:?}", params.url);
        return (StatusCode::NOT_FOUND, Json(NotFound { success: false })).into_response();
    };

    if let Some(format) = &params.format {
        if !format.eq_ignore_ascii_case("json") {
            return (StatusCode::NOT_IMPLEMENTED, "oEmbed response is JSON only.").into_response();
        }
    }

    let width = dimension(params.maxwidth.as_deref(), DEFAULT_WIDTH);
    let height = dimension(params.maxheight.as_deref(), DEFAULT_HEIGHT);

    let query = target.query().map(|q| format!("?{q}")).unwrap_or_default();
    let src = format!("{}{}{}", client.origin(&headers), target.path(), query);

    Json(OembedResponse {
        success: true,
        kind: "rich",
        version: "1.0",
        width,
        height,
        html: embed_html(&src, width, height),
    })
    .into_response()
}
