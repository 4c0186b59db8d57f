use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use super::http::AppState;

const UNKNOWN_CLIENT: &str = "unknown";

/// Who sent the request, after applying the trusted proxy hop count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub scheme: String,
}

impl ClientInfo {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> Self {
        Self {
            ip: client_ip(headers, peer, trusted_hops),
            scheme: scheme(headers, trusted_hops),
        }
    }

    /// Key used for per-client rate limiting.
    pub fn key(&self) -> &str {
        self.ip.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }

    /// `<scheme>://<host>` as seen by the client.
    pub fn origin(&self, headers: &HeaderMap) -> String {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        format!("{}://{}", self.scheme, host)
    }
}

/// Every address in `X-Forwarded-For`, leftmost (original client) first.
fn forwarded_chain(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// With `n` trusted hops the client is the `n`-th forwarded address counted
/// from the right; more hops than entries yields the leftmost entry.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> Option<String> {
    let peer_ip = peer.map(|addr| addr.ip().to_string());
    if trusted_hops == 0 {
        return peer_ip;
    }

    let chain = forwarded_chain(headers);
    if chain.is_empty() {
        return peer_ip;
    }

    let index = chain.len().saturating_sub(trusted_hops);
    chain.into_iter().nth(index).or(peer_ip)
}

fn scheme(headers: &HeaderMap, trusted_hops: usize) -> String {
    if trusted_hops > 0 {
        if let Some(proto) = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return proto.to_ascii_lowercase();
        }
    }
    "http".to_string()
}

/// Middleware: resolve [`ClientInfo`] once and attach it to the request.
pub async fn resolve_client(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientInfo::resolve(req.headers(), peer, state.config.trust_proxy);
    req.extensions_mut().insert(client);
    next.run(req).await
}
