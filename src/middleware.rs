//! Request middleware.
//!
//! - Request ID: a UUID v4 per request, recorded on a tracing span that
//!   wraps the whole request lifecycle.
//! - Blacklist: rejects clients listed in the operator's blacklist file.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::state::AppState;

/// Extension type for accessing request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Middleware that generates a request ID and creates a request span.
///
/// This should be the outermost middleware layer so the span wraps
/// all request processing, including other middleware and handlers.
pub async fn request_id_layer(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    let mut request = request;
    request.extensions_mut().insert(RequestId(request_id));

    async move {
        let response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}

/// Set of client IPs denied access
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    ips: HashSet<IpAddr>,
}

impl Blacklist {
    /// Load one IP per line. Blank lines and `#` comments are skipped;
    /// unparseable lines are logged and skipped.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut ips = HashSet::new();
        for line in contents.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            match line.parse() {
                Ok(ip) => {
                    ips.insert(ip);
                }
                Err(_) => tracing::warn!(entry = %line, "Ignoring invalid blacklist entry"),
            }
        }
        Self { ips }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

/// Resolve the client IP, honouring `X-Forwarded-For` only when trusted.
fn client_ip(request: &Request, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Middleware that rejects blacklisted clients with 403.
pub async fn blacklist_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.blacklist.is_empty() {
        if let Some(ip) = client_ip(&request, state.trust_proxy) {
            if state.blacklist.contains(&ip) {
                tracing::info!(client = %ip, "Rejected blacklisted client");
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }
    next.run(request).await
}
