//! Request tracing and admin authentication middleware.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Request and response header carrying the trace ID.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Actor name recorded for requests made with the admin token.
pub const ADMIN_ACTOR: &str = "admin";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// Truncated to MAX_TRACE_ID_LEN characters with non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        // Limit by character count, not bytes, to stay on UTF-8 boundaries.
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an authenticated admin request, used for audit entries.
#[derive(Clone, Debug)]
pub struct AdminIdentity {
    pub actor: String,
    pub user_agent: Option<String>,
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// SHA-256 hex digest of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compare two equal-length strings without early exit.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Attach a trace ID to every request, run it inside a span carrying it and
/// echo the ID back in the `x-trace-id` response header.
pub async fn trace_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);
    let header = HeaderValue::from_str(trace_id.as_str()).ok();
    req.extensions_mut().insert(trace_id);

    let mut response = next.run(req).instrument(span).await;
    if let Some(header) = header {
        response.headers_mut().insert(TRACE_ID_HEADER, header);
    }
    response
}

/// Reject requests that don't carry the admin bearer token.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = extract_bearer_token(&req) else {
        return Err(ApiError::Unauthorized(
            "admin bearer token required".to_string(),
        ));
    };

    if !constant_time_eq(&hash_token(token), &state.config.admin.normalized_hash()) {
        tracing::warn!("Rejected request with invalid admin token");
        return Err(ApiError::Unauthorized("invalid admin token".to_string()));
    }

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    req.extensions_mut().insert(AdminIdentity {
        actor: ADMIN_ACTOR.to_string(),
        user_agent,
    });

    Ok(next.run(req).await)
}
