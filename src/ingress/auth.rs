//! Bearer-token gate for operator routes.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::AppState;

/// Operator credential. Only its digest is held.
#[derive(Clone)]
pub struct OperatorToken(Vec<u8>);

impl OperatorToken {
    pub fn new(token: &str) -> Self { Self(Sha256::digest(token.as_bytes()).to_vec()) }

    /// Compares digests without short-circuiting.
    pub fn matches(&self, presented: &str) -> bool {
        let presented = Sha256::digest(presented.as_bytes());
        self.0.iter().zip(presented.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

impl std::fmt::Debug for OperatorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("OperatorToken([REDACTED])") }
}

/// With no token configured every operator request is refused.
pub(super) async fn require_operator(State(s): State<AppState>, request: Request, next: Next) -> Response {
    let authorized = match (&s.operator_token, bearer(&request)) {
        (Some(expected), Some(presented)) => expected.matches(presented),
        _ => false,
    };
    if !authorized {
        warn!(method = %request.method(), path = %request.uri().path(), "operator request rejected");
        return (StatusCode::UNAUTHORIZED, "operator credentials required").into_response();
    }
    next.run(request).await
}

fn bearer(request: &Request) -> Option<&str> {
    let header = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    Some(header.strip_prefix("Bearer ").unwrap_or(header).trim()).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_token_matches_only_itself() {
        let token = OperatorToken::new("op-secret");
        assert!(token.matches("op-secret"));
        assert!(!token.matches("op-secre"));
        assert!(!token.matches(""));
        assert!(!format!("{:?}", token).contains("op-secret"));
    }

    #[test]
    fn test_bearer_prefix_is_optional() {
        let with = Request::builder().header(AUTHORIZATION, "Bearer abc").body(Body::empty()).unwrap();
        assert_eq!(bearer(&with), Some("abc"));
        let raw = Request::builder().header(AUTHORIZATION, "abc").body(Body::empty()).unwrap();
        assert_eq!(bearer(&raw), Some("abc"));
        let empty = Request::builder().header(AUTHORIZATION, "Bearer ").body(Body::empty()).unwrap();
        assert_eq!(bearer(&empty), None);
        assert_eq!(bearer(&Request::builder().body(Body::empty()).unwrap()), None);
    }
}
