//! Identity resolution.
//!
//! Classifies a request as an authenticated user or an anonymous
//! device-scoped demo principal. Resolution never fails: a missing,
//! malformed or expired token silently degrades to demo scope so
//! unauthenticated use stays possible.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use uuid::Uuid;

use crate::models::RequestIdentity;

pub const DEVICE_FINGERPRINT_HEADER: &str = "x-device-fingerprint";

/// Verifies bearer tokens against the auth backend.
///
/// Returns the user id for a valid token and `None` for anything else;
/// verification problems are not request errors.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Uuid>;
}

/// Verifier backed by the auth service's user-info endpoint.
pub struct HttpAuthVerifier {
    http: reqwest::Client,
    user_info_url: String,
    timeout: Duration,
}

impl HttpAuthVerifier {
    pub fn new(http: reqwest::Client, user_info_url: String, timeout: Duration) -> Self {
        Self {
            http,
            user_info_url,
            timeout,
        }
    }
}

#[async_trait]
impl AuthVerifier for HttpAuthVerifier {
    async fn verify(&self, token: &str) -> Option<Uuid> {
        let response = self
            .http
            .get(&self.user_info_url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = %r.status(), "token verification rejected");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "token verification request failed");
                return None;
            }
        };

        let body: serde_json::Value = response.json().await.ok()?;
        let id = body.get("id")?.as_str()?;
        Uuid::parse_str(id).ok()
    }
}

/// Verifier used when no auth backend is configured: every request
/// resolves to demo scope.
pub struct DisabledAuthVerifier;

#[async_trait]
impl AuthVerifier for DisabledAuthVerifier {
    async fn verify(&self, _token: &str) -> Option<Uuid> {
        None
    }
}

/// Strip a client-supplied fingerprint down to a safe identifier.
pub fn sanitize_fingerprint(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
        .take(120)
        .collect()
}

/// Fingerprint for clients that did not send one: derived from the
/// forwarded IP when present, otherwise a fresh opaque id.
fn fallback_fingerprint(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("cf-connecting-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let ip = forwarded.split(',').next().unwrap_or("").trim();
    if !ip.is_empty() {
        sanitize_fingerprint(&format!("ip_{ip}"))
    } else {
        sanitize_fingerprint(&format!("anon_{}", Uuid::new_v4()))
    }
}

/// Resolve the billable identity for a request.
pub async fn resolve_identity(headers: &HeaderMap, verifier: &dyn AuthVerifier) -> RequestIdentity {
    let header_fingerprint = headers
        .get(DEVICE_FINGERPRINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(sanitize_fingerprint)
        .filter(|fp| !fp.is_empty());

    let device_fingerprint =
        header_fingerprint.unwrap_or_else(|| fallback_fingerprint(headers));

    let token = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = token
        && let Some(user_id) = verifier.verify(token).await
    {
        return RequestIdentity::user(user_id, device_fingerprint);
    }

    RequestIdentity::demo(device_fingerprint)
}

#[cfg(test)]
pub(crate) struct StaticAuthVerifier {
    pub token: String,
    pub user_id: Uuid,
}

#[cfg(test)]
#[async_trait]
impl AuthVerifier for StaticAuthVerifier {
    async fn verify(&self, token: &str) -> Option<Uuid> {
        (token == self.token).then_some(self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use http::header::AUTHORIZATION;

    use super::*;

    #[test]
    fn sanitize_strips_unsafe_characters_and_truncates() {
        assert_eq!(sanitize_fingerprint("abc.DEF_1:2-3"), "abc.DEF_1:2-3");
        assert_eq!(sanitize_fingerprint("a b/c<script>"), "abcscript");
        let long = "x".repeat(200);
        assert_eq!(sanitize_fingerprint(&long).len(), 120);
    }

    #[tokio::test]
    async fn valid_token_resolves_to_user_scope() {
        let user_id = Uuid::new_v4();
        let verifier = StaticAuthVerifier {
            token: "good-token".into(),
            user_id,
        };
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer good-token".parse().unwrap());
        headers.insert(DEVICE_FINGERPRINT_HEADER, "device-1".parse().unwrap());

        let identity = resolve_identity(&headers, &verifier).await;
        assert_eq!(identity.user_id(), Some(user_id));
        assert_eq!(identity.scope_key, format!("user:{user_id}"));
        assert_eq!(identity.device_fingerprint, "device-1");
    }

    #[tokio::test]
    async fn bad_token_degrades_to_demo_scope() {
        let verifier = StaticAuthVerifier {
            token: "good-token".into(),
            user_id: Uuid::new_v4(),
        };
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer expired".parse().unwrap());
        headers.insert(DEVICE_FINGERPRINT_HEADER, "device-1".parse().unwrap());

        let identity = resolve_identity(&headers, &verifier).await;
        assert!(identity.is_demo());
        assert_eq!(identity.scope_key, "demo:device-1");
    }

    #[tokio::test]
    async fn missing_fingerprint_falls_back_to_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        let identity = resolve_identity(&headers, &DisabledAuthVerifier).await;
        assert_eq!(identity.scope_key, "demo:ip_203.0.113.9");
    }

    #[tokio::test]
    async fn bare_request_still_gets_an_identity() {
        let headers = HeaderMap::new();
        let identity = resolve_identity(&headers, &DisabledAuthVerifier).await;
        assert!(identity.is_demo());
        assert!(identity.device_fingerprint.starts_with("anon_"));
    }
}
