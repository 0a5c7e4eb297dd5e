use serde::{Deserialize, Serialize};

/// Authentication backend configuration.
///
/// Token verification is delegated to an external auth service; when no
/// endpoint is configured every request resolves to demo scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Endpoint returning the authenticated user for a bearer token,
    /// e.g. `https://auth.example.com/auth/v1/user`. The token is
    /// forwarded in the `Authorization` header; any non-2xx response or
    /// malformed body degrades the request to demo scope.
    #[serde(default)]
    pub user_info_url: Option<String>,

    /// Timeout for verification calls.
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
}

fn default_verify_timeout_secs() -> u64 {
    5
}
