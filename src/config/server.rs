use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Value for `Access-Control-Allow-Origin`. `*` allows any origin.
    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,

    /// Outbound HTTP client timeouts, shared by all backend calls.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allow_origin: default_cors_allow_origin(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_cors_allow_origin() -> String {
    "*".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}
