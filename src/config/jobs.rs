use serde::{Deserialize, Serialize};

/// Background job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// How often the reservation sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Age after which a pending reservation is considered abandoned
    /// and rolled back.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    /// Maximum entries rolled back per sweep.
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            sweep_batch: default_sweep_batch(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_reservation_ttl_secs() -> u64 {
    900
}

fn default_sweep_batch() -> u32 {
    100
}
