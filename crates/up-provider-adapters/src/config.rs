use std::str::FromStr;
use std::time::Duration;

use up_provider_core::EmptyAddressPolicy;

/// Settings for the embedded client bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub probe_timeout_ms: u64,
    pub retry_cycles: u32,
    pub retry_delay_ms: u64,
    pub resume_delay_ms: u64,
    /// Walk the ancestor chain when the first candidate does not answer.
    pub search: bool,
    /// Start discovery at construction instead of on the first request.
    pub eager_discovery: bool,
    pub empty_address_policy: EmptyAddressPolicy,
    pub rpc_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1_000,
            retry_cycles: 3,
            retry_delay_ms: 1_000,
            resume_delay_ms: 100,
            search: true,
            eager_discovery: false,
            empty_address_policy: EmptyAddressPolicy::Truncate,
            rpc_timeout_ms: 8_000,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            probe_timeout_ms: env_parse("UP_PROVIDER_PROBE_TIMEOUT_MS")
                .unwrap_or(d.probe_timeout_ms),
            retry_cycles: env_parse("UP_PROVIDER_RETRY_CYCLES").unwrap_or(d.retry_cycles),
            retry_delay_ms: env_parse("UP_PROVIDER_RETRY_DELAY_MS").unwrap_or(d.retry_delay_ms),
            resume_delay_ms: env_parse("UP_PROVIDER_RESUME_DELAY_MS").unwrap_or(d.resume_delay_ms),
            search: env_flag("UP_PROVIDER_SEARCH").unwrap_or(d.search),
            eager_discovery: env_flag("UP_PROVIDER_EAGER").unwrap_or(d.eager_discovery),
            empty_address_policy: env_parse("UP_PROVIDER_EMPTY_ADDRESS_POLICY")
                .unwrap_or(d.empty_address_policy),
            rpc_timeout_ms: env_parse("UP_PROVIDER_RPC_TIMEOUT_MS").unwrap_or(d.rpc_timeout_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Settings for the host connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// New channels start enabled and see the canonical allowed accounts.
    pub auto_enable_channels: bool,
    pub resume_delay_ms: u64,
    pub empty_address_policy: EmptyAddressPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            auto_enable_channels: true,
            resume_delay_ms: 100,
            empty_address_policy: EmptyAddressPolicy::Truncate,
        }
    }
}

impl ConnectorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            auto_enable_channels: env_flag("UP_PROVIDER_AUTO_ENABLE")
                .unwrap_or(d.auto_enable_channels),
            resume_delay_ms: env_parse("UP_PROVIDER_RESUME_DELAY_MS").unwrap_or(d.resume_delay_ms),
            empty_address_policy: env_parse("UP_PROVIDER_EMPTY_ADDRESS_POLICY")
                .unwrap_or(d.empty_address_policy),
        }
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_flag(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
