//! Engine configuration
//!
//! Layered the usual way: compiled defaults, then an optional `gigpay.toml`,
//! then `GIGPAY__`-prefixed environment variables (e.g.
//! `GIGPAY__GATEWAY__SERVER_KEY`).

use crate::{gateway::GatewayConfig, EngineResult};
use serde::Deserialize;

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
}

/// Platform fee settings
#[derive(Debug, Clone, Deserialize)]
pub struct FeeSettings {
    /// Fee in basis points of the gross amount
    pub platform_fee_bps: u32,
}

/// Top-level settings for the engine and its HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub fees: FeeSettings,
    pub gateway: GatewayConfig,
}

impl Settings {
    pub fn load() -> EngineResult<Self> {
        let defaults = GatewayConfig::default();

        let cfg = config::Config::builder()
            .set_default("server.bind_addr", "0.0.0.0:8080")?
            .set_default("fees.platform_fee_bps", 1_000i64)?
            .set_default("gateway.base_url", defaults.base_url)?
            .set_default("gateway.server_key", defaults.server_key)?
            .set_default(
                "gateway.request_timeout_secs",
                defaults.request_timeout_secs as i64,
            )?
            .set_default("gateway.max_retries", defaults.max_retries as i64)?
            .set_default("gateway.retry_backoff_ms", defaults.retry_backoff_ms as i64)?
            .set_default("gateway.token_ttl_secs", defaults.token_ttl_secs)?
            .add_source(config::File::with_name("gigpay").required(false))
            .add_source(
                config::Environment::with_prefix("GIGPAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
