//! Process-wide configuration (spec.md §4.10, "C11"): everything read once
//! from the environment at startup, mirroring `services/server`'s
//! `std::env::var` pattern rather than a config-file/clap layer. Per-device
//! overrides still come from the `tracker.config` row — this struct only
//! supplies listener addresses and process-wide defaults.

use std::env;
use std::time::Duration;

pub struct GatewayConfig {
    pub database_url: String,
    pub tcp_addr: String,
    pub ws_addr: String,
    pub http_addr: String,
    pub proxy_protocol_enabled: bool,
    pub log_filter: String,
    pub store_buf_size: usize,
    pub store_ticker: Duration,
    pub store_max_age: chrono::Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            tcp_addr: env::var("GATEWAY_TCP_ADDR").unwrap_or_else(|_| "0.0.0.0:6000".to_owned()),
            ws_addr: env::var("GATEWAY_WS_ADDR").unwrap_or_else(|_| "0.0.0.0:7000".to_owned()),
            http_addr: env::var("GATEWAY_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:3333".to_owned()),
            proxy_protocol_enabled: env_flag("GATEWAY_PROXY_PROTOCOL"),
            log_filter: env::var("GATEWAY_LOG_LEVEL").or_else(|_| env::var("RUST_LOG")).unwrap_or_else(|_| "info".to_owned()),
            store_buf_size: env_parse("GATEWAY_STORE_BUF_SIZE", 100),
            store_ticker: Duration::from_millis(env_parse("GATEWAY_STORE_TICKER_MS", 1000)),
            store_max_age: chrono::Duration::milliseconds(env_parse("GATEWAY_STORE_MAX_AGE_MS", 1000)),
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(env::var(name).as_deref(), Ok("1") | Ok("true"))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
