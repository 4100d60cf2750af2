// Gateway configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Everything here is read once at startup.

use std::{net::SocketAddr, time::Duration};

const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_INTERNAL_PORT: u16 = 8081;
const DEFAULT_PROCESSOR_URL: &str = "http://orchestrator-py:8000";
const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 30_000;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Core gateway configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Client-facing listener serving `/ws/connect`.
    pub public_addr: SocketAddr,
    /// Processor-facing listener serving `/internal/send-message`.
    pub internal_addr: SocketAddr,
    /// Base URL of the downstream processor, without trailing slash.
    pub processor_url: String,
    /// Upper bound on a single forwarded call to the processor.
    pub forward_timeout: Duration,
    /// Log filter directive (e.g. `info`, `switchboard_gateway=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SWITCHBOARD_PUBLIC_HOST` | `0.0.0.0` |
    /// | `SWITCHBOARD_PUBLIC_PORT` | `8080` |
    /// | `SWITCHBOARD_INTERNAL_HOST` | `0.0.0.0` |
    /// | `SWITCHBOARD_INTERNAL_PORT` | `8081` |
    /// | `SWITCHBOARD_PROCESSOR_URL` | `http://orchestrator-py:8000` |
    /// | `SWITCHBOARD_FORWARD_TIMEOUT_MS` | `30000` |
    /// | `SWITCHBOARD_LOG_FILTER` | `info` |
    /// | `SWITCHBOARD_LOG_FORMAT` | `text` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let public_addr = listen_addr(
            &env,
            "SWITCHBOARD_PUBLIC_HOST",
            "SWITCHBOARD_PUBLIC_PORT",
            DEFAULT_PUBLIC_PORT,
        );
        let internal_addr = listen_addr(
            &env,
            "SWITCHBOARD_INTERNAL_HOST",
            "SWITCHBOARD_INTERNAL_PORT",
            DEFAULT_INTERNAL_PORT,
        );

        let processor_url = env("SWITCHBOARD_PROCESSOR_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_PROCESSOR_URL.into());

        let forward_timeout_ms = env("SWITCHBOARD_FORWARD_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS);

        let log_filter = env("SWITCHBOARD_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = env("SWITCHBOARD_LOG_FORMAT")
            .map(|raw| LogFormat::parse(&raw))
            .unwrap_or(LogFormat::Text);

        Self {
            public_addr,
            internal_addr,
            processor_url,
            forward_timeout: Duration::from_millis(forward_timeout_ms),
            log_filter,
            log_format,
        }
    }

    /// Full URL of the processor endpoint that receives forwarded messages.
    pub fn process_endpoint(&self) -> String {
        format!("{}{}", self.processor_url, switchboard_common::protocol::PROCESS_PATH)
    }
}

fn listen_addr<F>(env: &F, host_key: &str, port_key: &str, default_port: u16) -> SocketAddr
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let host = env(host_key).unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = env(port_key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_port);
    format!("{host}:{port}").parse().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)))
}
