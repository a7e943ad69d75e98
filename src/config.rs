//! TOML configuration for linkbench.
//!
//! Every section has compiled-in defaults matching the reference firmware
//! sample (1024-byte packets at 10 Mbit/s for 20 s towards port 5001), so an
//! empty or missing file yields a runnable configuration.

use std::net::SocketAddrV4;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "LINKBENCH_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/linkbench/linkbench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the linkbench process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded linkbench configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `LINKBENCH_CONFIG` environment variable.
    /// 2. `/etc/linkbench/linkbench.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LINKBENCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Benchmark
// ---------------------------------------------------------------------------

/// Parameters of the single UDP upload run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// IPv4 address of the iperf2 UDP server, in dotted-quad form.
    pub peer_ipv4: String,
    /// UDP port of the iperf2 server.
    pub peer_port: u16,
    /// Datagram payload size in bytes, headers included.
    pub packet_size: u32,
    /// Target send rate in kilobits per second.
    pub rate_kbps: u32,
    /// Test duration in milliseconds.
    pub duration_ms: u64,
    /// Pause before subscribing to network events.
    pub startup_delay_ms: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            peer_ipv4: "192.168.1.100".to_string(),
            peer_port: 5001,
            packet_size: 1024,
            rate_kbps: 10_000,
            duration_ms: 20_000,
            startup_delay_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Link monitor
// ---------------------------------------------------------------------------

/// Reachability probing used to derive connected / disconnected events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// `ip:port` the route probe connects towards. No traffic is sent.
    pub probe_target: String,
    /// Interval between probes, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_target: "8.8.8.8:53".to_string(),
            poll_interval_ms: 1_000,
        }
    }
}

impl MonitorConfig {
    /// Parse `probe_target`. The route probe binds an IPv4 socket, so IPv6
    /// targets are rejected here instead of never reporting a route.
    pub fn probe_target(&self) -> Result<SocketAddrV4> {
        self.probe_target.parse().with_context(|| {
            format!(
                "invalid monitor.probe_target {:?}: expected an IPv4 ip:port",
                self.probe_target
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Indicator
// ---------------------------------------------------------------------------

/// Connection status LED.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Name of a LED under `/sys/class/leds`. When unset the state is only logged.
    pub led: Option<String>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
