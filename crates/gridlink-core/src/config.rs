//! Configuration loading and validation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Gridlink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Grid dimensions shared by server and clients. Fixed for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_columns")]
    pub columns: usize,

    #[serde(default = "default_rows")]
    pub rows: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            rows: default_rows(),
        }
    }
}

fn default_columns() -> usize {
    16
}

fn default_rows() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Messages queued per subscriber before it is kicked as too slow.
    #[serde(default = "default_subscriber_message_buffer")]
    pub subscriber_message_buffer: usize,

    #[serde(default)]
    pub publish: PublishLimitConfig,

    /// Upper bound on a single write to a subscriber.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Upper bound on plain HTTP requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum accepted body for `/publish` and `/ledmap`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Directory served for any path not claimed by the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            subscriber_message_buffer: default_subscriber_message_buffer(),
            publish: PublishLimitConfig::default(),
            write_timeout_secs: default_write_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            static_dir: None,
        }
    }
}

fn default_port() -> u16 {
    55555
}

fn default_subscriber_message_buffer() -> usize {
    16
}

fn default_write_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    8192
}

/// Token-bucket limit applied to every publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishLimitConfig {
    /// One token is added every `interval_ms` (default: 100).
    #[serde(default = "default_publish_interval_ms")]
    pub interval_ms: u64,

    /// Bucket capacity (default: 8).
    #[serde(default = "default_publish_burst")]
    pub burst: u32,
}

impl Default for PublishLimitConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_publish_interval_ms(),
            burst: default_publish_burst(),
        }
    }
}

fn default_publish_interval_ms() -> u64 {
    100
}

fn default_publish_burst() -> u32 {
    8
}

/// How a client reports a local toggle to the server.
///
/// One mode per deployment; a client never mixes the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundMode {
    /// Send `setled [x, y]` and forget about it.
    SetLed,
    /// Send the entire buffer as `levelMap`.
    #[default]
    FullState,
}

impl fmt::Display for OutboundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetLed => f.write_str("set_led"),
            Self::FullState => f.write_str("full_state"),
        }
    }
}

impl FromStr for OutboundMode {
    type Err = crate::error::GridlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "set_led" | "setled" | "delta" => Ok(Self::SetLed),
            "full_state" | "levelmap" | "full" => Ok(Self::FullState),
            other => Err(crate::error::GridlinkError::Config(format!(
                "Unknown outbound mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server WebSocket URL, e.g. `ws://127.0.0.1:55555/ws`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Environment variable holding the URL, used when `url` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,

    #[serde(default)]
    pub outbound_mode: OutboundMode,

    /// Fixed delay before reconnecting after an unexpected close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "gridlink_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a value: check the direct value first, then the env-var reference.
pub fn resolve_env_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::GridlinkError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::GridlinkError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Grid dimensions as `(columns, rows)`.
    pub fn grid_dimensions(&self) -> (usize, usize) {
        let grid = self.grid.clone().unwrap_or_default();
        (grid.columns, grid.rows)
    }

    /// Gateway settings with defaults filled in.
    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    /// Gateway bind address.
    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Server URL for clients. Falls back to the local gateway.
    pub fn client_url(&self) -> String {
        self.client
            .as_ref()
            .and_then(|c| resolve_env_field(&c.url, &c.url_env))
            .unwrap_or_else(|| format!("ws://127.0.0.1:{}/ws", self.gateway_port()))
    }

    pub fn outbound_mode(&self) -> OutboundMode {
        self.client
            .as_ref()
            .map(|c| c.outbound_mode)
            .unwrap_or_default()
    }

    pub fn reconnect_delay(&self) -> Duration {
        let ms = self
            .client
            .as_ref()
            .and_then(|c| c.reconnect_delay_ms)
            .unwrap_or(1000);
        Duration::from_millis(ms)
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "grid.columns").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let (columns, rows) = self.grid_dimensions();
        if columns == 0 || rows == 0 {
            errors.push(format!("Grid dimensions must be positive, got {columns}x{rows}"));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.subscriber_message_buffer == 0 {
                errors.push("gateway.subscriber_message_buffer cannot be 0".to_string());
            }
            if gw.publish.burst == 0 {
                errors.push("gateway.publish.burst cannot be 0".to_string());
            }
            if let Some(dir) = &gw.static_dir {
                if !Path::new(dir).is_dir() {
                    warnings.push(format!("Static directory not found: {dir}"));
                }
            }
        }

        let url = self.client_url();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            errors.push(format!("Client URL must use ws:// or wss://, got {url}"));
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Gridlink data: `~/.gridlink/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gridlink")
}
