use serde::Deserialize;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use url::Url;

use crate::transport::RECONNECT_DELAY;

/// Upload limit enforced by the dashboard server.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub transport: TransportSettings,
    pub terminal: TerminalConfig,
    pub upload: UploadConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP(S) base of the dashboard. WebSocket endpoints are derived from it.
    pub base_url: String,
    /// Command to run to get the access token (e.g., "pass show relaydeck").
    /// The command is run via `sh -c`.
    pub token_cmd: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token_cmd: None,
        }
    }
}

impl ServerConfig {
    /// Resolve the token from token_cmd or RELAYDECK_TOKEN env var.
    pub fn resolve_token(&self) -> io::Result<String> {
        if let Some(cmd) = &self.token_cmd {
            let output = Command::new("sh").arg("-c").arg(cmd).output()?;

            if output.status.success() {
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !token.is_empty() {
                    return Ok(token);
                }
            }
        }

        std::env::var("RELAYDECK_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "RELAYDECK_TOKEN not set and no token_cmd configured",
                )
            })
    }

    pub fn http_base(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.base_url)
    }

    /// The HTTP base with its scheme swapped to `ws`/`wss`.
    pub fn ws_base(&self) -> Result<Url, url::ParseError> {
        let http = self.http_base()?;
        let scheme = if http.scheme() == "https" { "wss" } else { "ws" };
        let rest = &http.as_str()[http.scheme().len()..];
        Url::parse(&format!("{scheme}{rest}"))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportSettings {
    /// Delay before reconnecting a lost transport. Values below the
    /// built-in delay are raised to it.
    pub reconnect_delay_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
        }
    }
}

impl TransportSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms).max(RECONNECT_DELAY)
    }
}

/// Which shell endpoint this deployment talks to.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShellVariant {
    /// Full PTY over `/api/pty/ws`: raw bytes plus JSON resize frames.
    #[default]
    Pty,
    /// Simple command runner over `/api/terminal/ws`: JSON only.
    Runner,
}

impl ShellVariant {
    pub fn path(self) -> &'static str {
        match self {
            ShellVariant::Pty => "api/pty/ws",
            ShellVariant::Runner => "api/terminal/ws",
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    pub variant: ShellVariant,
    /// Resize refits after mount, in milliseconds.
    pub resize_retry_ms: Vec<u64>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            variant: ShellVariant::Pty,
            resize_retry_ms: vec![100, 500, 1500],
        }
    }
}

impl TerminalConfig {
    pub fn resize_retries(&self) -> Vec<Duration> {
        self.resize_retry_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive. Overridden by RELAYDECK_LOG.
    pub filter: String,
    /// Append logs here instead of stderr.
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("warning: failed to parse {}: {e}", path.display());
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }
}

pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("relaydeck").join("config.toml")
}
