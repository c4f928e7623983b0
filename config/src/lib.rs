//! Configuration for the parley server.
//!
//! Read from `--config <path>` or `<config dir>/parley/config.toml`. A missing
//! default file means all defaults; a missing explicit file is an error.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_lsp::ServerOptions;
use parley_lsp::codec::DEFAULT_MAX_FRAME_BYTES;
use parley_lsp::server::DEFAULT_REQUEST_TIMEOUT;
use parley_types::{PositionEncoding, ServerInfo, TextDocumentSyncKind};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub transport: TransportConfig,
    pub log: LogConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Reported to the client as `serverInfo`.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    Full,
    #[default]
    Incremental,
}

impl From<ChangeMode> for TextDocumentSyncKind {
    fn from(mode: ChangeMode) -> Self {
        match mode {
            ChangeMode::Full => TextDocumentSyncKind::Full,
            ChangeMode::Incremental => TextDocumentSyncKind::Incremental,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub change: ChangeMode,
    /// Most preferred first. Empty means UTF-16 only.
    pub position_encodings: Vec<PositionEncoding>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransportConfig {
    pub max_frame_bytes: Option<usize>,
    /// Timeout for requests the server sends to the client.
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `parley_lsp=debug,info`.
    pub filter: Option<String>,
    /// Log file path; `${VAR}` references are expanded. Unset logs to stderr.
    pub file: Option<String>,
}

impl LogConfig {
    #[must_use]
    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        let raw = self.file.as_deref()?;
        let expanded = expand_env_vars(raw);
        (!expanded.trim().is_empty()).then(|| PathBuf::from(expanded))
    }
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
/// An unterminated `${` is kept verbatim.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl ParleyConfig {
    /// Load from `explicit`, or from the default location when `None`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match Self::from_toml_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Engine options derived from this config.
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        let position_encodings = if self.sync.position_encodings.is_empty() {
            vec![PositionEncoding::Utf16]
        } else {
            self.sync.position_encodings.clone()
        };

        ServerOptions {
            server_info: Some(ServerInfo {
                name: self
                    .server
                    .name
                    .clone()
                    .unwrap_or_else(|| "parley".to_string()),
                version: self
                    .server
                    .version
                    .clone()
                    .or_else(|| Some(env!("CARGO_PKG_VERSION").to_string())),
            }),
            sync_kind: self.sync.change.into(),
            position_encodings,
            max_frame_bytes: self
                .transport
                .max_frame_bytes
                .unwrap_or(DEFAULT_MAX_FRAME_BYTES),
            request_timeout: self
                .transport
                .request_timeout_secs
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("parley").join("config.toml"))
}
