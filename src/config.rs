//! Configuration file parser for ~/.config/storysync/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::api::DEFAULT_BASE_URL;
use crate::sync::DEFAULT_MAX_PHOTO_BYTES;

/// Environment variable that overrides `access_token`.
pub const TOKEN_ENV_VAR: &str = "STORY_API_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write config file: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `access_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the story API.
    pub api_base_url: String,

    /// Bearer token from the last `login` (alternative to STORY_API_TOKEN).
    /// Env var takes precedence over config file.
    pub access_token: Option<String>,

    /// Largest photo accepted for upload, in bytes.
    pub max_photo_bytes: usize,

    /// Per-request timeout for API calls.
    pub request_timeout_secs: u64,

    /// How often `watch` probes the API host.
    pub connectivity_check_interval_secs: u64,

    /// Timeout of a single connectivity probe.
    pub connectivity_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            max_photo_bytes: DEFAULT_MAX_PHOTO_BYTES,
            request_timeout_secs: 30,
            connectivity_check_interval_secs: 15,
            connectivity_timeout_secs: 5,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("max_photo_bytes", &self.max_photo_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field(
                "connectivity_check_interval_secs",
                &self.connectivity_check_interval_secs,
            )
            .field("connectivity_timeout_secs", &self.connectivity_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "api_base_url",
        "access_token",
        "max_photo_bytes",
        "request_timeout_secs",
        "connectivity_check_interval_secs",
        "connectivity_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_limited(path)? else {
            tracing::debug!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), api_base_url = %config.api_base_url, "Loaded configuration");
        Ok(config)
    }

    /// The bearer token to use: `STORY_API_TOKEN` first, then the file.
    pub fn access_token(&self) -> Option<SecretString> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.access_token.clone())
            .map(SecretString::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connectivity_check_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_check_interval_secs.max(1))
    }

    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_secs(self.connectivity_timeout_secs.max(1))
    }
}

/// Write `access_token` into the config file, keeping every other key.
///
/// `None` removes the token. The file is replaced atomically and, on Unix,
/// readable by the owner only.
pub fn store_access_token(path: &Path, token: Option<&str>) -> Result<(), ConfigError> {
    let mut table = match read_limited(path)? {
        Some(content) if !content.trim().is_empty() => content.parse::<toml::Table>()?,
        _ => toml::Table::new(),
    };

    match token {
        Some(token) => {
            table.insert(
                "access_token".to_string(),
                toml::Value::String(token.to_string()),
            );
        }
        None => {
            table.remove("access_token");
        }
    }

    let content = toml::to_string(&table)?;
    write_atomic(path, content.as_bytes())?;
    tracing::info!(path = %path.display(), stored = token.is_some(), "Updated access token");
    Ok(())
}

/// File contents, or `None` when the file does not exist.
fn read_limited(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > Config::MAX_FILE_SIZE => {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Config::MAX_FILE_SIZE
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Io(e)),
        Ok(_) => {}
    }

    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        // Deleted between metadata and read
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

/// Write-to-temp-then-rename so the config is never left half written.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = (|| -> std::io::Result<()> {
        let mut file = options.open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);

        #[cfg(windows)]
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

// ============================================================================
// Tests
// ============================================================================
