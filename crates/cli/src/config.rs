//! Server configuration: TOML file, then `LASTMILE_*` environment, then flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    Env { key: &'static str, value: String },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    pub jwt_secret: Option<String>,
    /// Identity enrichment endpoint; enrichment is off when unset.
    pub decrypt_url: Option<String>,
    /// Route vendor endpoint; the fallback planner is used when unset.
    pub route_vendor_url: Option<String>,
    pub route_vendor_key: Option<String>,
    /// Defaults to `http://localhost:<port>`.
    pub public_base_url: Option<String>,
    pub heartbeat_secs: u64,
    pub downstream_timeout_secs: u64,
    pub demo_fallback: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            jwt_secret: None,
            decrypt_url: None,
            route_vendor_url: None,
            route_vendor_key: None,
            public_base_url: None,
            heartbeat_secs: 15,
            downstream_timeout_secs: 10,
            demo_fallback: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { key, value }),
    }
}

/// Empty strings unset optional values.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, overlaid with `path` when given, overlaid with the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values found through `lookup`, keyed by `LASTMILE_*` names.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("LASTMILE_PORT") {
            self.port = parse_env("LASTMILE_PORT", v)?;
        }
        if let Some(v) = lookup("LASTMILE_JWT_SECRET") {
            self.jwt_secret = non_empty(v);
        }
        if let Some(v) = lookup("LASTMILE_DECRYPT_URL") {
            self.decrypt_url = non_empty(v);
        }
        if let Some(v) = lookup("LASTMILE_ROUTE_VENDOR_URL") {
            self.route_vendor_url = non_empty(v);
        }
        if let Some(v) = lookup("LASTMILE_ROUTE_VENDOR_KEY") {
            self.route_vendor_key = non_empty(v);
        }
        if let Some(v) = lookup("LASTMILE_PUBLIC_BASE_URL") {
            self.public_base_url = non_empty(v);
        }
        if let Some(v) = lookup("LASTMILE_HEARTBEAT_SECS") {
            self.heartbeat_secs = parse_env("LASTMILE_HEARTBEAT_SECS", v)?;
        }
        if let Some(v) = lookup("LASTMILE_DOWNSTREAM_TIMEOUT_SECS") {
            self.downstream_timeout_secs = parse_env("LASTMILE_DOWNSTREAM_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("LASTMILE_DEMO_FALLBACK") {
            self.demo_fallback = parse_bool("LASTMILE_DEMO_FALLBACK", v)?;
        }
        Ok(())
    }

    /// Check what `serve` needs. Returns the signing secret.
    pub fn validate(&self) -> Result<&str, ConfigError> {
        if self.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_secs must be at least 1".into()));
        }
        if self.downstream_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "downstream_timeout_secs must be at least 1".into(),
            ));
        }
        self.jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("jwt_secret (or LASTMILE_JWT_SECRET)"))
    }

    pub fn public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_secs(self.downstream_timeout_secs)
    }
}
