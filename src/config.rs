//! Relay configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty or
//! missing file yields a working relay.

use crate::error::{HandoffError, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Path segment that precedes the transfer id in delivery locators.
pub const DEFAULT_ROUTE_PREFIX: &str = "stream-download";

/// Content type used when a registration does not carry one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Buffered notifications per subscriber before the slowest one lags.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7878";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandoffConfig {
    pub route_prefix: String,
    pub default_content_type: String,
    pub notification_capacity: usize,
    pub listen: SocketAddr,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            listen: SocketAddr::from(([127, 0, 0, 1], 7878)),
        }
    }
}

impl HandoffConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| HandoffError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| HandoffError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load config if a path is given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.route_prefix.is_empty() || self.route_prefix.contains('/') {
            return Err(HandoffError::Config(format!(
                "route_prefix must be a single non-empty path segment, got {:?}",
                self.route_prefix
            )));
        }
        if self.notification_capacity == 0 {
            return Err(HandoffError::Config(
                "notification_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
