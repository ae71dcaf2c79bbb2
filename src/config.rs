//! Configuration types for the viewer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Viewer configuration: which server to talk to and which stream to pull
///
/// Owned by the host panel; the controller receives it as input and never
/// persists it. Both fields must be non-empty before a connection attempt
/// is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Media server base address (e.g. `http://localhost:1984`)
    #[serde(default)]
    pub url: String,

    /// Stream identifier on the server (e.g. `cam1`)
    #[serde(default)]
    pub stream: String,
}

impl ViewerConfig {
    /// Create a configuration from a server address and stream name
    pub fn new(url: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: stream.into(),
        }
    }

    /// Check whether both fields are set
    ///
    /// An incomplete configuration is not an error: the controller simply
    /// waits in `WaitingForConfig` until both fields are filled in.
    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.stream.is_empty()
    }

    /// Server base address with a single trailing `/` stripped
    pub fn normalized_url(&self) -> &str {
        self.url.strip_suffix('/').unwrap_or(&self.url)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if either field is empty or the server address does
    /// not use an HTTP scheme.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.is_complete() {
            return Err(Error::InvalidConfig(
                "server url and stream name are required".to_string(),
            ));
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "url must start with http:// or https://, got {}",
                self.url
            )));
        }

        Ok(())
    }
}

/// Tunable timings for the connection lifecycle
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    /// Delay before an automatic reconnect attempt (default: 2s)
    pub retry_delay: Duration,

    /// Interval between latency samples (default: 500ms)
    pub sample_interval: Duration,

    /// Playback drift above which a hard seek-forward is forced, in
    /// seconds of buffered media (default: 0.5)
    pub max_drift_secs: f64,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            sample_interval: Duration::from_millis(500),
            max_drift_secs: 0.5,
        }
    }
}

/// Persistence seam for the host's settings panel
///
/// `load` may return a partially filled (or default) configuration; the
/// controller treats anything incomplete as a waiting state.
pub trait ConfigStore: Send + Sync {
    /// Load the stored configuration, or a default one if none exists
    fn load(&self) -> crate::Result<ViewerConfig>;

    /// Persist the configuration
    fn save(&self, config: &ViewerConfig) -> crate::Result<()>;
}

/// JSON file-backed configuration store
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> crate::Result<ViewerConfig> {
        if !self.path.exists() {
            return Ok(ViewerConfig::default());
        }

        let data = std::fs::read_to_string(&self.path)?;
        let config = serde_json::from_str(&data)
            .map_err(|e| crate::Error::InvalidConfig(format!("malformed config file: {}", e)))?;

        Ok(config)
    }

    fn save(&self, config: &ViewerConfig) -> crate::Result<()> {
        let data = serde_json::to_string_pretty(config)
            .map_err(|e| crate::Error::InvalidConfig(format!("unserializable config: {}", e)))?;

        std::fs::write(&self.path, data)?;

        Ok(())
    }
}
