//! Application-level configuration loading: API endpoint, push credentials and view defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::ViewOptions;

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/jam.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "JAM_SETLIST_CONFIG_PATH";
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LEDGER_PATH: &str = "jam-ledger.json";

/// Connection settings for the Pusher-protocol push service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PusherSettings {
    /// Application key.
    pub key: String,
    /// Cluster used to derive the host.
    pub cluster: String,
    /// Explicit `host[:port]`; derived from the cluster when absent.
    pub host: Option<String>,
    /// Connect with `wss://`.
    pub use_tls: bool,
}

impl Default for PusherSettings {
    fn default() -> Self {
        Self {
            key: String::new(),
            cluster: "us2".into(),
            host: None,
            use_tls: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Base URL of the REST API, including `/api`.
    pub api_base_url: String,
    /// Bound on every remote call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Push service settings.
    pub pusher: PusherSettings,
    /// Where the vote ledger is stored.
    pub ledger_path: PathBuf,
    /// Initial display options.
    pub view: ViewOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            pusher: PusherSettings::default(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            view: ViewOptions::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, then apply environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        api = %config.api_base_url,
                        "loaded client config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.with_env_overrides(|name| env::var(name).ok())
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Bound applied to each remote call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if let Some(url) = lookup("JAM_API_URL") {
            self.api_base_url = url;
        }
        if let Some(key) = lookup("PUSHER_KEY") {
            self.pusher.key = key;
        }
        if let Some(cluster) = lookup("PUSHER_CLUSTER") {
            self.pusher.cluster = cluster;
        }
        if let Some(host) = lookup("PUSHER_HOST") {
            self.pusher.host = Some(host);
        }
        if let Some(path) = lookup("JAM_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(path);
        }
        self
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
