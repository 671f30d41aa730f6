// Configuration
// Two layers: runtime-mutable plugin settings persisted through the host's
// key/value preference store, and process-level server configuration read
// from the environment.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::GateError;

pub const SETTING_APP_ID: &str = "app_id";
pub const SETTING_APP_SECRET: &str = "app_secret";
pub const SETTING_REQUIRE_VERIFIED: &str = "require_verified";
pub const SETTING_HIDE_STANDARD_FORMS: &str = "hide_standard_forms";

/// Persisted key/value settings surface owned by the host.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-memory settings store for tests and the demo server.
#[derive(Default)]
pub struct InMemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for InMemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .ok()
            .and_then(|v| v.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// Admin-managed plugin settings.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// Provider application id
    pub app_id: String,

    /// Provider application secret
    pub app_secret: String,

    /// Refuse identities the provider has not verified (default on; only
    /// disabled for testing)
    pub require_verified: bool,

    /// Hide the host's username/password form once social login works
    pub hide_standard_forms: bool,
}

impl PluginSettings {
    pub fn load(store: &dyn SettingsStore) -> Self {
        Self {
            app_id: store.get(SETTING_APP_ID).unwrap_or_default(),
            app_secret: store.get(SETTING_APP_SECRET).unwrap_or_default(),
            require_verified: store
                .get(SETTING_REQUIRE_VERIFIED)
                .map(|v| v == "1")
                .unwrap_or(true),
            hide_standard_forms: store
                .get(SETTING_HIDE_STANDARD_FORMS)
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }

    pub fn save(&self, store: &dyn SettingsStore) {
        store.set(SETTING_APP_ID, &self.app_id);
        store.set(SETTING_APP_SECRET, &self.app_secret);
        store.set(
            SETTING_REQUIRE_VERIFIED,
            if self.require_verified { "1" } else { "0" },
        );
        store.set(
            SETTING_HIDE_STANDARD_FORMS,
            if self.hide_standard_forms { "1" } else { "0" },
        );
    }

    /// The login flow is only offered once both credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }
}

/// Host-wide account policy, owned by the host application.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    /// Whether visitors may self-register at all
    pub registration_enabled: bool,

    /// Whether new accounts need administrator approval before first login
    pub require_admin_approval: bool,

    /// Username column width in the host's user table
    pub max_username_len: usize,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self {
            registration_enabled: true,
            require_admin_approval: true,
            max_username_len: 32,
        }
    }
}

/// Process configuration for the demo server.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Public base URL used to build the provider redirect URI
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            base_url: "http://localhost:4000".to_string(),
        }
    }
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("TREEGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("TREEGATE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4000),
            base_url: std::env::var("TREEGATE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:4000".to_string()),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), GateError> {
        url::Url::parse(&self.base_url).map_err(|e| GateError::InvalidConfig {
            key: "base_url".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}
