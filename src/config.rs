//! # Configuration Management
//!
//! Centralized configuration for the device protocol engine.
//!
//! This module provides structured configuration for the listening server,
//! device authentication, activity timeouts, gateway discovery and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Authentication
//! Credentials are configured at bridge level and may be overridden per device
//! (keyed by GUID). Location passwords use prefix matching by default, which is
//! what deployed firmware relies on; set `password_match = "exact"` to require
//! full equality.

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{AUTHKEY_SIZE, GUID_SIZE, LOCATION_PWD_MAXSIZE};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Current protocol version spoken by the server
pub const PROTO_VERSION: u8 = 23;

/// Oldest protocol version the server accepts
pub const PROTO_VERSION_MIN: u8 = 5;

/// Sentinel opening and closing every frame
pub const FRAME_TAG: [u8; 5] = *b"SUPLA";

/// Default bound on a single frame's payload
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 1024;

/// Software version reported in GetVersionResult
pub const SERVER_SOFT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Delay before an unattached sub-device is reported to discovery
pub const DEFAULT_DISCOVERY_DELAY: Duration = Duration::from_secs(30);

/// Main engine configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Bridge-level device credentials
    #[serde(default)]
    pub auth: AuthConfig,

    /// Bridge-level activity timeout defaults
    #[serde(default)]
    pub activity_timeout: ActivityTimeout,

    /// Gateway and sub-device behaviour
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-device overrides
    #[serde(default)]
    pub devices: Vec<DeviceOverride>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SUPLA_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(size) = std::env::var("SUPLA_MAX_FRAME_PAYLOAD") {
            if let Ok(val) = size.parse::<usize>() {
                config.server.max_frame_payload = val;
            }
        }

        if let Ok(id) = std::env::var("SUPLA_ACCESS_ID") {
            let val = id
                .parse::<i32>()
                .map_err(|e| ProtocolError::ConfigError(format!("Invalid SUPLA_ACCESS_ID: {e}")))?;
            config.auth.access_id = Some(val);
        }

        if let Ok(pwd) = std::env::var("SUPLA_LOCATION_PASSWORD") {
            config.auth.location_password = Some(pwd);
        }

        if let Ok(email) = std::env::var("SUPLA_EMAIL") {
            config.auth.email = Some(email);
        }

        if let Ok(key) = std::env::var("SUPLA_AUTH_KEY") {
            config.auth.auth_key = Some(key);
        }

        if let Ok(timeout) = std::env::var("SUPLA_ACTIVITY_TIMEOUT") {
            if let Ok(val) = timeout.parse::<u8>() {
                config.activity_timeout.timeout = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Credentials that apply to the device with this GUID
    pub fn auth_for(&self, guid: &[u8; GUID_SIZE]) -> &AuthConfig {
        self.device_override(guid)
            .and_then(|d| d.auth.as_ref())
            .unwrap_or(&self.auth)
    }

    /// Activity timeout that applies to the device with this GUID.
    /// A device-level setting takes precedence over the bridge default.
    pub fn activity_timeout_for(&self, guid: &[u8; GUID_SIZE]) -> ActivityTimeout {
        self.device_override(guid)
            .and_then(|d| d.activity_timeout)
            .unwrap_or(self.activity_timeout)
    }

    fn device_override(&self, guid: &[u8; GUID_SIZE]) -> Option<&DeviceOverride> {
        self.devices
            .iter()
            .find(|d| d.guid_bytes().map(|g| &g == guid).unwrap_or(false))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.auth.validate("bridge"));
        errors.extend(self.activity_timeout.validate("bridge"));
        errors.extend(self.gateway.validate());

        for device in &self.devices {
            errors.extend(device.validate());
        }

        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:2016")
    pub address: String,

    /// Upper bound on a single frame's declared payload
    pub max_frame_payload: usize,

    /// Maximum number of concurrent device connections
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// How long a connection may stay unregistered before it is dropped
    #[serde(with = "duration_serde", default = "default_registration_timeout")]
    pub registration_timeout: Duration,

    /// TLS material; plain TCP when absent
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:2016"),
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            max_connections: 1000,
            shutdown_timeout: Duration::from_secs(10),
            registration_timeout: default_registration_timeout(),
            tls: None,
        }
    }
}

fn default_registration_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:2016')",
                self.address
            ));
        }

        if self.max_frame_payload < 64 {
            errors.push(format!(
                "Max frame payload too small: {} bytes (minimum: 64)",
                self.max_frame_payload
            ));
        } else if self.max_frame_payload > 1024 * 1024 {
            errors.push(format!(
                "Max frame payload too large: {} bytes (maximum: 1 MB)",
                self.max_frame_payload
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.registration_timeout.as_secs() < 1 {
            errors.push("Registration timeout too short (minimum: 1s)".to_string());
        } else if self.registration_timeout.as_secs() > 600 {
            errors.push("Registration timeout too long (maximum: 600s)".to_string());
        }

        if let Some(tls) = &self.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                errors.push("TLS cert_path and key_path must both be set".to_string());
            }
        }

        errors
    }
}

/// Certificate and key locations for the TLS listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsSettings {
    pub cert_path: String,
    pub key_path: String,
    /// Generate a self-signed pair at these paths when they do not exist
    #[serde(default)]
    pub generate_self_signed: bool,
}

/// How a configured location password is compared to the offered one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordMatch {
    /// Configured password must be a byte-prefix of the offered bytes
    #[default]
    Prefix,
    /// Configured and offered passwords must be identical
    Exact,
}

/// Device credentials: a location pair and/or an e-mail pair
#[derive(Clone, Default, Deserialize, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct AuthConfig {
    pub access_id: Option<i32>,
    pub location_password: Option<String>,
    pub email: Option<String>,
    /// Hex-encoded 16-byte key
    pub auth_key: Option<String>,
    #[serde(default)]
    #[zeroize(skip)]
    pub password_match: PasswordMatch,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_id", &self.access_id)
            .field("location_password", &self.location_password.as_ref().map(|_| "***"))
            .field("email", &self.email)
            .field("auth_key", &self.auth_key.as_ref().map(|_| "***"))
            .field("password_match", &self.password_match)
            .finish()
    }
}

impl AuthConfig {
    pub fn location(access_id: i32, password: impl Into<String>) -> Self {
        Self {
            access_id: Some(access_id),
            location_password: Some(password.into()),
            email: None,
            auth_key: None,
            password_match: PasswordMatch::default(),
        }
    }

    pub fn email(email: impl Into<String>, auth_key_hex: impl Into<String>) -> Self {
        Self {
            access_id: None,
            location_password: None,
            email: Some(email.into()),
            auth_key: Some(auth_key_hex.into()),
            password_match: PasswordMatch::default(),
        }
    }

    /// Decode the configured hex auth key into raw bytes
    pub fn auth_key_bytes(&self) -> Result<Option<[u8; AUTHKEY_SIZE]>> {
        let Some(hex_key) = &self.auth_key else {
            return Ok(None);
        };
        let raw = hex::decode(hex_key.trim())
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid auth key hex: {e}")))?;
        let key: [u8; AUTHKEY_SIZE] = raw.as_slice().try_into().map_err(|_| {
            ProtocolError::ConfigError(format!(
                "Auth key must be {AUTHKEY_SIZE} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Some(key))
    }

    /// Validate credentials; `scope` names the owner in messages
    pub fn validate(&self, scope: &str) -> Vec<String> {
        let mut errors = Vec::new();

        let has_location = self.access_id.is_some() || self.location_password.is_some();
        let has_email = self.email.is_some() || self.auth_key.is_some();

        if !has_location && !has_email {
            errors.push(format!(
                "{scope}: no credentials configured (need access_id/location_password or email/auth_key)"
            ));
        }

        if has_location {
            if self.access_id.is_none() || self.location_password.is_none() {
                errors.push(format!(
                    "{scope}: access_id and location_password must be set together"
                ));
            }
            if let Some(pwd) = &self.location_password {
                if pwd.len() >= LOCATION_PWD_MAXSIZE {
                    errors.push(format!(
                        "{scope}: location password too long: {} bytes (maximum: {})",
                        pwd.len(),
                        LOCATION_PWD_MAXSIZE - 1
                    ));
                }
            }
        }

        if has_email {
            match &self.email {
                Some(email) if email.is_empty() => {
                    errors.push(format!("{scope}: email cannot be empty"))
                }
                None => errors.push(format!("{scope}: email and auth_key must be set together")),
                _ => {}
            }
            match self.auth_key_bytes() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    errors.push(format!("{scope}: email and auth_key must be set together"))
                }
                Err(e) => errors.push(format!("{scope}: {e}")),
            }
        }

        errors
    }
}

/// Negotiated liveness window in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActivityTimeout {
    pub timeout: u8,
    pub min: u8,
    pub max: u8,
}

impl Default for ActivityTimeout {
    fn default() -> Self {
        Self {
            timeout: 10,
            min: 8,
            max: 12,
        }
    }
}

impl ActivityTimeout {
    pub fn new(timeout: u8, min: u8, max: u8) -> Self {
        Self { timeout, min, max }
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.max))
    }

    pub fn validate(&self, scope: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.timeout == 0 {
            errors.push(format!("{scope}: activity timeout must be greater than 0"));
        }
        if self.min > self.timeout || self.timeout > self.max {
            errors.push(format!(
                "{scope}: activity timeout must satisfy min <= timeout <= max (got {}/{}/{})",
                self.min, self.timeout, self.max
            ));
        }
        errors
    }
}

/// Gateway and sub-device behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Settle delay before reporting an unattached sub-device
    #[serde(with = "duration_serde")]
    pub discovery_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            discovery_delay: DEFAULT_DISCOVERY_DELAY,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.discovery_delay.as_secs() > 3600 {
            errors.push("Discovery delay too long (maximum: 1 hour)".to_string());
        }
        errors
    }
}

/// Settings that apply to a single device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceOverride {
    /// Hex-encoded 16-byte GUID
    pub guid: String,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub activity_timeout: Option<ActivityTimeout>,
}

impl DeviceOverride {
    pub fn guid_bytes(&self) -> Result<[u8; GUID_SIZE]> {
        let raw = hex::decode(self.guid.trim().replace('-', ""))
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid GUID hex: {e}")))?;
        raw.as_slice().try_into().map_err(|_| {
            ProtocolError::ConfigError(format!(
                "GUID must be {GUID_SIZE} bytes, got {}",
                raw.len()
            ))
        })
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let scope = format!("device {}", self.guid);
        if let Err(e) = self.guid_bytes() {
            errors.push(format!("{scope}: {e}"));
        }
        if let Some(auth) = &self.auth {
            errors.extend(auth.validate(&scope));
        }
        if let Some(timeout) = &self.activity_timeout {
            errors.extend(timeout.validate(&scope));
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to include span events (enter/exit) in output
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("supla-server"),
            log_level: Level::INFO,
            json_format: false,
            span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
