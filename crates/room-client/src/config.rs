//! Session configuration.
//!
//! Configuration is loaded from environment variables or built directly.
//! The access token is sensitive and is redacted in Debug output.

use crate::errors::ConfigError;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default heartbeat interval when the join response carries no hint.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default staleness timeout when the join response carries no hint.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(60);

/// Initial reconnect backoff delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reconnect backoff ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How long a fresh connection may wait for the join response.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signaling protocol revision advertised at connect time.
pub const PROTOCOL_VERSION: u32 = 8;

/// Which SDK identity to present in the connect query string.
///
/// Servers gate protocol behavior on the advertised SDK and version, so
/// interoperability testing sometimes needs to impersonate another client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientProfile {
    #[default]
    Native,
    Go,
    Js,
}

impl ClientProfile {
    /// SDK identification pairs appended to the connect query string.
    #[must_use]
    pub fn sdk_params(self) -> [(&'static str, &'static str); 3] {
        let (sdk, version) = match self {
            ClientProfile::Native => ("native", env!("CARGO_PKG_VERSION")),
            ClientProfile::Go => ("go", "1.0.3"),
            ClientProfile::Js => ("js", "1.3.2"),
        };
        [
            ("protocol", protocol_version_str()),
            ("sdk", sdk),
            ("version", version),
        ]
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "native" => Ok(ClientProfile::Native),
            "go" => Ok(ClientProfile::Go),
            "js" => Ok(ClientProfile::Js),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown client profile: {other}"
            ))),
        }
    }
}

const fn protocol_version_str() -> &'static str {
    // Keep in sync with PROTOCOL_VERSION.
    "8"
}

/// Session configuration.
///
/// Built directly or loaded from environment variables. The token is
/// redacted in Debug output.
#[derive(Clone)]
pub struct SessionConfig {
    /// Server URL, `ws://` or `wss://`. The signaling path is appended by
    /// the connection manager.
    pub url: String,

    /// Access token presented as the `access_token` query parameter.
    /// Protected by `SecretString` to prevent accidental logging.
    pub token: SecretString,

    /// Ask the server to auto-subscribe to all published tracks.
    pub auto_subscribe: bool,

    /// SDK identity advertised to the server.
    pub profile: ClientProfile,

    /// Heartbeat interval; overridden by the join response when present.
    pub ping_interval: Duration,

    /// Staleness timeout; overridden by the join response when present.
    pub ping_timeout: Duration,

    /// Initial reconnect delay.
    pub backoff_base: Duration,

    /// Reconnect delay ceiling.
    pub backoff_max: Duration,

    /// How long to wait for the join response on a fresh connection.
    pub join_timeout: Duration,
}

/// Custom Debug implementation that redacts the token.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("auto_subscribe", &self.auto_subscribe)
            .field("profile", &self.profile)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("join_timeout", &self.join_timeout)
            .finish()
    }
}

impl SessionConfig {
    /// Build a configuration with defaults for everything but the
    /// connection endpoint and credential.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        SessionConfig {
            url: url.into(),
            token: SecretString::from(token.into()),
            auto_subscribe: true,
            profile: ClientProfile::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let url = vars
            .get("ROOM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_URL".to_string()))?
            .clone();

        let token = vars
            .get("ROOM_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_TOKEN".to_string()))?
            .clone();

        let mut config = SessionConfig::new(url, token);

        if let Some(value) = vars.get("ROOM_AUTO_SUBSCRIBE") {
            config.auto_subscribe = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("ROOM_AUTO_SUBSCRIBE: {value}")))?;
        }

        if let Some(value) = vars.get("ROOM_CLIENT_PROFILE") {
            config.profile = ClientProfile::parse(value)?;
        }

        if let Some(value) = vars.get("ROOM_PING_INTERVAL_SECONDS") {
            config.ping_interval = parse_seconds("ROOM_PING_INTERVAL_SECONDS", value)?;
        }

        if let Some(value) = vars.get("ROOM_PING_TIMEOUT_SECONDS") {
            config.ping_timeout = parse_seconds("ROOM_PING_TIMEOUT_SECONDS", value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that would otherwise surface as confusing runtime
    /// behavior.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(format!(
                "url must use ws:// or wss://: {}",
                self.url
            )));
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "ping interval must be non-zero".to_string(),
            ));
        }
        if self.ping_timeout <= self.ping_interval {
            return Err(ConfigError::InvalidValue(
                "ping timeout must exceed ping interval".to_string(),
            ));
        }
        if self.backoff_base.is_zero() || self.backoff_max < self.backoff_base {
            return Err(ConfigError::InvalidValue(
                "backoff range must satisfy 0 < base <= max".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue(format!("{name}: {value}")))
}
