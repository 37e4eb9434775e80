use cognigy_client::{Credentials, HandshakeMode, SessionConfig};
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// When and how often a dropped session is replaced by a fresh one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_millis(1000),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt may follow the `attempt`-th failed one.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<SecretString>,
    pub user: Option<String>,
    pub api_key: Option<SecretString>,
    pub channel: Option<String>,
    pub flow: String,
    pub language: String,
    pub version: Option<u32>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub passthrough_ip: Option<String>,
    pub reset_state: bool,
    pub reset_context: bool,
    pub expires_in: Option<Duration>,
    pub single_phase: bool,
    pub reconnect: ReconnectPolicy,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let endpoint = non_empty_var("COGNIGY_ENDPOINT")
            .ok_or_else(|| ConfigError::MissingVar("COGNIGY_ENDPOINT".to_string()))?;

        let token = non_empty_var("COGNIGY_TOKEN").map(SecretString::from);
        let user = non_empty_var("COGNIGY_USER");
        let api_key = non_empty_var("COGNIGY_API_KEY").map(SecretString::from);
        let channel = non_empty_var("COGNIGY_CHANNEL");
        if token.is_none() && (user.is_none() || api_key.is_none() || channel.is_none()) {
            return Err(ConfigError::MissingVar(
                "COGNIGY_TOKEN, or all of COGNIGY_USER, COGNIGY_API_KEY and COGNIGY_CHANNEL"
                    .to_string(),
            ));
        }

        let flow = non_empty_var("COGNIGY_FLOW")
            .ok_or_else(|| ConfigError::MissingVar("COGNIGY_FLOW".to_string()))?;
        let language = non_empty_var("COGNIGY_LANGUAGE").unwrap_or_else(|| "en-US".to_string());
        let version = parse_var::<u32>("COGNIGY_VERSION")?;

        let expires_in = parse_var::<u64>("COGNIGY_EXPIRES_IN_SECS")?.map(Duration::from_secs);

        let mut reconnect = ReconnectPolicy {
            enabled: parse_flag("COGNIGY_RECONNECT")?,
            max_attempts: parse_var::<u32>("COGNIGY_RECONNECT_MAX_ATTEMPTS")?,
            ..ReconnectPolicy::default()
        };
        if let Some(ms) = parse_var::<u64>("COGNIGY_RECONNECT_INTERVAL_MS")? {
            reconnect.interval = Duration::from_millis(ms);
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            endpoint,
            token,
            user,
            api_key,
            channel,
            flow,
            language,
            version,
            user_id: non_empty_var("COGNIGY_USER_ID"),
            session_id: non_empty_var("COGNIGY_SESSION_ID"),
            passthrough_ip: non_empty_var("COGNIGY_PASSTHROUGH_IP"),
            reset_state: parse_flag("COGNIGY_RESET_STATE")?,
            reset_context: parse_flag("COGNIGY_RESET_CONTEXT")?,
            expires_in,
            single_phase: parse_flag("COGNIGY_SINGLE_PHASE")?,
            reconnect,
            log_level,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            user: self.user.clone(),
            api_key: self.api_key.clone(),
            channel: self.channel.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.endpoint).with_flow(&self.flow, &self.language);
        config.version = self.version;
        config.user_id = self.user_id.clone();
        config.session_id = self.session_id.clone();
        config.passthrough_ip = self.passthrough_ip.clone();
        config.reset_state = self.reset_state;
        config.reset_context = self.reset_context;
        config.expires_in = self.expires_in;
        if self.single_phase {
            config.handshake = HandshakeMode::SinglePhase;
        }
        config
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty_var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
        })
        .transpose()
}

fn parse_flag(name: &str) -> Result<bool, ConfigError> {
    match non_empty_var(name).map(|raw| raw.to_lowercase()) {
        None => Ok(false),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a boolean", raw),
            )),
        },
    }
}
