use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::{AuthInputError, resolve_api_base_url};
use crate::host::HostSignal;

pub const ENV_AUTH_MODE: &str = "NRM_AUTH_MODE";
pub const ENV_AUTH_MOCK_FALLBACK: &str = "NRM_AUTH_MOCK_FALLBACK";
pub const ENV_AUTH_POLL_INTERVAL_MS: &str = "NRM_AUTH_POLL_INTERVAL_MS";
pub const ENV_AUTH_POLL_MAX_ATTEMPTS: &str = "NRM_AUTH_POLL_MAX_ATTEMPTS";
pub const ENV_AUTH_DOM_READY_DELAY_MS: &str = "NRM_AUTH_DOM_READY_DELAY_MS";
pub const ENV_AUTH_WINDOW_LOAD_DELAY_MS: &str = "NRM_AUTH_WINDOW_LOAD_DELAY_MS";
pub const ENV_AUTH_DEV_CACHE_PATH: &str = "NRM_AUTH_DEV_CACHE_PATH";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 200;
pub const DEFAULT_DOM_READY_DELAY_MS: u64 = 500;
pub const DEFAULT_WINDOW_LOAD_DELAY_MS: u64 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Development,
    Production,
}

impl AuthMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub mock_fallback: bool,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub dom_ready_delay: Duration,
    pub window_load_delay: Duration,
    pub dev_cache_path: Option<PathBuf>,
    pub api_base_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Production,
            mock_fallback: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_poll_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            dom_ready_delay: Duration::from_millis(DEFAULT_DOM_READY_DELAY_MS),
            window_load_delay: Duration::from_millis(DEFAULT_WINDOW_LOAD_DELAY_MS),
            dev_cache_path: None,
            api_base_url: crate::auth::DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid NRM_AUTH_MODE: {0}")]
    InvalidMode(String),
    #[error("invalid NRM_AUTH_MOCK_FALLBACK: {0}")]
    InvalidMockFallback(String),
    #[error("invalid NRM_AUTH_POLL_INTERVAL_MS: {0}")]
    InvalidPollIntervalMs(String),
    #[error("invalid NRM_AUTH_POLL_MAX_ATTEMPTS: {0}")]
    InvalidPollMaxAttempts(String),
    #[error("invalid listener delay: {0}")]
    InvalidListenerDelay(String),
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("poll attempt ceiling must be greater than zero")]
    ZeroPollAttempts,
    #[error("mock credential fallback cannot be enabled in production mode")]
    MockFallbackInProduction,
    #[error("invalid NRM_API_BASE_URL: {0}")]
    InvalidApiBaseUrl(#[from] AuthInputError),
}

impl AuthConfig {
    #[must_use]
    pub fn development() -> Self {
        Self {
            mode: AuthMode::Development,
            mock_fallback: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = parse_mode(
            env::var(ENV_AUTH_MODE)
                .unwrap_or_else(|_| "production".to_string())
                .as_str(),
        )?;
        let mock_fallback = parse_bool_env(ENV_AUTH_MOCK_FALLBACK, mode == AuthMode::Development)
            .map_err(ConfigError::InvalidMockFallback)?;
        let poll_interval_ms = env::var(ENV_AUTH_POLL_INTERVAL_MS)
            .unwrap_or_else(|_| DEFAULT_POLL_INTERVAL_MS.to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidPollIntervalMs(error.to_string()))?;
        let max_poll_attempts = env::var(ENV_AUTH_POLL_MAX_ATTEMPTS)
            .unwrap_or_else(|_| DEFAULT_POLL_MAX_ATTEMPTS.to_string())
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidPollMaxAttempts(error.to_string()))?;
        let parse_delay = |key: &str, default: u64| -> Result<Duration, ConfigError> {
            env::var(key)
                .unwrap_or_else(|_| default.to_string())
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|error| ConfigError::InvalidListenerDelay(format!("{key}: {error}")))
        };
        let dom_ready_delay = parse_delay(ENV_AUTH_DOM_READY_DELAY_MS, DEFAULT_DOM_READY_DELAY_MS)?;
        let window_load_delay =
            parse_delay(ENV_AUTH_WINDOW_LOAD_DELAY_MS, DEFAULT_WINDOW_LOAD_DELAY_MS)?;
        let dev_cache_path = env::var(ENV_AUTH_DEV_CACHE_PATH)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let (api_base_url, _) = resolve_api_base_url()?;

        Self {
            mode,
            mock_fallback,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            max_poll_attempts: max_poll_attempts.max(1),
            dom_ready_delay,
            window_load_delay,
            dev_cache_path,
            api_base_url,
        }
        .validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.mode == AuthMode::Production && self.mock_fallback {
            return Err(ConfigError::MockFallbackInProduction);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.max_poll_attempts == 0 {
            return Err(ConfigError::ZeroPollAttempts);
        }
        Ok(self)
    }

    /// Clamps the poll cadence to values the handshake loop can run with.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.poll_interval.is_zero() {
            tracing::warn!("poll interval of zero raised to 1ms");
            self.poll_interval = Duration::from_millis(1);
        }
        if self.max_poll_attempts == 0 {
            tracing::warn!("poll attempt ceiling of zero raised to 1");
            self.max_poll_attempts = 1;
        }
        self
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        self.mode == AuthMode::Development
    }

    /// Mock identity is only ever handed out in development.
    #[must_use]
    pub fn allows_mock_fallback(&self) -> bool {
        self.is_development() && self.mock_fallback
    }

    #[must_use]
    pub fn handshake_budget(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts
    }

    /// How long after a host signal the handshake re-probes the host.
    #[must_use]
    pub fn listener_delay(&self, signal: HostSignal) -> Duration {
        match signal {
            HostSignal::VisibilityChanged | HostSignal::CredentialInjected => Duration::ZERO,
            HostSignal::DomReady => self.dom_ready_delay,
            HostSignal::WindowLoaded => self.window_load_delay,
        }
    }
}

fn parse_mode(raw: &str) -> Result<AuthMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "development" | "dev" => Ok(AuthMode::Development),
        "production" | "prod" => Ok(AuthMode::Production),
        other => Err(ConfigError::InvalidMode(other.to_string())),
    }
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool, String> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got {other}")),
    }
}
