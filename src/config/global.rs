//! Global configuration.
//!
//! Loaded from an explicit path, .pollmux.yml or ~/.config/pollmux/pollmux.yml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PollmuxError;
use crate::poller::PollConfig;
use crate::registry::RegistryConfig;
use crate::session::PointerIdentifier;
use crate::session::identify::DEFAULT_POINTERS;
use crate::source::HttpSourceConfig;
use crate::source::http::{DEFAULT_BASE_URL, MAX_BATCH_LIMIT};

/// Global configuration for pollmux.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PollmuxConfig {
    /// Poll loop timing.
    pub poll: PollSection,

    /// Session lifetime and routing.
    pub sessions: SessionsSection,

    /// Remote API access.
    pub transport: TransportSection,
}

impl PollmuxConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .pollmux.yml in current directory
    /// 3. ~/.config/pollmux/pollmux.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit path takes precedence
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project config
        let project_config = PathBuf::from(super::PROJECT_CONFIG_FILE);
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from {}", super::PROJECT_CONFIG_FILE);
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", super::PROJECT_CONFIG_FILE, e);
                }
            }
        }

        // Try user config
        if let Some(user_config) = super::user_config_path() {
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| -> crate::Result<()> {
            Err(PollmuxError::Config(msg.to_string()))
        };

        if self.poll.interval_ms == 0 {
            return invalid("poll.interval-ms must be > 0");
        }
        if self.poll.cooldown_ms < self.poll.interval_ms {
            return invalid("poll.cooldown-ms must be >= poll.interval-ms");
        }
        if self.poll.fetch_timeout_ms == 0 {
            return invalid("poll.fetch-timeout-ms must be > 0");
        }
        let wait_hint_ms = self.poll.wait_hint_secs.saturating_mul(1000);
        if wait_hint_ms >= self.poll.fetch_timeout_ms {
            return invalid("poll.wait-hint-secs must be shorter than poll.fetch-timeout-ms");
        }
        if wait_hint_ms >= self.transport.request_timeout_ms {
            return invalid("poll.wait-hint-secs must be shorter than transport.request-timeout-ms");
        }
        if self.poll.batch_limit == 0 || self.poll.batch_limit > MAX_BATCH_LIMIT {
            return invalid("poll.batch-limit must be between 1 and 100");
        }
        if self.sessions.idle_timeout_ms == Some(0) {
            return invalid("sessions.idle-timeout-ms must be > 0 (use null to disable)");
        }
        if self.sessions.identify_pointers.is_empty() {
            return invalid("sessions.identify-pointers must not be empty");
        }
        Ok(())
    }

    /// Poll loop settings
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.poll.interval_ms))
            .with_cooldown(Duration::from_millis(self.poll.cooldown_ms))
            .with_wait_hint(Duration::from_secs(self.poll.wait_hint_secs))
            .with_fetch_timeout(Duration::from_millis(self.poll.fetch_timeout_ms))
            .with_skip_backlog(self.poll.skip_backlog)
    }

    /// Registry settings, including the poll loop
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(self.poll_config())
            .with_idle_timeout(self.sessions.idle_timeout_ms.map(Duration::from_millis))
    }

    /// Identifier built from the configured JSON pointers
    pub fn identifier(&self) -> PointerIdentifier {
        PointerIdentifier::new(self.sessions.identify_pointers.clone())
    }

    /// HTTP transport settings
    pub fn http_source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            base_url: self.transport.base_url.clone(),
            request_timeout: Duration::from_millis(self.transport.request_timeout_ms),
            batch_limit: self.poll.batch_limit,
        }
    }
}

/// Poll loop timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollSection {
    /// Delay between cycles in milliseconds.
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,

    /// Delay after a failed cycle in milliseconds.
    #[serde(rename = "cooldown-ms")]
    pub cooldown_ms: u64,

    /// Long-poll timeout passed to the remote API.
    #[serde(rename = "wait-hint-secs")]
    pub wait_hint_secs: u64,

    /// Upper bound on a single fetch in milliseconds.
    #[serde(rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,

    /// Discard events pending at startup.
    #[serde(rename = "skip-backlog")]
    pub skip_backlog: bool,

    /// Maximum events requested per fetch.
    #[serde(rename = "batch-limit")]
    pub batch_limit: u32,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: 1_500,
            cooldown_ms: 6_000,
            wait_hint_secs: 1,
            fetch_timeout_ms: 30_000,
            skip_backlog: true,
            batch_limit: MAX_BATCH_LIMIT,
        }
    }
}

/// Session lifetime and routing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Idle eviction timeout in milliseconds; null disables eviction.
    #[serde(rename = "idle-timeout-ms")]
    pub idle_timeout_ms: Option<u64>,

    /// JSON pointers tried in order to find an event's identifier.
    #[serde(rename = "identify-pointers")]
    pub identify_pointers: Vec<String>,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: Some(300_000), // 5 minutes
            identify_pointers: DEFAULT_POINTERS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Remote API access.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportSection {
    /// API base URL.
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable holding the API token.
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Client-side HTTP timeout in milliseconds.
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_env: "POLLMUX_TOKEN".to_string(),
            request_timeout_ms: 40_000,
        }
    }
}
