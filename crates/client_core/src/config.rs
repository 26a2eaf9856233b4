use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DomainConfig {
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub capacity: usize,
}

impl DomainConfig {
    pub const fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            capacity,
        }
    }
}

/// Each domain may override `ttl`, `capacity`, or both; omitted keys keep that
/// domain's own default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "CacheOverrides")]
pub struct CacheConfig {
    pub messages: DomainConfig,
    pub users: DomainConfig,
    pub groups: DomainConfig,
    pub media: DomainConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheOverrides {
    messages: DomainOverride,
    users: DomainOverride,
    groups: DomainOverride,
    media: DomainOverride,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomainOverride {
    ttl: Option<u64>,
    capacity: Option<usize>,
}

impl DomainOverride {
    fn apply(self, base: DomainConfig) -> DomainConfig {
        DomainConfig {
            ttl: self.ttl.map_or(base.ttl, Duration::from_secs),
            capacity: self.capacity.unwrap_or(base.capacity),
        }
    }
}

impl From<CacheOverrides> for CacheConfig {
    fn from(overrides: CacheOverrides) -> Self {
        let defaults = CacheConfig::default();
        Self {
            messages: overrides.messages.apply(defaults.messages),
            users: overrides.users.apply(defaults.users),
            groups: overrides.groups.apply(defaults.groups),
            media: overrides.media.apply(defaults.media),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            messages: DomainConfig::new(60, 10_000),
            users: DomainConfig::new(600, 5_000),
            groups: DomainConfig::new(300, 1_000),
            media: DomainConfig::new(300, 500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed,
    /// Doubling delay capped at `max_secs`, with up to 20% random jitter.
    Exponential { max_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    #[serde(with = "duration_secs")]
    pub startup_retry_delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            startup_retry_delay: Duration::from_secs(10),
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the next attempt, given the attempt counter after the failure.
    pub fn delay_for(&self, base: Duration, attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential { max_secs } => {
                let exponent = attempts.saturating_sub(1).min(16);
                let scaled = base.saturating_mul(1u32 << exponent);
                let capped = scaled.min(Duration::from_secs(max_secs).max(base));
                let jitter_ms = (capped.as_millis() as u64) / 5;
                if jitter_ms == 0 {
                    return capped;
                }
                capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    #[serde(with = "duration_secs")]
    pub group_refresh_interval: Duration,
    #[serde(with = "duration_secs")]
    pub stats_interval: Duration,
    #[serde(with = "duration_secs")]
    pub memory_check_interval: Duration,
    pub memory_threshold_mb: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            group_refresh_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(300),
            memory_check_interval: Duration::from_secs(120),
            memory_threshold_mb: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    #[serde(with = "duration_secs")]
    pub handler_timeout: Duration,
    pub event_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub image_url: Option<String>,
    pub bot_name: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image_url: None,
            bot_name: "Bot".to_string(),
        }
    }
}

/// Everything the connection layer needs, in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache: CacheConfig,
    pub reconnect: ReconnectConfig,
    pub maintenance: MaintenanceConfig,
    pub router: RouterConfig,
    pub notify: NotifyConfig,
    /// Missing credentials start a fresh interactive login instead of failing.
    pub interactive_auth: bool,
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
