use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use client_core::{
    CacheConfig, CoreConfig, MaintenanceConfig, NotifyConfig, ReconnectConfig, RepostTarget,
    RouterConfig,
};
use config::{Config, Environment, File, Source};
use serde::Deserialize;
use shared::domain::Jid;

pub const DEFAULT_CONFIG_FILE: &str = "bot.toml";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/history.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gateway_url: String,
    pub session_dir: PathBuf,
    pub database_url: String,
    /// Days of message history kept for the anti-delete relay.
    pub history_retention_days: u32,
    pub interactive_auth: bool,
    pub notify_on_connect: bool,
    pub greeting_image_url: Option<String>,
    pub bot_name: String,
    pub anti_delete: AntiDeleteSettings,
    pub cache: CacheConfig,
    pub reconnect: ReconnectConfig,
    pub maintenance: MaintenanceConfig,
    pub router: RouterConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8080".into(),
            session_dir: PathBuf::from("./session"),
            database_url: DEFAULT_DATABASE_URL.into(),
            history_retention_days: 7,
            interactive_auth: false,
            notify_on_connect: true,
            greeting_image_url: None,
            bot_name: "Bot".into(),
            anti_delete: AntiDeleteSettings::default(),
            cache: CacheConfig::default(),
            reconnect: ReconnectConfig::default(),
            maintenance: MaintenanceConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AntiDeleteSettings {
    pub enabled: bool,
    /// Re-post into the chat the message was removed from instead of to `owner`.
    pub in_chat: bool,
    pub owner: Option<String>,
}

impl Settings {
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            cache: self.cache.clone(),
            reconnect: self.reconnect.clone(),
            maintenance: self.maintenance.clone(),
            router: self.router.clone(),
            notify: NotifyConfig {
                enabled: self.notify_on_connect,
                image_url: self
                    .greeting_image_url
                    .clone()
                    .filter(|url| !url.trim().is_empty()),
                bot_name: self.bot_name.clone(),
            },
            interactive_auth: self.interactive_auth,
        }
    }

    /// `None` when the relay is disabled.
    pub fn anti_delete_target(&self) -> anyhow::Result<Option<RepostTarget>> {
        let anti_delete = &self.anti_delete;
        if !anti_delete.enabled {
            return Ok(None);
        }
        if anti_delete.in_chat {
            return Ok(Some(RepostTarget::SameChat));
        }
        match anti_delete.owner.as_deref().map(str::trim) {
            Some(owner) if !owner.is_empty() => Ok(Some(RepostTarget::Owner(owner_jid(owner)))),
            _ => bail!("anti_delete.owner is required unless anti_delete.in_chat is set"),
        }
    }

    pub fn database_url(&self) -> String {
        normalize_database_url(&self.database_url)
    }
}

/// Built-in defaults, then the config file, then `APP__*` environment variables.
/// An explicit `path` must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };
    settings_from(file, environment())
}

fn environment() -> Environment {
    Environment::with_prefix("APP")
        .separator("__")
        .try_parsing(true)
}

fn settings_from<F>(file: F, env: Environment) -> anyhow::Result<Settings>
where
    F: Source + Send + Sync + 'static,
{
    Config::builder()
        .add_source(file)
        .add_source(env)
        .build()
        .context("failed to read bot configuration")?
        .try_deserialize()
        .context("invalid bot configuration")
}

/// Bare phone numbers are completed into user jids.
fn owner_jid(owner: &str) -> Jid {
    if owner.contains('@') {
        Jid::from(owner)
    } else {
        Jid::new(format!("{owner}@s.whatsapp.net"))
    }
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return DEFAULT_DATABASE_URL.to_string();
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
