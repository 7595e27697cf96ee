//! Runtime configuration from environment variables

use crate::db::UserId;
use crate::max::DEFAULT_API_URL;
use crate::runtime::DispatchSettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// How updates reach the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressMode {
    Polling,
    Webhook,
}

impl FromStr for IngressMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "polling" => Ok(Self::Polling),
            "webhook" => Ok(Self::Webhook),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    /// Bootstrap administrator
    pub owner_id: Option<UserId>,
    pub db_path: PathBuf,
    pub api_url: String,
    pub mode: IngressMode,
    pub port: u16,
    pub request_types: Vec<String>,
    pub session_ttl: Option<Duration>,
    pub broadcast_concurrency: usize,
    pub worker_idle: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = move |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token = var("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        // 0 is how deployments spell "no owner"
        let owner_id = parse_opt::<UserId>(&var, "ADMIN_ID")?.filter(|id| *id != 0);

        let db_path = var("DEAN_BOT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.dean-office-bot/bot.db"))
            },
            PathBuf::from,
        );

        let request_types = var("DEAN_BOT_REQUEST_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(|label| label.trim().to_lowercase())
                    .filter(|label| !label.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|types| !types.is_empty())
            .unwrap_or_else(|| DispatchSettings::default().request_types.to_vec());

        Ok(Self {
            token,
            owner_id,
            db_path,
            api_url: var("DEAN_BOT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            mode: parse_opt(&var, "DEAN_BOT_MODE")?.unwrap_or(IngressMode::Polling),
            port: parse_opt(&var, "DEAN_BOT_PORT")?.unwrap_or(8080),
            request_types,
            session_ttl: parse_opt(&var, "DEAN_BOT_SESSION_TTL_SECS")?.map(Duration::from_secs),
            broadcast_concurrency: parse_opt(&var, "DEAN_BOT_BROADCAST_CONCURRENCY")?
                .unwrap_or(1usize)
                .max(1),
            worker_idle: Duration::from_secs(
                parse_opt(&var, "DEAN_BOT_WORKER_IDLE_SECS")?.unwrap_or(600),
            ),
        })
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            owner_id: self.owner_id,
            request_types: Arc::from(self.request_types.clone()),
            session_ttl: self.session_ttl,
            broadcast_concurrency: self.broadcast_concurrency,
        }
    }
}

fn parse_opt<V: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<V>, ConfigError> {
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}
