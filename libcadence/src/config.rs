//! Configuration management for Cadence

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    pub provider: ProviderConfig,
    pub mastodon: Option<MastodonConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// The fixed local calendar all slot matching and budget months use.
/// Deliberately an offset, not a tz-database zone: month boundaries must
/// be stable, not DST-dependent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// UTC offset as "+HH:MM" or "-HH:MM".
    pub offset: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            offset: "+00:00".to_string(),
        }
    }
}

impl CalendarConfig {
    pub fn fixed_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.offset).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "calendar.offset".to_string(),
                reason: format!("expected +HH:MM or -HH:MM, got {}", self.offset),
            }
            .into()
        })
    }
}

/// AI generation provider (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Prices per million tokens, in the budget currency.
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    /// Multiplier applied to the whole call when batch mode is used.
    pub batch_multiplier: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_mtok: 0.0,
            output_per_mtok: 0.0,
            cache_read_per_mtok: 0.0,
            cache_write_per_mtok: 0.0,
            batch_multiplier: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    pub enabled: bool,
    pub base_url: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on trigger endpoints when set.
    pub trigger_secret: Option<String>,
    #[serde(default = "default_tick_deadline")]
    pub tick_deadline_secs: u64,
    #[serde(default = "default_log_retention")]
    pub log_retention_days: i64,
}

fn default_bind() -> String {
    "127.0.0.1:8747".to_string()
}

fn default_tick_deadline() -> u64 {
    50
}

fn default_log_retention() -> i64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            trigger_secret: None,
            tick_deadline_secs: default_tick_deadline(),
            log_retention_days: default_log_retention(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.calendar.fixed_offset()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/cadence/cadence.db".to_string(),
            },
            calendar: CalendarConfig::default(),
            provider: ProviderConfig {
                api_base: "https://api.openai.com".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                pricing: PricingConfig::default(),
                request_timeout_secs: default_request_timeout(),
            },
            mastodon: None,
            server: ServerConfig::default(),
        }
    }
}

/// Parse "+HH:MM" / "-HH:MM" into a FixedOffset.
fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CADENCE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("cadence").join("config.toml"))
}
