use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tasklist_core::reminders::{DEFAULT_CATCH_UP_WINDOW_SECS, DEFAULT_CHECK_INTERVAL_SECS};
use tasklist_core::ReminderPolicy;

use crate::state::{default_database_path, ensure_tasklist_home};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub reminders: ReminderSection,
    #[serde(default)]
    pub profile: ProfileSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite file. Defaults to `<home>/tasks.db`.
    pub database_path: Option<PathBuf>,
    /// Keep everything in memory; nothing survives a restart.
    pub in_memory: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Desktop,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSection {
    /// Whether reminders may be shown at all (the notification permission).
    pub enabled: bool,
    pub sink: SinkKind,
    pub catch_up_window_secs: i64,
    pub check_interval_secs: u64,
}

impl Default for ReminderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: SinkKind::Desktop,
            catch_up_window_secs: DEFAULT_CATCH_UP_WINDOW_SECS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
        }
    }
}

impl ReminderSection {
    pub fn policy(&self) -> ReminderPolicy {
        ReminderPolicy {
            catch_up_window_secs: self.catch_up_window_secs.max(1),
            check_interval_secs: self.check_interval_secs.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSection {
    /// IANA zone used to read and print local due times.
    pub timezone: String,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

impl Config {
    /// Database file to open, or `None` for in-memory storage.
    pub fn database_path(&self) -> Result<Option<PathBuf>> {
        if self.storage.in_memory {
            return Ok(None);
        }
        match &self.storage.database_path {
            Some(p) => Ok(Some(p.clone())),
            None => Ok(Some(default_database_path()?)),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_tasklist_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    let cfg: Config = toml::from_str(&s).context("parse config.toml")?;
    cfg.profile
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|e| anyhow::anyhow!("invalid [profile] timezone {:?}: {e}", cfg.profile.timezone))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    let cfg = Config::default();
    save_config(&cfg)?;
    println!("Wrote {}", p.display());
    Ok(())
}
