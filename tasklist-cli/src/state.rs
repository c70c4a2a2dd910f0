use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Environment variable that relocates the data directory (tests use it).
pub const HOME_ENV: &str = "TASKLIST_HOME";

pub fn tasklist_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".tasklist"))
}

pub fn ensure_tasklist_home() -> Result<PathBuf> {
    let dir = tasklist_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn default_database_path() -> Result<PathBuf> {
    Ok(tasklist_home()?.join("tasks.db"))
}
