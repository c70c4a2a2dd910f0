use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::config::{config_path, load_config, save_config, Config, SinkKind};

fn prompt(input: &mut impl BufRead, label: &str, current: &str) -> Result<String> {
    print!("{label} [{current}]: ");
    io::stdout().flush().ok();
    let mut s = String::new();
    input.read_line(&mut s)?;
    let s = s.trim();
    Ok(if s.is_empty() { current.to_string() } else { s.to_string() })
}

/// Interactive setup: walk through the config file with the current values as defaults.
pub fn run_setup() -> Result<()> {
    println!("tasklist setup\n");
    let cfg = load_config()?;
    let stdin = io::stdin();
    let cfg = ask(&mut stdin.lock(), cfg)?;
    save_config(&cfg)?;

    println!("\nWrote {}", config_path()?.display());
    println!("\nNext steps:");
    println!("- tasklist serve");
    println!("- tasklist tasks add --title \"...\" --due \"YYYY-MM-DD HH:MM\" --remind 30");
    Ok(())
}

fn ask(input: &mut impl BufRead, mut cfg: Config) -> Result<Config> {
    loop {
        let tz = prompt(input, "Timezone (IANA)", &cfg.profile.timezone)?;
        if tz.parse::<chrono_tz::Tz>().is_ok() {
            cfg.profile.timezone = tz;
            break;
        }
        println!("Unknown timezone: {tz}");
    }

    let db = cfg
        .database_path()?
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "memory".to_string());
    let db = prompt(input, "Database file (or \"memory\")", &db)?;
    if db == "memory" {
        cfg.storage.in_memory = true;
        cfg.storage.database_path = None;
    } else {
        cfg.storage.in_memory = false;
        cfg.storage.database_path = Some(PathBuf::from(db));
    }

    let current = match cfg.reminders.sink {
        SinkKind::Desktop => "desktop",
        SinkKind::Log => "log",
    };
    cfg.reminders.sink = match prompt(input, "Reminder sink (desktop/log)", current)?.as_str() {
        "log" => SinkKind::Log,
        _ => SinkKind::Desktop,
    };

    let port = prompt(input, "API port", &cfg.server.port.to_string())?;
    cfg.server.port = port.parse().with_context(|| format!("invalid port: {port}"))?;
    Ok(cfg)
}
