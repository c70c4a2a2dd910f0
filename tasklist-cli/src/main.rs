use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tasklist_core::{ReminderScheduler, TaskSource};
use tasklist_store::{open_storage, ImportMode, Storage, StorageSource};

use tasklist_cli::api::{self, AppState};
use tasklist_cli::config::{self, Config};
use tasklist_cli::notify::build_sink;
use tasklist_cli::reminders_cmd::{self, RemindersCommand};
use tasklist_cli::setup;
use tasklist_cli::tasks_cmd::{self, ListsCommand, TasksCommand};
use tasklist_cli::transfer_cmd::{self, ExportFormat};

#[derive(Parser, Debug)]
#[command(
    name = "tasklist",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TASKLIST_BUILD_SHA"), ")"),
    about = "Personal tasks and lists with local reminders"
)]
struct Cli {
    /// SQLite database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default ~/.tasklist/config.toml if none exists
    InitConfig,

    /// Interactive setup of ~/.tasklist/config.toml
    Setup,

    /// Serve the REST API and run the reminder scheduler
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Task commands
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },

    /// List commands
    Lists {
        #[command(subcommand)]
        command: ListsCommand,
    },

    /// Export everything as JSON (or tasks as CSV)
    Export {
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },

    /// Import a JSON export
    Import {
        file: PathBuf,

        /// merge | replace
        #[arg(long, default_value = "merge")]
        mode: ImportMode,
    },

    /// Reminder commands
    Reminders {
        #[command(subcommand)]
        command: RemindersCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig => config::init_config()?,
        Command::Setup => setup::run_setup()?,

        Command::Serve { host, port } => {
            let cfg = config::load_config()?;
            let storage = storage_for(&cfg, cli.db)?;
            serve(&cfg, storage, host, port).await?;
        }

        Command::Tasks { command } => {
            let cfg = config::load_config()?;
            let storage = storage_for(&cfg, cli.db)?;
            tasks_cmd::run_tasks(command, storage.as_ref(), &cfg)?;
        }

        Command::Lists { command } => {
            let cfg = config::load_config()?;
            let storage = storage_for(&cfg, cli.db)?;
            tasks_cmd::run_lists(command, storage.as_ref())?;
        }

        Command::Export { out, format } => {
            let cfg = config::load_config()?;
            let storage = storage_for(&cfg, cli.db)?;
            transfer_cmd::run_export(storage.as_ref(), out.as_deref(), format)?;
        }

        Command::Import { file, mode } => {
            let cfg = config::load_config()?;
            let storage = storage_for(&cfg, cli.db)?;
            transfer_cmd::run_import(storage.as_ref(), &file, mode)?;
        }

        Command::Reminders { command } => {
            let cfg = config::load_config()?;
            let storage = storage_for(&cfg, cli.db)?;
            reminders_cmd::run(command, storage, &cfg).await?;
        }
    }

    Ok(())
}

fn storage_for(cfg: &Config, db: Option<PathBuf>) -> Result<Arc<dyn Storage>> {
    let path = match db {
        Some(p) => Some(p),
        None => cfg.database_path()?,
    };
    Ok(open_storage(path.as_deref()))
}

async fn serve(cfg: &Config, storage: Arc<dyn Storage>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| cfg.server.host.clone());
    let port = port.unwrap_or(cfg.server.port);

    let scheduler = Arc::new(ReminderScheduler::new(
        build_sink(&cfg.reminders),
        cfg.reminders.policy(),
    ));
    let source: Arc<dyn TaskSource> = Arc::new(StorageSource(Arc::clone(&storage)));
    scheduler.start(source);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    let state = AppState {
        storage,
        scheduler: Arc::clone(&scheduler),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
        }
        tracing::info!("shutting down");
    };
    let result = api::serve(listener, state, shutdown).await;
    scheduler.stop();
    result
}
