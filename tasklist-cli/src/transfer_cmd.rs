use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tasklist_store::{export, export_tasks_csv, import, ImportMode, ImportPayload, Storage};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Full snapshot (lists and tasks), re-importable
    #[default]
    Json,
    /// Tasks only, one row each
    Csv,
}

pub fn run_export(storage: &dyn Storage, out: Option<&Path>, format: ExportFormat) -> Result<()> {
    let mut buf = Vec::new();
    match format {
        ExportFormat::Json => {
            let snapshot = export(storage)?;
            serde_json::to_writer_pretty(&mut buf, &snapshot)?;
            buf.push(b'\n');
        }
        ExportFormat::Csv => {
            export_tasks_csv(storage, &mut buf)?;
        }
    }

    match out {
        Some(p) => {
            fs::write(p, &buf).with_context(|| format!("write {}", p.display()))?;
            eprintln!("Exported to {}", p.display());
        }
        None => io::stdout().write_all(&buf)?,
    }
    Ok(())
}

pub fn run_import(storage: &dyn Storage, file: &Path, mode: ImportMode) -> Result<()> {
    let s = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let payload: ImportPayload =
        serde_json::from_str(&s).with_context(|| format!("parse {}", file.display()))?;
    let summary = import(storage, payload, mode)?;
    println!(
        "Imported {} lists and {} tasks ({:?} mode)",
        summary.lists, summary.tasks, mode
    );
    Ok(())
}
