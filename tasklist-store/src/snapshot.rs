//! Whole-database export and import.

use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasklist_core::{NewList, NewTask, Task, TaskList, ValidationError};
use tracing::{info, warn};

use crate::{Storage, StoreError, StoreResult};

pub const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "Utc::now")]
    pub export_date: DateTime<Utc>,
    #[serde(default)]
    pub lists: Vec<TaskList>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Add everything alongside existing data, with fresh ids.
    #[default]
    Merge,
    /// Clear storage first.
    Replace,
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(ImportMode::Merge),
            "replace" => Ok(ImportMode::Replace),
            other => Err(format!("invalid import mode '{other}' (expected merge or replace)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub lists: usize,
    pub tasks: usize,
}

pub fn export(storage: &dyn Storage) -> StoreResult<Snapshot> {
    Ok(Snapshot {
        version: default_version(),
        export_date: Utc::now(),
        lists: storage.lists()?,
        tasks: storage.tasks()?,
    })
}

/// Import input.
///
/// Records stay raw JSON until [`ImportPlan::build`] so one malformed record
/// is skipped instead of rejecting the whole payload. Extra top-level fields
/// of an export (`version`, `exportDate`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportPayload {
    #[serde(default)]
    pub lists: Vec<Value>,
    #[serde(default)]
    pub tasks: Vec<Value>,
}

impl From<Snapshot> for ImportPayload {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            lists: snapshot.lists.iter().filter_map(|l| serde_json::to_value(l).ok()).collect(),
            tasks: snapshot.tasks.iter().filter_map(|t| serde_json::to_value(t).ok()).collect(),
        }
    }
}

/// Validated import records, ready for [`Storage::apply_import`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPlan {
    /// Clear storage before creating anything.
    pub replace: bool,
    /// Each list with the id it had in the payload, if any.
    pub lists: Vec<(Option<String>, NewList)>,
    /// `list_id` still refers to payload list ids.
    pub tasks: Vec<NewTask>,
}

impl ImportPlan {
    /// Parse and validate every record, skipping the ones that fail.
    pub fn build(payload: ImportPayload, mode: ImportMode) -> Self {
        let lists = payload
            .lists
            .into_iter()
            .filter_map(|v| parse_record(v, "list", NewList::validate))
            .collect();
        let tasks = payload
            .tasks
            .into_iter()
            .filter_map(|v| parse_record(v, "task", NewTask::validate))
            .map(|(_, task)| task)
            .collect();
        Self {
            replace: mode == ImportMode::Replace,
            lists,
            tasks,
        }
    }
}

/// Payload ids may be strings or numbers.
fn record_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_record<T: DeserializeOwned>(
    value: Value,
    kind: &'static str,
    check: impl FnOnce(T) -> Result<T, ValidationError>,
) -> Option<(Option<String>, T)> {
    let id = record_id(&value);
    let parsed = serde_json::from_value::<T>(value)
        .map_err(|e| e.to_string())
        .and_then(|record| check(record).map_err(|e| e.to_string()));
    match parsed {
        Ok(record) => Some((id, record)),
        Err(error) => {
            warn!(kind, id = id.as_deref().unwrap_or("-"), %error, "skipping invalid import record");
            None
        }
    }
}

/// Execute `plan` through the given backend operations.
///
/// List references are remapped to the freshly created list ids; a
/// reference to a list not in the plan is dropped.
pub(crate) fn run_plan(
    plan: ImportPlan,
    clear: &mut dyn FnMut() -> StoreResult<()>,
    create_list: &mut dyn FnMut(NewList) -> StoreResult<TaskList>,
    create_task: &mut dyn FnMut(NewTask) -> StoreResult<Task>,
) -> StoreResult<ImportSummary> {
    if plan.replace {
        clear()?;
    }

    let mut summary = ImportSummary::default();
    let mut list_ids: HashMap<String, String> = HashMap::new();

    for (source_id, list) in plan.lists {
        let created = create_list(list)?;
        if let Some(source_id) = source_id {
            list_ids.insert(source_id, created.id);
        }
        summary.lists += 1;
    }

    for mut task in plan.tasks {
        task.list_id = task.list_id.and_then(|id| list_ids.get(&id).cloned());
        create_task(task)?;
        summary.tasks += 1;
    }
    Ok(summary)
}

/// Recreate every valid list and task from `payload`.
///
/// Invalid records are skipped with a warning and not counted. The backend
/// applies the rest all-or-nothing, so a failure leaves storage untouched
/// even in replace mode.
pub fn import(storage: &dyn Storage, payload: ImportPayload, mode: ImportMode) -> StoreResult<ImportSummary> {
    let received = (payload.lists.len(), payload.tasks.len());
    let plan = ImportPlan::build(payload, mode);
    let summary = storage.apply_import(plan)?;
    info!(
        ?mode,
        lists = summary.lists,
        tasks = summary.tasks,
        skipped = received.0 + received.1 - summary.lists - summary.tasks,
        "import finished"
    );
    Ok(summary)
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    completed: bool,
    priority: &'static str,
    list: &'a str,
    due_date: String,
    reminder_minutes: Option<u32>,
}

/// Write every task as CSV, resolving list ids to names.
pub fn export_tasks_csv<W: Write>(storage: &dyn Storage, writer: W) -> StoreResult<usize> {
    let lists: HashMap<String, String> = storage
        .lists()?
        .into_iter()
        .map(|l| (l.id, l.name))
        .collect();
    let tasks = storage.tasks()?;

    let mut wtr = csv::Writer::from_writer(writer);
    for task in &tasks {
        let list = task
            .list_id
            .as_ref()
            .and_then(|id| lists.get(id))
            .map(String::as_str)
            .unwrap_or("");
        wtr.serialize(CsvRow {
            id: &task.id,
            title: &task.title,
            description: task.description.as_deref().unwrap_or(""),
            completed: task.completed,
            priority: task.priority.label(),
            list,
            due_date: task.due_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
            reminder_minutes: task.reminder_minutes,
        })
        .map_err(|e| StoreError::Serde(e.to_string()))?;
    }
    wtr.flush().map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(tasks.len())
}
