//! tasklist-store: storage backends for tasks and lists.
//!
//! Two backends implement [`Storage`]: [`MemStorage`] (process lifetime only)
//! and [`SqliteStorage`] (single database file). Every backend doubles as a
//! reminder [`TaskSource`] through [`StorageSource`].

pub mod memory;
pub mod schema;
pub mod snapshot;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use tasklist_core::{ListPatch, NewList, NewTask, Task, TaskList, TaskPatch, TaskSource, ValidationError};
use thiserror::Error;
use tracing::{error, info, warn};

use snapshot::run_plan;

pub use memory::MemStorage;
pub use snapshot::{
    export, export_tasks_csv, import, ImportMode, ImportPayload, ImportPlan, ImportSummary, Snapshot,
};
pub use sqlite::SqliteStorage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("list not found: {0}")]
    UnknownList(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD over tasks and lists. Implementations serialize access internally.
pub trait Storage: Send + Sync {
    fn tasks(&self) -> StoreResult<Vec<Task>>;
    fn task(&self, id: &str) -> StoreResult<Option<Task>>;
    fn create_task(&self, new: NewTask) -> StoreResult<Task>;
    /// `None` when no task has `id`.
    fn update_task(&self, id: &str, patch: TaskPatch) -> StoreResult<Option<Task>>;
    fn delete_task(&self, id: &str) -> StoreResult<bool>;

    fn lists(&self) -> StoreResult<Vec<TaskList>>;
    fn list(&self, id: &str) -> StoreResult<Option<TaskList>>;
    fn create_list(&self, new: NewList) -> StoreResult<TaskList>;
    fn update_list(&self, id: &str, patch: ListPatch) -> StoreResult<Option<TaskList>>;
    /// Member tasks keep existing with `list_id` cleared.
    fn delete_list(&self, id: &str) -> StoreResult<bool>;

    /// Remove every task and list.
    fn clear(&self) -> StoreResult<()>;

    /// Apply a validated import. Backends apply it all-or-nothing; this
    /// default runs the steps one call at a time and is only atomic when
    /// none of them can fail.
    fn apply_import(&self, plan: ImportPlan) -> StoreResult<ImportSummary> {
        run_plan(
            plan,
            &mut || self.clear(),
            &mut |list| self.create_list(list),
            &mut |task| self.create_task(task),
        )
    }

    fn backend(&self) -> &'static str;
}

/// Adapts any storage into the reminder scheduler's task source.
#[derive(Clone)]
pub struct StorageSource(pub Arc<dyn Storage>);

impl TaskSource for StorageSource {
    fn tasks(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self.0.tasks()?)
    }
}

/// Pick a backend: SQLite when a path is given and opens cleanly, memory otherwise.
pub fn open_storage(database: Option<&Path>) -> Arc<dyn Storage> {
    let Some(path) = database else {
        warn!("no database configured; using in-memory storage (data will not persist between restarts)");
        return Arc::new(MemStorage::new());
    };

    match SqliteStorage::open(path) {
        Ok(store) => {
            info!(path = %path.display(), "database storage initialized");
            Arc::new(store)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot open database");
            warn!("falling back to in-memory storage (data will not persist between restarts)");
            Arc::new(MemStorage::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_storage_without_path_is_memory() {
        assert_eq!(open_storage(None).backend(), "memory");
    }

    #[test]
    fn open_storage_falls_back_on_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let store = open_storage(Some(dir.path()));
        assert_eq!(store.backend(), "memory");
    }

    #[test]
    fn storage_source_feeds_scheduler() {
        let store: Arc<dyn Storage> = Arc::new(MemStorage::new());
        store.create_task(NewTask::titled("x")).unwrap();
        let source = StorageSource(Arc::clone(&store));
        assert_eq!(source.tasks().unwrap().len(), 1);
    }
}
