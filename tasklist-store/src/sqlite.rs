//! SQLite-backed storage.
//!
//! One database file, ids are UUID v4. Thread-safe via an internal
//! `Mutex<Connection>`; every call takes the lock for its whole duration.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tasklist_core::{ListPatch, NewList, NewTask, Priority, Task, TaskList, TaskPatch};
use uuid::Uuid;

use crate::schema::{apply_schema, read_schema_version};
use crate::snapshot::run_plan;
use crate::{ImportPlan, ImportSummary, Storage, StoreError, StoreResult};

const TASK_COLUMNS: &str =
    "id, title, description, completed, priority, list_id, due_date, reminder_minutes";
const LIST_COLUMNS: &str = "id, name, color, description";

pub struct SqliteStorage {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`, applying the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> StoreResult<Option<u32>> {
        Ok(read_schema_version(&self.lock())?)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

fn check_list(conn: &Connection, list_id: Option<&str>) -> StoreResult<()> {
    let Some(id) = list_id else { return Ok(()) };
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM lists WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::UnknownList(id.to_string())),
    }
}

fn select_task(conn: &Connection, id: &str) -> StoreResult<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_task).optional()?)
}

fn select_list(conn: &Connection, id: &str) -> StoreResult<Option<TaskList>> {
    let sql = format!("SELECT {LIST_COLUMNS} FROM lists WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_list).optional()?)
}

fn write_task(conn: &Connection, task: &Task, insert: bool) -> StoreResult<()> {
    let due = task.due_date.map(|d| d.to_rfc3339());
    let sql = if insert {
        "INSERT INTO tasks (id, title, description, completed, priority, list_id, due_date, reminder_minutes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    } else {
        "UPDATE tasks SET title = ?2, description = ?3, completed = ?4, priority = ?5, \
         list_id = ?6, due_date = ?7, reminder_minutes = ?8 WHERE id = ?1"
    };
    conn.execute(
        sql,
        params![
            task.id,
            task.title,
            task.description,
            task.completed,
            task.priority.level(),
            task.list_id,
            due,
            task.reminder_minutes,
        ],
    )?;
    Ok(())
}

fn insert_task(conn: &Connection, new: NewTask) -> StoreResult<Task> {
    let new = new.validate()?;
    check_list(conn, new.list_id.as_deref())?;
    let task = Task::from_new(Uuid::new_v4().to_string(), new);
    write_task(conn, &task, true)?;
    Ok(task)
}

fn insert_list(conn: &Connection, new: NewList) -> StoreResult<TaskList> {
    let new = new.validate()?;
    let list = TaskList::from_new(Uuid::new_v4().to_string(), new);
    conn.execute(
        "INSERT INTO lists (id, name, color, description) VALUES (?1, ?2, ?3, ?4)",
        params![list.id, list.name, list.color, list.description],
    )?;
    Ok(list)
}

fn clear_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("DELETE FROM tasks; DELETE FROM lists;")?;
    Ok(())
}

impl Storage for SqliteStorage {
    fn tasks(&self) -> StoreResult<Vec<Task>> {
        let conn = self.lock();
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY rowid");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_task)?;

        let mut tasks = Vec::new();
        for r in rows {
            tasks.push(r?);
        }
        Ok(tasks)
    }

    fn task(&self, id: &str) -> StoreResult<Option<Task>> {
        select_task(&self.lock(), id)
    }

    fn create_task(&self, new: NewTask) -> StoreResult<Task> {
        insert_task(&self.lock(), new)
    }

    fn update_task(&self, id: &str, patch: TaskPatch) -> StoreResult<Option<Task>> {
        let patch = patch.validate()?;
        let conn = self.lock();
        if let Some(list_id) = &patch.list_id {
            check_list(&conn, list_id.as_deref())?;
        }
        let Some(mut task) = select_task(&conn, id)? else {
            return Ok(None);
        };
        task.apply(patch);
        write_task(&conn, &task, false)?;
        Ok(Some(task))
    }

    fn delete_task(&self, id: &str) -> StoreResult<bool> {
        let n = self.lock().execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn lists(&self) -> StoreResult<Vec<TaskList>> {
        let conn = self.lock();
        let sql = format!("SELECT {LIST_COLUMNS} FROM lists ORDER BY rowid");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_list)?;

        let mut lists = Vec::new();
        for r in rows {
            lists.push(r?);
        }
        Ok(lists)
    }

    fn list(&self, id: &str) -> StoreResult<Option<TaskList>> {
        select_list(&self.lock(), id)
    }

    fn create_list(&self, new: NewList) -> StoreResult<TaskList> {
        insert_list(&self.lock(), new)
    }

    fn update_list(&self, id: &str, patch: ListPatch) -> StoreResult<Option<TaskList>> {
        let patch = patch.validate()?;
        let conn = self.lock();
        let Some(mut list) = select_list(&conn, id)? else {
            return Ok(None);
        };
        list.apply(patch);
        conn.execute(
            "UPDATE lists SET name = ?2, color = ?3, description = ?4 WHERE id = ?1",
            params![list.id, list.name, list.color, list.description],
        )?;
        Ok(Some(list))
    }

    fn delete_list(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("UPDATE tasks SET list_id = NULL WHERE list_id = ?1", params![id])?;
        let n = tx.execute("DELETE FROM lists WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    fn clear(&self) -> StoreResult<()> {
        clear_all(&self.lock())
    }

    /// One transaction; dropping it on error rolls everything back.
    fn apply_import(&self, plan: ImportPlan) -> StoreResult<ImportSummary> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let summary = run_plan(
            plan,
            &mut || clear_all(&tx),
            &mut |list| insert_list(&tx, list),
            &mut |task| insert_task(&tx, task),
        )?;
        tx.commit()?;
        Ok(summary)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let level: u8 = row.get(4)?;
    let priority = Priority::from_level(level)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(e)))?;

    let due: Option<String> = row.get(6)?;
    let due_date = due
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        priority,
        list_id: row.get(5)?,
        due_date,
        reminder_minutes: row.get(7)?,
    })
}

fn row_to_list(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskList> {
    Ok(TaskList {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        description: row.get(3)?,
    })
}
