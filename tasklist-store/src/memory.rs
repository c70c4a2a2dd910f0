//! In-memory storage. Ids are sequential decimal strings per kind.

use std::cell::RefCell;

use parking_lot::Mutex;
use tasklist_core::{ListPatch, NewList, NewTask, Task, TaskList, TaskPatch};

use crate::snapshot::run_plan;
use crate::{ImportPlan, ImportSummary, Storage, StoreError, StoreResult};

#[derive(Debug, Default, Clone)]
struct Inner {
    tasks: Vec<Task>,
    lists: Vec<TaskList>,
    next_task_id: u64,
    next_list_id: u64,
}

impl Inner {
    fn check_list(&self, list_id: Option<&str>) -> StoreResult<()> {
        match list_id {
            Some(id) if !self.lists.iter().any(|l| l.id == id) => {
                Err(StoreError::UnknownList(id.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn next_task_id(&mut self) -> String {
        self.next_task_id += 1;
        self.next_task_id.to_string()
    }

    fn next_list_id(&mut self) -> String {
        self.next_list_id += 1;
        self.next_list_id.to_string()
    }

    fn insert_task(&mut self, new: NewTask) -> StoreResult<Task> {
        let new = new.validate()?;
        self.check_list(new.list_id.as_deref())?;
        let task = Task::from_new(self.next_task_id(), new);
        self.tasks.push(task.clone());
        Ok(task)
    }

    fn insert_list(&mut self, new: NewList) -> StoreResult<TaskList> {
        let new = new.validate()?;
        let list = TaskList::from_new(self.next_list_id(), new);
        self.lists.push(list.clone());
        Ok(list)
    }

    fn clear(&mut self) {
        self.tasks.clear();
        self.lists.clear();
    }
}

#[derive(Debug, Default)]
pub struct MemStorage {
    inner: Mutex<Inner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.inner.lock().tasks.clone())
    }

    fn task(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.inner.lock().tasks.iter().find(|t| t.id == id).cloned())
    }

    fn create_task(&self, new: NewTask) -> StoreResult<Task> {
        self.inner.lock().insert_task(new)
    }

    fn update_task(&self, id: &str, patch: TaskPatch) -> StoreResult<Option<Task>> {
        let patch = patch.validate()?;
        let mut inner = self.inner.lock();
        if let Some(list_id) = &patch.list_id {
            inner.check_list(list_id.as_deref())?;
        }
        let Some(task) = inner.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        task.apply(patch);
        Ok(Some(task.clone()))
    }

    fn delete_task(&self, id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.id != id);
        Ok(inner.tasks.len() != before)
    }

    fn lists(&self) -> StoreResult<Vec<TaskList>> {
        Ok(self.inner.lock().lists.clone())
    }

    fn list(&self, id: &str) -> StoreResult<Option<TaskList>> {
        Ok(self.inner.lock().lists.iter().find(|l| l.id == id).cloned())
    }

    fn create_list(&self, new: NewList) -> StoreResult<TaskList> {
        self.inner.lock().insert_list(new)
    }

    fn update_list(&self, id: &str, patch: ListPatch) -> StoreResult<Option<TaskList>> {
        let patch = patch.validate()?;
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.iter_mut().find(|l| l.id == id) else {
            return Ok(None);
        };
        list.apply(patch);
        Ok(Some(list.clone()))
    }

    fn delete_list(&self, id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        for task in inner.tasks.iter_mut() {
            if task.list_id.as_deref() == Some(id) {
                task.list_id = None;
            }
        }
        let before = inner.lists.len();
        inner.lists.retain(|l| l.id != id);
        Ok(inner.lists.len() != before)
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.lock().clear();
        Ok(())
    }

    /// Runs against a staged copy that replaces the live state on success.
    fn apply_import(&self, plan: ImportPlan) -> StoreResult<ImportSummary> {
        let mut inner = self.inner.lock();
        let staged = RefCell::new(inner.clone());
        let summary = run_plan(
            plan,
            &mut || {
                staged.borrow_mut().clear();
                Ok(())
            },
            &mut |list| staged.borrow_mut().insert_list(list),
            &mut |task| staged.borrow_mut().insert_task(task),
        )?;
        *inner = staged.into_inner();
        Ok(summary)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_per_kind() {
        let s = MemStorage::new();
        assert_eq!(s.create_task(NewTask::titled("a")).unwrap().id, "1");
        assert_eq!(s.create_task(NewTask::titled("b")).unwrap().id, "2");
        assert_eq!(s.create_list(NewList::named("l")).unwrap().id, "1");
    }

    #[test]
    fn update_missing_is_none() {
        let s = MemStorage::new();
        assert!(s.update_task("9", TaskPatch::default()).unwrap().is_none());
        assert!(!s.delete_task("9").unwrap());
    }

    #[test]
    fn invalid_payloads_are_rejected() {
        let s = MemStorage::new();
        assert!(s.create_task(NewTask::titled(" ")).is_err());
        assert!(s.tasks().unwrap().is_empty());

        let mut orphan = NewTask::titled("orphan");
        orphan.list_id = Some("42".into());
        assert!(matches!(s.create_task(orphan), Err(StoreError::UnknownList(_))));
    }
}
