//! Task filtering: list membership, free-text search and completion status.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Completed,
}

impl FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(StatusFilter::All),
            "pending" => Ok(StatusFilter::Pending),
            "completed" | "done" => Ok(StatusFilter::Completed),
            other => anyhow::bail!("unknown status filter: {other} (all|pending|completed)"),
        }
    }
}

/// Composable task query. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuery {
    #[serde(default, rename = "list")]
    pub list_id: Option<String>,
    #[serde(default, rename = "q")]
    pub search: Option<String>,
    #[serde(default)]
    pub status: StatusFilter,
}

impl TaskQuery {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(list_id) = &self.list_id {
            if task.list_id.as_deref() != Some(list_id.as_str()) {
                return false;
            }
        }

        if let Some(needle) = self.needle() {
            let in_title = task.title.to_lowercase().contains(&needle);
            let in_desc = task
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_title && !in_desc {
                return false;
            }
        }

        match self.status {
            StatusFilter::All => true,
            StatusFilter::Pending => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }

    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }

    fn needle(&self) -> Option<String> {
        let s = self.search.as_deref()?.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_lowercase())
        }
    }
}

/// Pending tasks first, then completed; order within each group is kept.
pub fn split_by_status<'a>(tasks: &[&'a Task]) -> (Vec<&'a Task>, Vec<&'a Task>) {
    tasks.iter().copied().partition(|t| !t.completed)
}
