//! Task and list model shared by storage, the REST API and the reminder engine.
//!
//! JSON uses camelCase field names (`dueDate`, `reminderMinutes`, `listId`).

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Default color for new lists.
pub const DEFAULT_LIST_COLOR: &str = "#3b82f6";

/// Upper bound for `reminderMinutes` (one week).
pub const MAX_REMINDER_MINUTES: u32 = 7 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("list name must not be empty")]
    EmptyListName,
    #[error("priority must be 0..=3, got {0}")]
    InvalidPriority(u8),
    #[error("reminderMinutes must be at most {MAX_REMINDER_MINUTES}, got {0}")]
    InvalidReminder(u32),
    #[error("color must be #rrggbb, got {0:?}")]
    InvalidColor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    pub fn from_level(level: u8) -> Result<Self, ValidationError> {
        match level {
            0 => Ok(Priority::None),
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::High),
            other => Err(ValidationError::InvalidPriority(other)),
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::None => "none",
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

// Priorities travel as plain integers on the wire.
impl Serialize for Priority {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.level())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let level = u8::deserialize(d)?;
        Priority::from_level(level).map_err(serde::de::Error::custom)
    }
}

/// Core task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub list_id: Option<String>,

    /// Optional due instant (UTC).
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,

    /// Minutes before `due_date` at which to alert.
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            completed: false,
            priority: Priority::None,
            list_id: None,
            due_date: None,
            reminder_minutes: None,
        }
    }

    pub fn from_new(id: impl Into<String>, new: NewTask) -> Self {
        Self {
            id: id.into(),
            title: new.title,
            description: new.description,
            completed: new.completed,
            priority: new.priority,
            list_id: new.list_id,
            due_date: new.due_date,
            reminder_minutes: new.reminder_minutes,
        }
    }

    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_reminder(mut self, minutes: u32) -> Self {
        self.reminder_minutes = Some(minutes);
        self
    }

    pub fn with_list(mut self, list_id: impl Into<String>) -> Self {
        self.list_id = Some(list_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    /// `due_date - reminder_minutes`, when both are set.
    pub fn reminder_instant(&self) -> Option<DateTime<Utc>> {
        let due = self.due_date?;
        let minutes = self.reminder_minutes?;
        Some(due - Duration::minutes(i64::from(minutes)))
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(list_id) = patch.list_id {
            self.list_id = list_id;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(reminder_minutes) = patch.reminder_minutes {
            self.reminder_minutes = reminder_minutes;
        }
    }
}

/// Create payload for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            priority: Priority::None,
            list_id: None,
            due_date: None,
            reminder_minutes: None,
        }
    }

    /// Trim the title and blank description, then check bounds.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        self.description = normalize_description(self.description);
        if let Some(minutes) = self.reminder_minutes {
            check_reminder(minutes)?;
        }
        Ok(self)
    }
}

/// Partial update for a task.
///
/// Nullable fields are `Option<Option<T>>`: absent leaves the value alone,
/// `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub list_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub reminder_minutes: Option<Option<u32>>,
}

impl TaskPatch {
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        if let Some(title) = self.title.take() {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(ValidationError::EmptyTitle);
            }
            self.title = Some(title);
        }
        if let Some(description) = self.description.take() {
            self.description = Some(normalize_description(description));
        }
        if let Some(Some(minutes)) = self.reminder_minutes {
            check_reminder(minutes)?;
        }
        Ok(self)
    }

    /// Whether applying this patch can change reminder scheduling.
    pub fn touches_reminder(&self) -> bool {
        self.completed.is_some() || self.due_date.is_some() || self.reminder_minutes.is_some()
    }
}

/// A colored group of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TaskList {
    pub fn from_new(id: impl Into<String>, new: NewList) -> Self {
        Self {
            id: id.into(),
            name: new.name,
            color: new.color.unwrap_or_else(default_color),
            description: new.description,
        }
    }

    pub fn apply(&mut self, patch: ListPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewList {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewList {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            description: None,
        }
    }

    pub fn validate(mut self) -> Result<Self, ValidationError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ValidationError::EmptyListName);
        }
        if let Some(color) = &self.color {
            check_color(color)?;
        }
        self.description = normalize_description(self.description);
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
}

impl ListPatch {
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        if let Some(name) = self.name.take() {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ValidationError::EmptyListName);
            }
            self.name = Some(name);
        }
        if let Some(color) = &self.color {
            check_color(color)?;
        }
        if let Some(description) = self.description.take() {
            self.description = Some(normalize_description(description));
        }
        Ok(self)
    }
}

fn default_color() -> String {
    DEFAULT_LIST_COLOR.to_string()
}

fn color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("static regex"))
}

fn check_color(color: &str) -> Result<(), ValidationError> {
    if color_re().is_match(color) {
        Ok(())
    } else {
        Err(ValidationError::InvalidColor(color.to_string()))
    }
}

fn check_reminder(minutes: u32) -> Result<(), ValidationError> {
    if minutes > MAX_REMINDER_MINUTES {
        return Err(ValidationError::InvalidReminder(minutes));
    }
    Ok(())
}

/// Blank descriptions are stored as absent.
fn normalize_description(description: Option<String>) -> Option<String> {
    description.and_then(|d| {
        let trimmed = d.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn nullable<'de, T, D>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}
