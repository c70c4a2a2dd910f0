//! tasklist-core: task/list model, filters and the local reminder scheduler.

pub mod filter;
pub mod reminders;
pub mod scheduler;
pub mod task;
pub mod time;

pub use filter::{split_by_status, StatusFilter, TaskQuery};
pub use reminders::{
    classify, sink_permits, EvaluationReport, NotificationRecord, NotificationSink, PassTrigger,
    PendingPass, Permission, RecordEntry, ReminderEngine, ReminderError, ReminderHit,
    ReminderPolicy, ReminderState, ReminderView, TaskSource, NOTIFICATION_TITLE,
};
pub use scheduler::{system_clock, Clock, ReminderScheduler, SchedulerStatus, Visibility};
pub use task::{
    ListPatch, NewList, NewTask, Priority, Task, TaskList, TaskPatch, ValidationError,
    DEFAULT_LIST_COLOR,
};
pub use time::{format_local, parse_due, parse_local_due_to_utc};
