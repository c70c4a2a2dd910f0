//! Reminder policy + evaluation primitives for local due-date alerts.
//!
//! Everything here is a pure function of a task snapshot and an explicit
//! `now`; the timer/visibility plumbing lives in `crate::scheduler`.
//!
//! A reminder instance is a `(task id, reminder instant)` pair. Each instance
//! is either still upcoming, due (inside the catch-up window), or missed. The
//! [`NotificationRecord`] remembers which instances were delivered so a pass
//! never fires the same instance twice.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::task::Task;

/// How late a reminder may still be delivered.
pub const DEFAULT_CATCH_UP_WINDOW_SECS: i64 = 5 * 60;

/// Polling cadence of the scheduler.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Title used for every reminder notification; the body is the task title.
pub const NOTIFICATION_TITLE: &str = "Task reminder";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReminderError {
    #[error("notifications are not supported on this platform")]
    CapabilityUnavailable,
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("notification delivery failed: {0}")]
    DeliveryFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPolicy {
    pub catch_up_window_secs: i64,
    pub check_interval_secs: u64,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            catch_up_window_secs: DEFAULT_CATCH_UP_WINDOW_SECS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
        }
    }
}

impl ReminderPolicy {
    pub fn catch_up_window(&self) -> Duration {
        Duration::seconds(self.catch_up_window_secs.max(1))
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; the user has not been asked.
    Prompt,
}

/// Returns the current full task snapshot.
pub trait TaskSource: Send + Sync {
    fn tasks(&self) -> anyhow::Result<Vec<Task>>;
}

impl<F> TaskSource for F
where
    F: Fn() -> anyhow::Result<Vec<Task>> + Send + Sync,
{
    fn tasks(&self) -> anyhow::Result<Vec<Task>> {
        self()
    }
}

/// Platform capability that shows a user-facing alert.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Whether the platform can show notifications at all.
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission;

    /// Ask the user for permission. Returns the resulting state.
    async fn request_permission(&self) -> Permission;

    fn deliver(&self, title: &str, body: &str) -> Result<(), ReminderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderState {
    /// Instant still in the future.
    Upcoming,
    /// Inside the catch-up window and not delivered yet.
    Due,
    /// Inside the catch-up window, already delivered.
    Delivered,
    /// Past the catch-up window; will never fire.
    Missed,
}

/// Position of a reminder instant relative to `now`, ignoring delivery state.
pub fn classify(instant: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> ReminderState {
    if instant > now {
        ReminderState::Upcoming
    } else if now - instant < window {
        ReminderState::Due
    } else {
        ReminderState::Missed
    }
}

/// Instant of a task that is eligible for reminders at all.
fn active_instant(task: &Task) -> Option<DateTime<Utc>> {
    if task.completed {
        return None;
    }
    task.reminder_instant()
}

/// Delivered reminder instances, keyed by task id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRecord {
    delivered: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    pub task_id: String,
    pub reminder_instant: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }

    pub fn is_delivered(&self, task_id: &str, instant: DateTime<Utc>) -> bool {
        self.delivered.get(task_id) == Some(&instant)
    }

    pub fn record(&mut self, task_id: &str, instant: DateTime<Utc>) {
        self.delivered.insert(task_id.to_string(), instant);
    }

    /// Entries sorted by instant, for status output.
    pub fn entries(&self) -> Vec<RecordEntry> {
        let mut out: Vec<RecordEntry> = self
            .delivered
            .iter()
            .map(|(id, at)| RecordEntry {
                task_id: id.clone(),
                reminder_instant: *at,
            })
            .collect();
        out.sort_by(|a, b| {
            a.reminder_instant
                .cmp(&b.reminder_instant)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        out
    }

    /// Drop entries for deleted tasks, reconfigured or cleared reminders, and
    /// instants already past the catch-up window. Returns how many went.
    pub fn prune(&mut self, tasks: &[Task], now: DateTime<Utc>, window: Duration) -> usize {
        let current: HashMap<&str, Option<DateTime<Utc>>> = tasks
            .iter()
            .map(|t| (t.id.as_str(), active_instant(t)))
            .collect();

        let before = self.delivered.len();
        self.delivered.retain(|id, recorded| {
            let still_configured = matches!(current.get(id.as_str()), Some(Some(at)) if at == recorded);
            still_configured && now - *recorded < window
        });
        before - self.delivered.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderHit {
    pub task_id: String,
    pub title: String,
    pub reminder_instant: DateTime<Utc>,
}

impl ReminderHit {
    fn of(task: &Task, instant: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            reminder_instant: instant,
        }
    }
}

/// What started an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassTrigger {
    Tick,
    TasksChanged,
    BecameVisible,
    /// Explicit `evaluate_now` call.
    Manual,
}

/// What one evaluation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub evaluated_at: Option<DateTime<Utc>>,
    /// Set by the scheduler; `None` for direct engine calls.
    pub trigger: Option<PassTrigger>,
    pub delivered: Vec<ReminderHit>,
    /// Due but delivery raised an error; eligible for retry.
    pub failed: Vec<ReminderHit>,
    /// Due but permission was not granted.
    pub withheld: Vec<ReminderHit>,
    pub missed: Vec<ReminderHit>,
    pub already_delivered: usize,
    pub upcoming: usize,
    /// Soonest upcoming reminder instant.
    pub next_due: Option<DateTime<Utc>>,
    pub pruned: usize,
}

/// Read-only view of one configured reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderView {
    #[serde(flatten)]
    pub hit: ReminderHit,
    pub state: ReminderState,
}

/// A pass between [`ReminderEngine::begin_pass`] and delivery.
#[derive(Debug, Clone, Default)]
pub struct PendingPass {
    pub report: EvaluationReport,
    /// Due, undelivered and permitted; deliver each, then settle it.
    pub due: Vec<ReminderHit>,
}

/// Whether `sink` may show a notification right now.
pub fn sink_permits(sink: &dyn NotificationSink) -> bool {
    sink.is_supported() && sink.permission() == Permission::Granted
}

/// Owns the notification record and applies the reminder policy.
#[derive(Debug, Clone, Default)]
pub struct ReminderEngine {
    policy: ReminderPolicy,
    record: NotificationRecord,
}

impl ReminderEngine {
    pub fn new(policy: ReminderPolicy) -> Self {
        Self {
            policy,
            record: NotificationRecord::new(),
        }
    }

    pub fn policy(&self) -> ReminderPolicy {
        self.policy
    }

    pub fn record(&self) -> &NotificationRecord {
        &self.record
    }

    /// One evaluation pass against a task snapshot.
    ///
    /// Delivers every due, undelivered instance through `sink` when
    /// permission is granted, records successes, then prunes the record.
    pub fn evaluate(
        &mut self,
        tasks: &[Task],
        now: DateTime<Utc>,
        sink: &dyn NotificationSink,
    ) -> EvaluationReport {
        let PendingPass { mut report, due } = self.begin_pass(tasks, now, sink_permits(sink));
        for hit in due {
            let outcome = sink.deliver(NOTIFICATION_TITLE, &hit.title);
            self.settle(&mut report, hit, outcome);
        }
        report
    }

    /// First half of a pass: classify the snapshot and prune the record.
    ///
    /// Due instances that still need delivery are returned in
    /// [`PendingPass::due`]; nothing is recorded until [`Self::settle`].
    pub fn begin_pass(&mut self, tasks: &[Task], now: DateTime<Utc>, permitted: bool) -> PendingPass {
        let window = self.policy.catch_up_window();
        let mut pass = PendingPass {
            report: EvaluationReport {
                evaluated_at: Some(now),
                ..Default::default()
            },
            due: Vec::new(),
        };
        let report = &mut pass.report;
        let mut seen: HashSet<&str> = HashSet::new();

        for task in tasks {
            let Some(instant) = active_instant(task) else { continue };

            // Ids are unique per snapshot; a duplicate would double-fire.
            if !seen.insert(task.id.as_str()) {
                warn!(task_id = %task.id, "duplicate task id in snapshot; skipping");
                continue;
            }

            match classify(instant, now, window) {
                ReminderState::Upcoming => {
                    report.upcoming += 1;
                    report.next_due = Some(match report.next_due {
                        Some(cur) if cur <= instant => cur,
                        _ => instant,
                    });
                }
                ReminderState::Missed => {
                    report.missed.push(ReminderHit::of(task, instant));
                }
                ReminderState::Due | ReminderState::Delivered => {
                    if self.record.is_delivered(&task.id, instant) {
                        report.already_delivered += 1;
                    } else if !permitted {
                        report.withheld.push(ReminderHit::of(task, instant));
                    } else {
                        pass.due.push(ReminderHit::of(task, instant));
                    }
                }
            }
        }

        report.pruned = self.record.prune(tasks, now, window);
        if report.pruned > 0 {
            debug!(pruned = report.pruned, "pruned notification record");
        }
        pass
    }

    /// Second half of a pass: record the outcome of delivering `hit`.
    pub fn settle(
        &mut self,
        report: &mut EvaluationReport,
        hit: ReminderHit,
        outcome: Result<(), ReminderError>,
    ) {
        match outcome {
            Ok(()) => {
                self.record.record(&hit.task_id, hit.reminder_instant);
                info!(task_id = %hit.task_id, instant = %hit.reminder_instant, "reminder delivered");
                report.delivered.push(hit);
            }
            Err(e) => {
                warn!(task_id = %hit.task_id, error = %e, "reminder delivery failed; will retry");
                report.failed.push(hit);
            }
        }
    }

    /// Classify every configured reminder without delivering anything.
    pub fn preview(&self, tasks: &[Task], now: DateTime<Utc>) -> Vec<ReminderView> {
        let window = self.policy.catch_up_window();
        let mut out: Vec<ReminderView> = tasks
            .iter()
            .filter_map(|task| {
                let instant = active_instant(task)?;
                let state = match classify(instant, now, window) {
                    ReminderState::Due if self.record.is_delivered(&task.id, instant) => {
                        ReminderState::Delivered
                    }
                    other => other,
                };
                Some(ReminderView {
                    hit: ReminderHit::of(task, instant),
                    state,
                })
            })
            .collect();
        out.sort_by_key(|v| v.hit.reminder_instant);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    /// Sink that records deliveries and can be told to fail.
    struct TestSink {
        permission: Permission,
        fail: Mutex<bool>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl TestSink {
        fn granted() -> Self {
            Self {
                permission: Permission::Granted,
                fail: Mutex::new(false),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn with_permission(permission: Permission) -> Self {
            Self {
                permission,
                ..Self::granted()
            }
        }

        fn bodies(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, b)| b.clone()).collect()
        }
    }

    #[async_trait]
    impl NotificationSink for TestSink {
        fn permission(&self) -> Permission {
            self.permission
        }

        async fn request_permission(&self) -> Permission {
            self.permission
        }

        fn deliver(&self, title: &str, body: &str) -> Result<(), ReminderError> {
            if *self.fail.lock() {
                return Err(ReminderError::DeliveryFailure("quota".into()));
            }
            self.sent.lock().push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn due_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 18, 0, 0).unwrap()
    }

    fn task_a() -> Task {
        Task::new("a", "Submit report").with_due(due_at()).with_reminder(30)
    }

    fn engine() -> ReminderEngine {
        ReminderEngine::new(ReminderPolicy::default())
    }

    #[test]
    fn classify_boundaries() {
        let at = due_at();
        let w = Duration::minutes(5);
        assert_eq!(classify(at, at - Duration::seconds(1), w), ReminderState::Upcoming);
        assert_eq!(classify(at, at, w), ReminderState::Due);
        assert_eq!(classify(at, at + Duration::seconds(299), w), ReminderState::Due);
        assert_eq!(classify(at, at + Duration::seconds(300), w), ReminderState::Missed);
    }

    #[test]
    fn fires_once_inside_window() {
        let sink = TestSink::granted();
        let mut e = engine();
        let tasks = vec![task_a()];
        let now = due_at() - Duration::minutes(30) + Duration::seconds(10);

        let r1 = e.evaluate(&tasks, now, &sink);
        assert_eq!(r1.delivered.len(), 1);
        assert_eq!(sink.bodies(), ["Submit report"]);
        assert_eq!(sink.sent.lock()[0].0, NOTIFICATION_TITLE);

        let r2 = e.evaluate(&tasks, now + Duration::seconds(5), &sink);
        assert!(r2.delivered.is_empty());
        assert_eq!(r2.already_delivered, 1);
        assert_eq!(sink.bodies().len(), 1);
    }

    #[test]
    fn never_fires_early() {
        let sink = TestSink::granted();
        let mut e = engine();
        let tasks = vec![task_a()];
        let now = due_at() - Duration::minutes(31);

        let r = e.evaluate(&tasks, now, &sink);
        assert!(r.delivered.is_empty());
        assert_eq!(r.upcoming, 1);
        assert_eq!(r.next_due, task_a().reminder_instant());
    }

    #[test]
    fn missed_window_is_suppressed() {
        let sink = TestSink::granted();
        let mut e = engine();
        let tasks = vec![task_a()];
        // 10 minutes past the instant, window is 5.
        let now = due_at() - Duration::minutes(20);

        let r = e.evaluate(&tasks, now, &sink);
        assert!(r.delivered.is_empty());
        assert_eq!(r.missed.len(), 1);
        assert!(sink.bodies().is_empty());
    }

    #[test]
    fn completed_and_unconfigured_tasks_never_fire() {
        let sink = TestSink::granted();
        let mut e = engine();
        let now = due_at() - Duration::minutes(30);
        let tasks = vec![
            task_a().completed(),
            Task::new("b", "no reminder").with_due(due_at()),
            Task::new("c", "no due").with_reminder(30),
        ];

        let r = e.evaluate(&tasks, now, &sink);
        assert!(r.delivered.is_empty());
        assert_eq!(r.upcoming + r.missed.len(), 0);
    }

    #[test]
    fn zero_minutes_fires_at_due_instant() {
        let sink = TestSink::granted();
        let mut e = engine();
        let tasks = vec![Task::new("z", "Standup").with_due(due_at()).with_reminder(0)];
        let r = e.evaluate(&tasks, due_at() + Duration::seconds(1), &sink);
        assert_eq!(r.delivered.len(), 1);
    }

    #[test]
    fn reconfiguration_resets_eligibility() {
        let sink = TestSink::granted();
        let mut e = engine();
        let r1_now = due_at() - Duration::minutes(30);
        e.evaluate(&[task_a()], r1_now, &sink);
        assert_eq!(sink.bodies().len(), 1);

        // Move the due date one hour later: new instant R2.
        let moved = Task::new("a", "Submit report")
            .with_due(due_at() + Duration::hours(1))
            .with_reminder(30);
        let r2 = moved.reminder_instant().unwrap();

        // Before R2: record entry for R1 is pruned, nothing fires.
        let r = e.evaluate(std::slice::from_ref(&moved), r1_now + Duration::minutes(1), &sink);
        assert!(r.delivered.is_empty());
        assert_eq!(r.pruned, 1);
        assert!(e.record().is_empty());

        let r = e.evaluate(&[moved], r2 + Duration::seconds(20), &sink);
        assert_eq!(r.delivered.len(), 1);
        assert_eq!(sink.bodies().len(), 2);
    }

    #[test]
    fn reconfiguration_inside_window_fires_again() {
        let sink = TestSink::granted();
        let mut e = engine();
        let now = due_at() - Duration::minutes(30);
        e.evaluate(&[task_a()], now, &sink);

        // Reminder changed from 30 to 31 minutes: R2 is one minute before R1,
        // still inside the window.
        let edited = task_a().with_reminder(31);
        let r = e.evaluate(&[edited], now + Duration::seconds(5), &sink);
        assert_eq!(r.delivered.len(), 1);
        assert_eq!(sink.bodies().len(), 2);
    }

    #[test]
    fn deletion_cleans_record() {
        let sink = TestSink::granted();
        let mut e = engine();
        let now = due_at() - Duration::minutes(30);
        e.evaluate(&[task_a()], now, &sink);
        assert_eq!(e.record().len(), 1);

        let r = e.evaluate(&[], now, &sink);
        assert_eq!(r.pruned, 1);
        assert!(e.record().is_empty());

        // A recycled id with the same configuration fires again.
        let r = e.evaluate(&[task_a()], now + Duration::seconds(1), &sink);
        assert_eq!(r.delivered.len(), 1);
    }

    #[test]
    fn completing_a_task_clears_its_entry() {
        let sink = TestSink::granted();
        let mut e = engine();
        let now = due_at() - Duration::minutes(30);
        e.evaluate(&[task_a()], now, &sink);
        let r = e.evaluate(&[task_a().completed()], now, &sink);
        assert_eq!(r.pruned, 1);
    }

    #[test]
    fn entries_expire_after_window() {
        let sink = TestSink::granted();
        let mut e = engine();
        let instant = task_a().reminder_instant().unwrap();
        e.evaluate(&[task_a()], instant, &sink);
        assert_eq!(e.record().len(), 1);

        let r = e.evaluate(&[task_a()], instant + Duration::minutes(5), &sink);
        assert_eq!(r.pruned, 1);
        assert!(r.delivered.is_empty());
        assert_eq!(r.missed.len(), 1);
    }

    #[test]
    fn failed_delivery_is_retried_inside_window() {
        let sink = TestSink::granted();
        *sink.fail.lock() = true;
        let mut e = engine();
        let instant = task_a().reminder_instant().unwrap();

        let r = e.evaluate(&[task_a()], instant + Duration::seconds(10), &sink);
        assert_eq!(r.failed.len(), 1);
        assert!(e.record().is_empty());

        *sink.fail.lock() = false;
        let r = e.evaluate(&[task_a()], instant + Duration::seconds(70), &sink);
        assert_eq!(r.delivered.len(), 1);

        // Once past the window a failure is not retried.
        let mut late = engine();
        *sink.fail.lock() = true;
        late.evaluate(&[task_a()], instant + Duration::seconds(10), &sink);
        *sink.fail.lock() = false;
        let r = late.evaluate(&[task_a()], instant + Duration::minutes(6), &sink);
        assert!(r.delivered.is_empty());
    }

    #[test]
    fn no_permission_means_no_delivery_and_no_record() {
        for permission in [Permission::Denied, Permission::Prompt] {
            let sink = TestSink::with_permission(permission);
            let mut e = engine();
            let now = task_a().reminder_instant().unwrap();
            let r = e.evaluate(&[task_a()], now, &sink);
            assert!(r.delivered.is_empty());
            assert_eq!(r.withheld.len(), 1);
            assert!(e.record().is_empty());
            assert!(sink.bodies().is_empty());
        }
    }

    #[test]
    fn next_due_is_the_soonest_upcoming() {
        let sink = TestSink::granted();
        let mut e = engine();
        let now = due_at() - Duration::hours(3);
        let tasks = vec![
            task_a(),
            Task::new("b", "earlier").with_due(due_at() - Duration::hours(1)).with_reminder(15),
        ];
        let r = e.evaluate(&tasks, now, &sink);
        assert_eq!(r.upcoming, 2);
        assert_eq!(r.next_due, Some(due_at() - Duration::minutes(75)));
    }

    #[test]
    fn begin_pass_records_nothing_until_settled() {
        let mut e = engine();
        let now = task_a().reminder_instant().unwrap();

        let pass = e.begin_pass(&[task_a()], now, true);
        assert_eq!(pass.due.len(), 1);
        assert!(pass.report.delivered.is_empty());
        assert!(e.record().is_empty());

        // A second plan before settling still sees the instance as due.
        let again = e.begin_pass(&[task_a()], now, true);
        assert_eq!(again.due.len(), 1);

        let PendingPass { mut report, due } = pass;
        for hit in due {
            e.settle(&mut report, hit, Ok(()));
        }
        assert_eq!(report.delivered.len(), 1);
        assert!(e.record().is_delivered("a", now));
        assert!(e.begin_pass(&[task_a()], now, true).due.is_empty());
    }

    #[test]
    fn preview_reports_states() {
        let sink = TestSink::granted();
        let mut e = engine();
        let now = due_at() - Duration::minutes(30);
        let tasks = vec![
            task_a(),
            Task::new("late", "late").with_due(now - Duration::hours(1)).with_reminder(0),
            Task::new("soon", "soon").with_due(due_at()).with_reminder(10),
        ];

        let states: Vec<_> = e.preview(&tasks, now).into_iter().map(|v| v.state).collect();
        assert_eq!(
            states,
            [ReminderState::Missed, ReminderState::Due, ReminderState::Upcoming]
        );

        e.evaluate(&tasks, now, &sink);
        let view = e.preview(&tasks, now);
        assert_eq!(view[1].state, ReminderState::Delivered);
    }
}
