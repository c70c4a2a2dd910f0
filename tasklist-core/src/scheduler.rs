//! Reminder scheduler: owns one polling session and its triggers.
//!
//! A session is a tokio task that evaluates reminders on every interval tick
//! and whenever a trigger arrives (tasks changed, host became visible). Three
//! locks are involved, always taken in this order:
//!
//! - the pass lock serializes whole passes, so two passes never deliver the
//!   same instance;
//! - the delivery gate holds the current session generation and is held
//!   around each single `deliver` call. `stop()` bumps the generation under
//!   it, so once `stop()` returns no pass delivers again;
//! - the state lock guards the [`ReminderEngine`] and is only held while
//!   planning or settling, never during delivery, so `status()` and
//!   `preview()` stay responsive while a notifier hangs.
//!
//! Passes run on tokio's blocking pool because sinks may block (desktop
//! notifiers spawn a process). `start` spawns onto the current tokio runtime
//! and must be called from inside one.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::reminders::{
    sink_permits, EvaluationReport, NotificationSink, PassTrigger, PendingPass, Permission,
    RecordEntry, ReminderEngine, ReminderPolicy, ReminderView, TaskSource, NOTIFICATION_TITLE,
};

/// Source of "now". Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

struct Shared {
    engine: ReminderEngine,
    visibility: Visibility,
    last_report: Option<EvaluationReport>,
}

/// Everything a pass needs, cloned into the session task.
#[derive(Clone)]
struct PassContext {
    shared: Arc<Mutex<Shared>>,
    gate: Arc<Mutex<u64>>,
    pass_lock: Arc<Mutex<()>>,
    sink: Arc<dyn NotificationSink>,
    source: Arc<dyn TaskSource>,
    clock: Clock,
    generation: u64,
}

impl PassContext {
    fn is_current(&self) -> bool {
        *self.gate.lock() == self.generation
    }

    /// One full pass. Blocks while the sink delivers.
    fn run(&self, trigger: PassTrigger) -> Option<EvaluationReport> {
        let _pass = self.pass_lock.lock();
        if !self.is_current() {
            debug!(?trigger, "stale reminder session; skipping pass");
            return None;
        }

        let tasks = match self.source.tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, ?trigger, "cannot load tasks for reminder pass");
                return None;
            }
        };
        let now = (self.clock)();
        let permitted = sink_permits(self.sink.as_ref());

        let PendingPass { mut report, due } = self.shared.lock().engine.begin_pass(&tasks, now, permitted);
        report.trigger = Some(trigger);

        for hit in due {
            let outcome = {
                let gate = self.gate.lock();
                if *gate != self.generation {
                    debug!(?trigger, "reminder session stopped mid-pass");
                    return None;
                }
                let outcome = self.sink.deliver(NOTIFICATION_TITLE, &hit.title);
                // A waiting stop() gets the gate before our next delivery.
                MutexGuard::unlock_fair(gate);
                outcome
            };
            self.shared.lock().engine.settle(&mut report, hit, outcome);
        }

        self.shared.lock().last_report = Some(report.clone());
        debug!(
            ?trigger,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            upcoming = report.upcoming,
            "reminder pass complete"
        );
        Some(report)
    }

    /// Run a pass on the blocking pool and wait for it.
    async fn run_blocking(&self, trigger: PassTrigger) {
        let ctx = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || ctx.run(trigger)).await {
            warn!(error = %e, ?trigger, "reminder pass panicked or was cancelled");
        }
    }
}

struct Session {
    ctx: PassContext,
    trigger_tx: mpsc::UnboundedSender<PassTrigger>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub supported: bool,
    pub permission: Permission,
    pub visibility: Visibility,
    pub policy: ReminderPolicy,
    pub delivered: Vec<RecordEntry>,
    pub last_report: Option<EvaluationReport>,
}

/// Drives reminder evaluation for one application session.
pub struct ReminderScheduler {
    sink: Arc<dyn NotificationSink>,
    clock: Clock,
    shared: Arc<Mutex<Shared>>,
    gate: Arc<Mutex<u64>>,
    pass_lock: Arc<Mutex<()>>,
    session: Mutex<Option<Session>>,
}

impl ReminderScheduler {
    pub fn new(sink: Arc<dyn NotificationSink>, policy: ReminderPolicy) -> Self {
        Self::with_clock(sink, policy, system_clock())
    }

    pub fn with_clock(sink: Arc<dyn NotificationSink>, policy: ReminderPolicy, clock: Clock) -> Self {
        Self {
            sink,
            clock,
            shared: Arc::new(Mutex::new(Shared {
                engine: ReminderEngine::new(policy),
                visibility: Visibility::Visible,
                last_report: None,
            })),
            gate: Arc::new(Mutex::new(0)),
            pass_lock: Arc::new(Mutex::new(())),
            session: Mutex::new(None),
        }
    }

    /// Begin scheduling against `source`.
    ///
    /// Returns `false` (and does nothing) when the platform has no
    /// notification support. Calling it again replaces the running session.
    pub fn start(&self, source: Arc<dyn TaskSource>) -> bool {
        if !self.sink.is_supported() {
            warn!("notifications are not supported on this platform; reminders disabled");
            return false;
        }

        let mut session = self.session.lock();
        if let Some(prev) = session.take() {
            self.end_session(prev);
        }

        let generation = {
            let mut gate = self.gate.lock();
            *gate += 1;
            *gate
        };
        let policy = self.shared.lock().engine.policy();

        let ctx = PassContext {
            shared: Arc::clone(&self.shared),
            gate: Arc::clone(&self.gate),
            pass_lock: Arc::clone(&self.pass_lock),
            sink: Arc::clone(&self.sink),
            source,
            clock: Arc::clone(&self.clock),
            generation,
        };
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_session(ctx.clone(), policy, trigger_rx));

        info!(
            generation,
            interval_secs = policy.check_interval_secs,
            window_secs = policy.catch_up_window_secs,
            "reminder scheduler started"
        );
        *session = Some(Session {
            ctx,
            trigger_tx,
            handle,
        });
        true
    }

    /// Cancel the session. Safe to call when not started.
    ///
    /// Waits for a delivery already in progress; no delivery starts after
    /// this returns.
    pub fn stop(&self) {
        if let Some(prev) = self.session.lock().take() {
            self.end_session(prev);
            info!("reminder scheduler stopped");
        }
    }

    fn end_session(&self, session: Session) {
        *self.gate.lock() += 1;
        session.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Re-evaluate right away. Call after every change that can move a
    /// reminder instant (create, delete, due date, reminder, completion).
    pub fn notify_tasks_changed(&self) {
        self.send(PassTrigger::TasksChanged);
    }

    /// Report host visibility. Hidden → Visible triggers a pass.
    pub fn set_visibility(&self, visibility: Visibility) {
        let previous = {
            let mut shared = self.shared.lock();
            std::mem::replace(&mut shared.visibility, visibility)
        };
        if previous == Visibility::Hidden && visibility == Visibility::Visible {
            debug!("host became visible; re-evaluating reminders");
            self.send(PassTrigger::BecameVisible);
        }
    }

    /// Run one pass on the caller's thread. `None` when not started.
    ///
    /// Blocks while the sink delivers; from async code prefer the session
    /// triggers.
    pub fn evaluate_now(&self) -> Option<EvaluationReport> {
        let ctx = self.session.lock().as_ref().map(|s| s.ctx.clone())?;
        ctx.run(PassTrigger::Manual)
    }

    /// Classify configured reminders against the current record, no delivery.
    pub fn preview(&self, source: &dyn TaskSource) -> anyhow::Result<Vec<ReminderView>> {
        let tasks = source.tasks()?;
        let now = (self.clock)();
        Ok(self.shared.lock().engine.preview(&tasks, now))
    }

    pub async fn request_permission(&self) -> Permission {
        if !self.sink.is_supported() {
            return Permission::Denied;
        }
        let permission = self.sink.request_permission().await;
        info!(?permission, "notification permission requested");
        permission
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let supported = self.sink.is_supported();
        let permission = self.sink.permission();
        let shared = self.shared.lock();
        SchedulerStatus {
            running,
            supported,
            permission,
            visibility: shared.visibility,
            policy: shared.engine.policy(),
            delivered: shared.engine.record().entries(),
            last_report: shared.last_report.clone(),
        }
    }

    fn send(&self, trigger: PassTrigger) {
        if let Some(session) = self.session.lock().as_ref() {
            // A closed channel means the session is shutting down.
            let _ = session.trigger_tx.send(trigger);
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            *self.gate.lock() += 1;
            session.handle.abort();
        }
    }
}

async fn run_session(
    ctx: PassContext,
    policy: ReminderPolicy,
    mut trigger_rx: mpsc::UnboundedReceiver<PassTrigger>,
) {
    let period = policy.check_interval();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick: Option<DateTime<Utc>> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = (ctx.clock)();
                if let Some(prev) = last_tick {
                    let gap = (now - prev).to_std().unwrap_or_default();
                    if gap > period * 2 {
                        info!(gap_secs = gap.as_secs(), "timer resumed late (suspended or clock jump)");
                    }
                }
                last_tick = Some(now);
                ctx.run_blocking(PassTrigger::Tick).await;
            }
            trigger = trigger_rx.recv() => match trigger {
                Some(trigger) => ctx.run_blocking(trigger).await,
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::ReminderError;
    use crate::task::Task;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration as StdDuration, Instant};

    struct CountingSink {
        supported: bool,
        sent: Mutex<Vec<String>>,
    }

    impl CountingSink {
        fn new(supported: bool) -> Arc<Self> {
            Arc::new(Self {
                supported,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn permission(&self) -> Permission {
            Permission::Granted
        }

        async fn request_permission(&self) -> Permission {
            Permission::Granted
        }

        fn deliver(&self, _title: &str, body: &str) -> Result<(), ReminderError> {
            self.sent.lock().push(body.to_string());
            Ok(())
        }
    }

    /// Sink whose `deliver` blocks the calling thread, like a hung notifier.
    struct SlowSink {
        delay: StdDuration,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SlowSink {
        fn new(delay: StdDuration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            })
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationSink for SlowSink {
        fn permission(&self) -> Permission {
            Permission::Granted
        }

        async fn request_permission(&self) -> Permission {
            Permission::Granted
        }

        fn deliver(&self, _title: &str, _body: &str) -> Result<(), ReminderError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        false
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 17, 30, 10).unwrap()
    }

    fn source(tasks: Arc<Mutex<Vec<Task>>>) -> Arc<dyn TaskSource> {
        Arc::new(move || -> anyhow::Result<Vec<Task>> { Ok(tasks.lock().clone()) })
    }

    fn due_task() -> Task {
        Task::new("a", "Submit report")
            .with_due(Utc.with_ymd_and_hms(2026, 5, 4, 18, 0, 0).unwrap())
            .with_reminder(30)
    }

    fn scheduler(sink: Arc<dyn NotificationSink>) -> ReminderScheduler {
        let policy = ReminderPolicy {
            check_interval_secs: 3600,
            ..Default::default()
        };
        ReminderScheduler::with_clock(sink, policy, Arc::new(fixed_now))
    }

    #[tokio::test]
    async fn unsupported_platform_is_a_noop() {
        let sink = CountingSink::new(false);
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(vec![due_task()]));
        assert!(!s.start(source(tasks)));
        assert!(!s.is_running());
        s.notify_tasks_changed();
        assert!(s.evaluate_now().is_none());
        assert_eq!(s.request_permission().await, Permission::Denied);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn evaluate_now_before_start_is_none() {
        let s = scheduler(CountingSink::new(true));
        assert!(s.evaluate_now().is_none());
        s.stop();
    }

    #[tokio::test]
    async fn start_twice_keeps_one_session() {
        let sink = CountingSink::new(true);
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(vec![due_task()]));
        assert!(s.start(source(Arc::clone(&tasks))));
        assert!(s.start(source(Arc::clone(&tasks))));
        assert!(s.is_running());

        s.evaluate_now();
        s.evaluate_now();
        assert_eq!(sink.count(), 1);
        s.stop();
        assert!(!s.is_running());
    }

    #[tokio::test]
    async fn stop_blocks_further_deliveries() {
        let sink = CountingSink::new(true);
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(Vec::new()));
        s.start(source(Arc::clone(&tasks)));
        let stale_ctx = s.session.lock().as_ref().map(|x| x.ctx.clone()).unwrap();

        s.stop();
        tasks.lock().push(due_task());
        s.notify_tasks_changed();
        assert!(stale_ctx.run(PassTrigger::Tick).is_none());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn tick_and_trigger_deliver_once() {
        let sink = CountingSink::new(true);
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(Vec::new()));
        s.start(source(Arc::clone(&tasks)));

        // First interval tick fires immediately on an empty snapshot.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sink.count(), 0);

        tasks.lock().push(due_task());
        s.notify_tasks_changed();
        for _ in 0..50 {
            if sink.count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.count(), 1);

        s.notify_tasks_changed();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sink.count(), 1);
        s.stop();
    }

    #[tokio::test]
    async fn becoming_visible_triggers_a_pass() {
        let sink = CountingSink::new(true);
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(Vec::new()));
        s.start(source(Arc::clone(&tasks)));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        s.set_visibility(Visibility::Hidden);
        tasks.lock().push(due_task());
        // Hidden → Hidden must not trigger.
        s.set_visibility(Visibility::Hidden);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sink.count(), 0);

        s.set_visibility(Visibility::Visible);
        for _ in 0..50 {
            if sink.count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.count(), 1);
        assert_eq!(s.status().visibility, Visibility::Visible);
        s.stop();
    }

    #[tokio::test]
    async fn status_reports_delivered_entries() {
        let sink = CountingSink::new(true);
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(vec![due_task()]));
        s.start(source(Arc::clone(&tasks)));
        s.evaluate_now();

        let status = s.status();
        assert!(status.running);
        assert_eq!(status.delivered.len(), 1);
        assert_eq!(status.delivered[0].task_id, "a");
        assert_eq!(
            status.delivered[0].reminder_instant,
            due_task().reminder_instant().unwrap()
        );

        let view = s.preview(&*source(tasks)).unwrap();
        assert_eq!(view[0].state, crate::reminders::ReminderState::Delivered);
        s.stop();
    }

    #[tokio::test]
    async fn slow_delivery_leaves_runtime_and_status_responsive() {
        let sink = SlowSink::new(StdDuration::from_millis(600));
        let s = scheduler(sink.clone());
        let tasks = Arc::new(Mutex::new(vec![due_task()]));
        s.start(source(tasks));

        // Single-threaded runtime: this only observes the delivery in
        // progress if the pass runs off the runtime thread.
        assert!(wait_until(|| sink.started() == 1).await);
        let before = Instant::now();
        let status = s.status();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(before.elapsed() < StdDuration::from_millis(300));
        assert!(status.delivered.is_empty());
        assert_eq!(sink.finished(), 0);

        assert!(wait_until(|| s.status().delivered.len() == 1).await);
        s.stop();
    }

    #[tokio::test]
    async fn stop_during_delivery_ends_the_pass() {
        let sink = SlowSink::new(StdDuration::from_millis(300));
        let s = scheduler(sink.clone());
        let second = Task::new("b", "Call the bank")
            .with_due(Utc.with_ymd_and_hms(2026, 5, 4, 18, 0, 0).unwrap())
            .with_reminder(30);
        let tasks = Arc::new(Mutex::new(vec![due_task(), second]));
        s.start(source(tasks));

        assert!(wait_until(|| sink.started() == 1).await);
        s.stop();
        assert_eq!(sink.finished(), 1);

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert_eq!(sink.started(), 1);
        // The interrupted pass never published a report.
        assert!(s.status().last_report.is_none());
    }

    #[tokio::test]
    async fn reports_name_their_trigger() {
        let sink = CountingSink::new(true);
        let s = scheduler(sink.clone());
        s.start(source(Arc::new(Mutex::new(Vec::new()))));
        assert!(wait_until(|| s.status().last_report.is_some()).await);
        assert_eq!(
            s.status().last_report.and_then(|r| r.trigger),
            Some(PassTrigger::Tick)
        );

        let report = s.evaluate_now().unwrap();
        assert_eq!(report.trigger, Some(PassTrigger::Manual));

        s.notify_tasks_changed();
        assert!(
            wait_until(|| {
                s.status().last_report.and_then(|r| r.trigger) == Some(PassTrigger::TasksChanged)
            })
            .await
        );
        s.stop();
    }
}
