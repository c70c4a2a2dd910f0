use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tasklist_core::{
    NotificationSink, Permission, ReminderEngine, ReminderError, ReminderPolicy,
    ReminderScheduler, Task, TaskSource,
};

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
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

/// Task A: due T, 30 minutes before. Evaluate at T-30m+10s, then again, then
/// on a fresh engine at T-20m (missed).
#[test]
fn scenario_task_a_fires_once_then_missed_on_fresh_process() {
    let t = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
    let task_a = Task::new("A", "Dentist").with_due(t).with_reminder(30);
    let sink = RecordingSink::default();

    let mut engine = ReminderEngine::new(ReminderPolicy::default());
    let now = t - Duration::minutes(30) + Duration::seconds(10);
    let report = engine.evaluate(std::slice::from_ref(&task_a), now, &sink);
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(*sink.sent.lock(), ["Dentist"]);

    let report = engine.evaluate(std::slice::from_ref(&task_a), now, &sink);
    assert!(report.delivered.is_empty());

    let mut fresh = ReminderEngine::new(ReminderPolicy::default());
    let report = fresh.evaluate(&[task_a], t - Duration::minutes(20), &sink);
    assert!(report.delivered.is_empty());
    assert_eq!(report.missed.len(), 1);
    assert_eq!(sink.sent.lock().len(), 1);
}

/// Task B is completed: never delivered at any time.
#[test]
fn scenario_task_b_completed_never_fires() {
    let t = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
    let task_b = Task::new("B", "Done already").with_due(t).with_reminder(15).completed();
    let sink = RecordingSink::default();
    let mut engine = ReminderEngine::new(ReminderPolicy::default());

    for offset in [-60, -15, -14, 0, 5, 60] {
        engine.evaluate(std::slice::from_ref(&task_b), t + Duration::minutes(offset), &sink);
    }
    assert!(sink.sent.lock().is_empty());
}

/// Task C fires at R1, is edited to R2, fires again around R2.
#[test]
fn scenario_task_c_edit_produces_new_delivery() {
    let due1 = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
    let due2 = due1 + Duration::days(1);
    let sink = RecordingSink::default();
    let mut engine = ReminderEngine::new(ReminderPolicy::default());

    let c1 = Task::new("C", "Renew passport").with_due(due1).with_reminder(60);
    let r1 = c1.reminder_instant().unwrap();
    engine.evaluate(&[c1], r1 + Duration::seconds(30), &sink);

    let c2 = Task::new("C", "Renew passport").with_due(due2).with_reminder(60);
    let r2 = c2.reminder_instant().unwrap();
    let report = engine.evaluate(&[c2], r2 + Duration::minutes(2), &sink);
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(sink.sent.lock().len(), 2);
}

/// A snapshot source shared with the scheduler sees edits made after start.
#[tokio::test]
async fn scheduler_reads_latest_snapshot_on_every_pass() {
    let now = Utc.with_ymd_and_hms(2026, 9, 1, 8, 30, 5).unwrap();
    let store = Arc::new(Mutex::new(Vec::<Task>::new()));
    let src_store = Arc::clone(&store);
    let source: Arc<dyn TaskSource> =
        Arc::new(move || -> anyhow::Result<Vec<Task>> { Ok(src_store.lock().clone()) });

    let sink = Arc::new(RecordingSink::default());
    let policy = ReminderPolicy {
        check_interval_secs: 3600,
        ..Default::default()
    };
    let scheduler = ReminderScheduler::with_clock(sink.clone(), policy, Arc::new(move || now));
    assert!(scheduler.start(source));

    let due = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
    store.lock().push(Task::new("1", "Team sync").with_due(due).with_reminder(30));
    let report = scheduler.evaluate_now().unwrap();
    assert_eq!(report.delivered.len(), 1);

    store.lock().clear();
    let report = scheduler.evaluate_now().unwrap();
    assert_eq!(report.pruned, 1);
    assert!(scheduler.status().delivered.is_empty());

    scheduler.stop();
    assert!(scheduler.evaluate_now().is_none());
}
