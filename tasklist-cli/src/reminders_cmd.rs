use anyhow::Result;
use clap::Subcommand;
use std::sync::Arc;
use tasklist_core::{
    format_local, NotificationSink, ReminderScheduler, ReminderState, ReminderView, TaskSource,
};
use tasklist_store::{Storage, StorageSource};

use crate::config::Config;
use crate::notify::build_sink;

#[derive(Subcommand, Debug)]
pub enum RemindersCommand {
    /// Show configured reminders and what a pass would do now (sends nothing)
    Check,

    /// Run the reminder scheduler in the foreground until Ctrl-C
    Watch,
}

pub async fn run(cmd: RemindersCommand, storage: Arc<dyn Storage>, cfg: &Config) -> Result<()> {
    let sink = build_sink(&cfg.reminders);
    match cmd {
        RemindersCommand::Check => check(sink, storage, cfg),
        RemindersCommand::Watch => watch(sink, storage, cfg).await,
    }
}

fn check(sink: Arc<dyn NotificationSink>, storage: Arc<dyn Storage>, cfg: &Config) -> Result<()> {
    let tz = cfg.profile.timezone.as_str();
    let policy = cfg.reminders.policy();

    println!("Reminder config:\n");
    println!("- sink: {:?} (supported: {})", cfg.reminders.sink, sink.is_supported());
    println!("- permission: {:?}", sink.permission());
    println!("- check interval: {}s", policy.check_interval_secs);
    println!("- catch-up window: {}s\n", policy.catch_up_window_secs);

    let scheduler = ReminderScheduler::new(sink, policy);
    let source = StorageSource(storage);
    let views = scheduler.preview(&source)?;
    if views.is_empty() {
        println!("No reminders configured.");
        return Ok(());
    }

    for state in [ReminderState::Due, ReminderState::Upcoming, ReminderState::Missed] {
        let group: Vec<&ReminderView> = views.iter().filter(|v| v.state == state).collect();
        if group.is_empty() {
            continue;
        }
        println!("{}:", heading(state));
        for v in group {
            println!(
                "- {} {} at {}",
                v.hit.task_id,
                v.hit.title,
                format_local(v.hit.reminder_instant, tz)
            );
        }
    }
    Ok(())
}

fn heading(state: ReminderState) -> &'static str {
    match state {
        ReminderState::Due => "Due now",
        ReminderState::Upcoming => "Upcoming",
        ReminderState::Missed => "Missed",
        ReminderState::Delivered => "Delivered",
    }
}

async fn watch(sink: Arc<dyn NotificationSink>, storage: Arc<dyn Storage>, cfg: &Config) -> Result<()> {
    let scheduler = ReminderScheduler::new(sink, cfg.reminders.policy());
    let source: Arc<dyn TaskSource> = Arc::new(StorageSource(storage));
    if !scheduler.start(source) {
        anyhow::bail!("notifications are not available here; try [reminders] sink = \"log\"");
    }
    println!("Watching reminders (Ctrl-C to stop)...");
    tokio::signal::ctrl_c().await?;
    scheduler.stop();
    Ok(())
}
