use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tasklist_core::{
    format_local, parse_due, split_by_status, NewList, NewTask, Priority, StatusFilter, Task,
    TaskPatch, TaskQuery,
};
use tasklist_store::Storage;

use crate::config::Config;

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    /// Print tasks, pending first
    List {
        /// Only tasks in this list (id)
        #[arg(long)]
        list: Option<String>,

        /// Case-insensitive text search over title and description
        #[arg(long)]
        search: Option<String>,

        /// all | pending | completed
        #[arg(long, default_value = "all")]
        status: StatusFilter,
    },

    /// Create a task
    Add {
        #[arg(long)]
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// Local due time "YYYY-MM-DD HH:MM", a date, or RFC3339
        #[arg(long)]
        due: Option<String>,

        /// Minutes before the due time to remind
        #[arg(long)]
        remind: Option<u32>,

        /// 0 none, 1 low, 2 medium, 3 high
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
        priority: u8,

        /// List id
        #[arg(long)]
        list: Option<String>,
    },

    /// Mark a task completed
    Done { id: String },

    /// Delete a task
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ListsCommand {
    /// Print lists with their task counts
    List,

    /// Create a list
    Add {
        #[arg(long)]
        name: String,

        /// "#rrggbb"
        #[arg(long)]
        color: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },
}

pub fn run_tasks(cmd: TasksCommand, storage: &dyn Storage, cfg: &Config) -> Result<()> {
    let tz = cfg.profile.timezone.as_str();
    match cmd {
        TasksCommand::List { list, search, status } => {
            let query = TaskQuery {
                list_id: list,
                search,
                status,
            };
            let tasks = storage.tasks()?;
            let matched = query.apply(&tasks);
            if matched.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            let (pending, completed) = split_by_status(&matched);
            for t in pending.iter().chain(completed.iter()) {
                println!("{}", render_task(t, tz));
            }
        }

        TasksCommand::Add {
            title,
            description,
            due,
            remind,
            priority,
            list,
        } => {
            let due_date = due
                .as_deref()
                .map(|d| parse_due(d, tz))
                .transpose()
                .context("parse --due")?;
            if remind.is_some() && due_date.is_none() {
                bail!("--remind needs --due");
            }
            let new = NewTask {
                title,
                description,
                completed: false,
                priority: Priority::from_level(priority)?,
                list_id: list,
                due_date,
                reminder_minutes: remind,
            };
            let task = storage.create_task(new)?;
            println!("Created {}", render_task(&task, tz));
        }

        TasksCommand::Done { id } => {
            let patch = TaskPatch {
                completed: Some(true),
                ..Default::default()
            };
            match storage.update_task(&id, patch)? {
                Some(task) => println!("Completed {}", render_task(&task, tz)),
                None => bail!("task not found: {id}"),
            }
        }

        TasksCommand::Remove { id } => {
            if !storage.delete_task(&id)? {
                bail!("task not found: {id}");
            }
            println!("Removed task {id}");
        }
    }
    Ok(())
}

pub fn run_lists(cmd: ListsCommand, storage: &dyn Storage) -> Result<()> {
    match cmd {
        ListsCommand::List => {
            let lists = storage.lists()?;
            if lists.is_empty() {
                println!("No lists.");
                return Ok(());
            }
            let tasks = storage.tasks()?;
            for l in &lists {
                let count = tasks
                    .iter()
                    .filter(|t| t.list_id.as_deref() == Some(l.id.as_str()))
                    .count();
                println!("{} {} {} ({} tasks)", l.id, l.color, l.name, count);
            }
        }

        ListsCommand::Add {
            name,
            color,
            description,
        } => {
            let list = storage.create_list(NewList {
                name,
                color,
                description,
            })?;
            println!("Created list {} {}", list.id, list.name);
        }
    }
    Ok(())
}

fn render_task(t: &Task, tz: &str) -> String {
    let mut line = format!(
        "[{}] {} {}",
        if t.completed { "x" } else { " " },
        t.id,
        t.title
    );
    if t.priority != Priority::None {
        line.push_str(&format!(" !{}", t.priority.label()));
    }
    if let Some(due) = t.due_date {
        line.push_str(&format!(" | due {}", format_local(due, tz)));
    }
    if let Some(minutes) = t.reminder_minutes {
        line.push_str(&format!(" | remind {minutes}m before"));
    }
    line
}
