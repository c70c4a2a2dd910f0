//! tasklist-cli: the `tasklist` binary's building blocks, exposed as a
//! library so integration tests can drive the HTTP API in-process.

pub mod api;
pub mod config;
pub mod notify;
pub mod reminders_cmd;
pub mod setup;
pub mod state;
pub mod tasks_cmd;
pub mod transfer_cmd;
