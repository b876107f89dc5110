// tests/integration/main.rs

#[path = "../common/mod.rs"]
mod common;

mod core_steps;
mod daemon_runtime;
mod process_dispatch;
