pub mod chat;
pub mod command;
pub mod engine;
pub mod runtime;
pub mod sample;

#[cfg(test)]
mod tests;

pub use chat::{ChatLog, ChatMessage};
pub use command::{Command, Outcome};
pub use engine::{DashboardStats, DispatchEngine};
pub use runtime::{run_ticks, spawn_event_logger};
pub use sample::sample_fleet;
