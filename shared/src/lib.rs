pub mod bus;
pub mod config;
pub mod error;
pub mod logger;
pub mod types;


pub use bus::{EngineEvent, EventBus, EventEnvelope, EventKind, EventSource, Subscription};
pub use crate::config::EngineConfig;
pub use error::{EngineError, EngineResult};
