//! Error type for the Priority Scheduler and Action Queue.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("no executor registered for action type {0}")]
    UnknownExecutor(String),

    #[error("no handler registered for {0}")]
    UnknownHandler(String),

    #[error("event bus error: {0}")]
    Bus(#[from] aios_bus::BusError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
