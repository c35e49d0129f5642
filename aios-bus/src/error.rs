//! Error type for the Event Bus.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the Event Bus. Journal write failures are fatal to the
/// `emit` call that triggered them (spec §4.A); dispatch errors never
/// surface here - they are isolated and logged instead.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("journal write failed: {0}")]
    JournalWrite(#[from] std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}
