use thiserror::Error;

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("unknown delegation: {0}")]
    UnknownDelegation(uuid::Uuid),
    #[error("unknown subtask: {0}")]
    UnknownSubtask(String),
    #[error("unknown consensus request: {0}")]
    UnknownRequest(String),
    #[error("no agent capable of: {0:?}")]
    NoCapableAgent(Vec<String>),
    #[error(transparent)]
    Bus(#[from] aios_bus::BusError),
}

pub type Result<T> = std::result::Result<T, DelegateError>;
