//! Shared data model for the AIOS autonomic control plane core.
//!
//! Every other crate in the workspace (`aios-bus`, `aios-scheduler`,
//! `aios-reactor`, `aios-delegate`) builds on the types defined here instead
//! of reaching into one another's internals - components communicate only
//! through [`Event`] values carried on the bus.

pub mod action;
pub mod canonical;
pub mod consensus;
pub mod delegation;
pub mod error;
pub mod event;
pub mod failure;
pub mod pattern;
pub mod playbook;
pub mod task;

pub use action::{Action, ActionStatus, Risk};
pub use consensus::{ConsensusProtocol, ConsensusRequest, ConsensusStatus, Vote};
pub use delegation::{Delegation, DelegationStatus, Subtask, SubtaskStatus};
pub use error::{Result, TypesError};
pub use event::{Event, EventFilter, Severity};
pub use failure::FailureKind;
pub use playbook::{ExecutionMode, Playbook, Trigger, VerifySpec};
pub use task::{Priority, Task, TaskState};
