//! Priority Scheduler, Action Queue, and Circuit Breaker (spec §4.D, §4.E,
//! §4.F): bounded-concurrency execution for both ad-hoc `Task`s and guarded,
//! idempotent `Action`s.

mod action_queue;
mod breaker;
mod budget;
mod error;
mod executor;
mod handler;
mod queue;
mod quota;
mod receipt;
mod scheduler;

pub use action_queue::{ActionQueue, ActionQueueConfig, ProcessChecker};
pub use breaker::{BreakerConfig, BreakerState, BreakerStatus, CircuitBreaker};
pub use budget::{BudgetConfig, ResourceBudget};
pub use error::{Result, SchedulerError};
pub use executor::{Executor, ExecutorOutcome, HttpExecutor, ShellExecutor, ToolExecutor};
pub use handler::{HandlerError, HandlerFn, HandlerResult};
pub use quota::QuotaConfig;
pub use receipt::{Receipt, ReceiptStore};
pub use scheduler::{RetryConfig, Scheduler};
