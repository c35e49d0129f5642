//! Reactor subsystem (spec §4.B, §4.C, §4.D, §4.G): threshold debouncing,
//! evolution scoring, the global fuse, and playbook-driven remediation.

pub mod catalog;
mod fuse;
mod reactor;
mod score;
mod threshold;

pub use fuse::GlobalFuse;
pub use reactor::{Reactor, ReactorConfig};
pub use score::ScoreEngine;
pub use threshold::{MetricConfig, ThresholdMonitor};
