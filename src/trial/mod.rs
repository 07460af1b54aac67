//! Trial module - the clone/install/check/test pipeline
//!
//! This is the part of auto-checking that does not depend on the web layer:
//! - `context`: per-trial state and the `project:app` selector
//! - `journal`: the structured trial log
//! - `steps`: the step executor and the individual steps
//! - `pipeline`: sequencing and the trial verdict
//! - `port`: port selection for test servers

pub mod context;
pub mod journal;
pub mod pipeline;
pub mod port;
pub mod steps;

// Re-exports for convenience
pub use context::{ProjectSelector, TrialRequestError};
pub use pipeline::{ShutdownReport, StepTimeouts, TrialConfig, TrialReport, TrialRunner};
