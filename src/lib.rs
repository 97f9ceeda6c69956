//! stepgate: drive a multi-step plan to completion one validated step at a time.
//!
//! The caller asks for the next step, performs it, and reports back. The engine
//! validates the work, retries or escalates, verifies checkpoints, persists every
//! decision before returning it, and finally adjudicates a quality gate.

pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod logging;
pub mod machine;
pub mod plan;
pub mod recovery;
pub mod retry;
pub mod state;
pub mod store;
pub mod validation;

pub use engine::{Decision, Engine, EngineSettings, NextStep, StepResult};
pub use errors::{EngineError, EngineResult};
pub use plan::Plan;
pub use state::{StepStatus, TaskState, TaskStatus};
