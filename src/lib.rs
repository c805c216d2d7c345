pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod run;

pub use error::{CapabilityError, Error, Result, RunError};
pub use run::{AnswerStatus, FinalAnswer, RunId, RunPhase};
