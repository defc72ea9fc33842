//! cmdrack: a command launcher engine.
//!
//! Runs user-defined shell commands as supervised child processes, streams
//! their output line by line, flags failure patterns and stops them with a
//! terminate-then-kill protocol.

pub mod classify;
pub mod config;
pub mod errors;
pub mod events;
pub mod logging;
pub mod output;
pub mod platform;
pub mod process;
pub mod runner;

pub use errors::{EngineError, Result};
pub use events::{EngineEvent, EventSink};
pub use logging::{LogSink, TracingLog};
pub use process::{CommandSpec, RunEnv};
pub use runner::Runner;
