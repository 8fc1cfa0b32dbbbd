//! Shell history sanitization core library.
//!
//! This library provides the batch side of histsan:
//! - History record model (parse, typed accessors, compact serialization)
//! - Sanitization pipeline (one pass per trim length, atomic publish)
//! - Rules configuration resolution
//! - Structured logging and exit codes for the CLI
//!
//! Classification and hashing live in `hs-redact`. The binary entry point
//! is in `main.rs`.

pub mod config;
pub mod entry;
pub mod exit_codes;
pub mod logging;
pub mod output;
pub mod pipeline;

pub use entry::{HistoryEntry, MalformedRecordError, SanitizedEntry};
pub use exit_codes::ExitCode;
pub use pipeline::{
    JobReport, JobSpec, MalformedPolicy, PassReport, PassSpec, PassState, Pipeline, PipelineError,
};
