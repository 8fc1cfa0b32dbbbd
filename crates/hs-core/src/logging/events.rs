//! Event vocabulary for [`crate::log_event!`].
//!
//! Every event carries the run ID, the pass it belongs to (if any) and
//! the pipeline stage. Fields hold counts, line numbers, rule names and
//! paths; history values never appear in an event.

use serde::Serialize;

/// Level written into JSONL events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of a histsan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Startup and argument handling.
    Init,
    /// Rules file resolution and engine construction.
    Config,
    /// Pass Opening state.
    Open,
    /// Pass Streaming state.
    Stream,
    /// Pass Closing state (flush, fsync, rename).
    Close,
    /// Job summary and operator output.
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Config => "config",
            Stage::Open => "open",
            Stage::Stream => "stream",
            Stage::Close => "close",
            Stage::Report => "report",
        };
        write!(f, "{}", s)
    }
}

/// Event names, emitted as tracing targets.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    // Job
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_FINISHED: &str = "job.finished";

    // Pass lifecycle
    pub const PASS_OPENED: &str = "pass.opened";
    pub const PASS_STREAMING: &str = "pass.streaming";
    pub const PASS_CLOSING: &str = "pass.closing";
    pub const PASS_SUCCEEDED: &str = "pass.succeeded";
    pub const PASS_FAILED: &str = "pass.failed";

    // Records
    pub const RECORD_SKIPPED: &str = "record.skipped";
    pub const RECORD_ABORTED: &str = "record.aborted";

    // Keys
    pub const KEY_GENERATED: &str = "key.generated";
}

/// Correlation context shared by the events of one run or pass.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub pass: Option<String>,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            pass: None,
        }
    }

    /// Derive the context for one pass of this run.
    pub fn for_pass(&self, pass: impl Into<String>) -> Self {
        LogContext {
            run_id: self.run_id.clone(),
            pass: Some(pass.into()),
        }
    }
}
