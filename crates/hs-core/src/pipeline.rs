//! Batch sanitization pipeline.
//!
//! A pass streams one input history file through parse, classify and
//! redact into one output artifact at a fixed trim length:
//!
//! ```text
//! Opening -> Streaming -> Closing -> Succeeded
//!    |           |           |
//!    +-----------+-----------+----> Failed
//! ```
//!
//! Output is written to `<output>.tmp.<pid>.<trim>` and only renamed onto
//! the output path once every record has been written, flushed and synced.
//! A failed pass removes its temporary file, so an output path either holds
//! a complete artifact or whatever was there before.
//!
//! A job runs several passes over the same input concurrently, one scoped
//! thread per pass, sharing only the read-only [`RedactionEngine`].

use crate::entry::{HistoryEntry, MalformedRecordError};
use crate::log_event;
use crate::logging::{event_names, generate_run_id, LogContext, Stage};
use chrono::{DateTime, Utc};
use hs_redact::{RedactionEngine, RedactionError, TrimLength};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Line numbers of skipped records kept in a pass report.
const MAX_REPORTED_SKIPS: usize = 100;

/// What to do with a record that does not parse.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log the line number, count it and continue.
    #[default]
    Skip,
    /// Fail the pass; nothing is published.
    Abort,
}

impl std::fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedPolicy::Skip => write!(f, "skip"),
            MalformedPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Errors raised by a pass or while validating a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid job layout, raised before any record is read.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot open input {path}: {source}")]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create output {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed record at line {line}: {source}")]
    Malformed {
        line: u64,
        #[source]
        source: MalformedRecordError,
    },

    #[error("cannot serialize record at line {line}")]
    Serialize { line: u64 },

    #[error(transparent)]
    Redaction(#[from] RedactionError),

    #[error("pass worker panicked")]
    Panicked,
}

impl PipelineError {
    /// Whether the error is a pre-run configuration error.
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::Config(_) => true,
            PipelineError::Redaction(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// Stable short name for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::OpenInput { .. } | PipelineError::CreateOutput { .. } => "open",
            PipelineError::Read { .. } | PipelineError::Write { .. } => "io",
            PipelineError::Publish { .. } => "publish",
            PipelineError::Malformed { .. } => "malformed_record",
            PipelineError::Serialize { .. } => "serialize",
            PipelineError::Redaction(RedactionError::InvariantViolation { .. }) => {
                "redaction_invariant"
            }
            PipelineError::Redaction(_) => "redaction",
            PipelineError::Panicked => "internal",
        }
    }
}

/// One requested pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub trim: TrimLength,
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
}

impl PassSpec {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, trim: TrimLength) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            trim,
            on_malformed: MalformedPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    /// Label used in logs and reports.
    pub fn label(&self) -> String {
        format!("trim{}", self.trim)
    }

    /// Path of the in-progress artifact.
    pub fn temp_path(&self) -> PathBuf {
        let name = self
            .output
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("sanitized.json");
        self.output.with_file_name(format!(
            "{}.tmp.{}.{}",
            name,
            std::process::id(),
            self.trim
        ))
    }

    /// Check the pass layout without touching the filesystem beyond lookups.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.output.file_name().is_none() {
            return Err(PipelineError::Config(format!(
                "output path {} does not name a file",
                self.output.display()
            )));
        }
        if same_path(&self.input, &self.output) {
            return Err(PipelineError::Config(format!(
                "output path {} is the input file",
                self.output.display()
            )));
        }
        Ok(())
    }
}

/// Passes run together over one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub passes: Vec<PassSpec>,
}

impl JobSpec {
    pub fn new(passes: Vec<PassSpec>) -> Self {
        Self { passes }
    }

    /// One pass per `(output, trim)` target, all reading `input`.
    pub fn fan_out(
        input: &Path,
        targets: impl IntoIterator<Item = (PathBuf, TrimLength)>,
        policy: MalformedPolicy,
    ) -> Self {
        let passes = targets
            .into_iter()
            .map(|(output, trim)| PassSpec::new(input, output, trim).with_policy(policy))
            .collect();
        Self { passes }
    }

    /// Reject empty jobs, bad pass layouts and outputs shared between passes.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.passes.is_empty() {
            return Err(PipelineError::Config("no passes requested".to_string()));
        }
        let mut outputs = HashSet::new();
        for pass in &self.passes {
            pass.validate()?;
            if !outputs.insert(normalize(&pass.output)) {
                return Err(PipelineError::Config(format!(
                    "output path {} is used by more than one pass",
                    pass.output.display()
                )));
            }
        }
        Ok(())
    }
}

/// Resolve a possibly non-existent path through its nearest existing parent.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a == b || normalize(a) == normalize(b)
}

/// Pass states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Opening,
    Streaming,
    Closing,
    Succeeded,
    Failed,
}

impl PassState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PassState::Succeeded | PassState::Failed)
    }
}

impl std::fmt::Display for PassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PassState::Opening => "opening",
            PassState::Streaming => "streaming",
            PassState::Closing => "closing",
            PassState::Succeeded => "succeeded",
            PassState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// End-of-pass summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub trim: TrimLength,
    pub output: PathBuf,
    pub state: PassState,
    /// Non-blank lines read from the input.
    pub records_read: u64,
    pub records_written: u64,
    pub records_skipped: u64,
    /// Line numbers of the first skipped records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_lines: Vec<u64>,
    /// Spans and values replaced by tokens across all records.
    pub fields_redacted: u64,
    /// State the pass was in when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<PassState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassReport {
    fn new(spec: &PassSpec) -> Self {
        Self {
            trim: spec.trim,
            output: spec.output.clone(),
            state: PassState::Opening,
            records_read: 0,
            records_written: 0,
            records_skipped: 0,
            skipped_lines: Vec::new(),
            fields_redacted: 0,
            failed_in: None,
            error_kind: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == PassState::Succeeded
    }

    fn record_skip(&mut self, line: u64) {
        self.records_skipped += 1;
        if self.skipped_lines.len() < MAX_REPORTED_SKIPS {
            self.skipped_lines.push(line);
        }
    }

    fn fail(&mut self, error: &PipelineError) {
        self.failed_in = Some(self.state);
        self.state = PassState::Failed;
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
    }
}

/// Summary of all passes of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub passes: Vec<PassReport>,
}

impl JobReport {
    pub fn failed_passes(&self) -> impl Iterator<Item = &PassReport> {
        self.passes.iter().filter(|p| !p.succeeded())
    }
}

/// Runs passes against a shared engine.
pub struct Pipeline<'e> {
    engine: &'e RedactionEngine,
    log: LogContext,
}

impl<'e> Pipeline<'e> {
    pub fn new(engine: &'e RedactionEngine) -> Self {
        Self {
            engine,
            log: LogContext::new(generate_run_id()),
        }
    }

    pub fn with_log_context(mut self, log: LogContext) -> Self {
        self.log = log;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.log.run_id
    }

    /// Run one pass to a terminal state.
    pub fn run_pass(&self, spec: &PassSpec) -> PassReport {
        let ctx = self.log.for_pass(spec.label());
        let mut report = PassReport::new(spec);
        let tmp = spec.temp_path();

        let result = spec.validate().and_then(|_| self.execute(spec, &tmp, &ctx, &mut report));
        match result {
            Ok(()) => {
                report.state = PassState::Succeeded;
                log_event!(
                    ctx,
                    INFO,
                    event_names::PASS_SUCCEEDED,
                    Stage::Close,
                    "pass published",
                    records_written = report.records_written,
                    records_skipped = report.records_skipped,
                    fields_redacted = report.fields_redacted
                );
            }
            Err(error) => {
                let _ = fs::remove_file(&tmp);
                report.fail(&error);
                let cause = error.to_string();
                log_event!(
                    ctx,
                    ERROR,
                    event_names::PASS_FAILED,
                    Stage::Close,
                    "pass failed",
                    kind = error.kind(),
                    cause = cause.as_str()
                );
            }
        }
        report
    }

    fn execute(
        &self,
        spec: &PassSpec,
        tmp: &Path,
        ctx: &LogContext,
        report: &mut PassReport,
    ) -> Result<(), PipelineError> {
        // Opening
        let redactor = self.engine.redactor(spec.trim)?;
        let input = File::open(&spec.input).map_err(|e| PipelineError::OpenInput {
            path: spec.input.clone(),
            source: e,
        })?;
        if let Some(parent) = spec.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PipelineError::CreateOutput {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let file = File::create(tmp).map_err(|e| PipelineError::CreateOutput {
            path: tmp.to_path_buf(),
            source: e,
        })?;
        log_event!(
            ctx,
            INFO,
            event_names::PASS_OPENED,
            Stage::Open,
            "pass opened",
            trim = spec.trim.chars() as u64
        );

        // Streaming
        report.state = PassState::Streaming;
        log_event!(ctx, DEBUG, event_names::PASS_STREAMING, Stage::Stream, "streaming records");
        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(file);
        let write_err = |e: io::Error| PipelineError::Write {
            path: tmp.to_path_buf(),
            source: e,
        };
        let mut buf = Vec::new();
        let mut line_no: u64 = 0;

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| PipelineError::Read {
                    path: spec.input.clone(),
                    source: e,
                })?;
            if n == 0 {
                break;
            }
            line_no += 1;
            if HistoryEntry::is_blank(&buf) {
                continue;
            }
            report.records_read += 1;

            let parsed = std::str::from_utf8(&buf)
                .map_err(|_| MalformedRecordError::InvalidUtf8)
                .and_then(HistoryEntry::parse);
            let entry = match parsed {
                Ok(entry) => entry,
                Err(source) => {
                    let reason = source.to_string();
                    match spec.on_malformed {
                        MalformedPolicy::Skip => {
                            log_event!(
                                ctx,
                                WARN,
                                event_names::RECORD_SKIPPED,
                                Stage::Stream,
                                "skipped malformed record",
                                line = line_no,
                                reason = reason.as_str()
                            );
                            report.record_skip(line_no);
                            continue;
                        }
                        MalformedPolicy::Abort => {
                            log_event!(
                                ctx,
                                ERROR,
                                event_names::RECORD_ABORTED,
                                Stage::Stream,
                                "malformed record aborts the pass",
                                line = line_no,
                                reason = reason.as_str()
                            );
                            return Err(PipelineError::Malformed {
                                line: line_no,
                                source,
                            });
                        }
                    }
                }
            };

            let sanitized = entry.sanitize(&redactor)?;
            let line = sanitized
                .to_line()
                .map_err(|_| PipelineError::Serialize { line: line_no })?;
            writer.write_all(line.as_bytes()).map_err(write_err)?;
            writer.write_all(b"\n").map_err(write_err)?;
            report.records_written += 1;
            report.fields_redacted += sanitized.redactions() as u64;
        }

        // Closing
        report.state = PassState::Closing;
        log_event!(
            ctx,
            DEBUG,
            event_names::PASS_CLOSING,
            Stage::Close,
            "flushing and publishing",
            records_written = report.records_written
        );
        let file = writer
            .into_inner()
            .map_err(|e| write_err(e.into_error()))?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::rename(tmp, &spec.output).map_err(|e| PipelineError::Publish {
            path: spec.output.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Validate a job, then run its passes concurrently.
    ///
    /// Returns `Err` only for configuration errors found before any pass
    /// starts; pass failures are reported in the [`JobReport`].
    pub fn run_job(&self, job: &JobSpec) -> Result<JobReport, PipelineError> {
        job.validate()?;
        for pass in &job.passes {
            self.engine.redactor(pass.trim)?;
        }

        let started_at = Utc::now();
        log_event!(
            self.log,
            INFO,
            event_names::JOB_STARTED,
            Stage::Init,
            "job started",
            passes = job.passes.len() as u64
        );

        let passes: Vec<PassReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = job
                .passes
                .iter()
                .map(|spec| (spec, scope.spawn(move || self.run_pass(spec))))
                .collect();
            handles
                .into_iter()
                .map(|(spec, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        let _ = fs::remove_file(spec.temp_path());
                        let mut report = PassReport::new(spec);
                        report.fail(&PipelineError::Panicked);
                        report
                    })
                })
                .collect()
        });

        let success = passes.iter().all(PassReport::succeeded);
        log_event!(
            self.log,
            INFO,
            event_names::JOB_FINISHED,
            Stage::Report,
            "job finished",
            success = success
        );
        Ok(JobReport {
            run_id: self.log.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            success,
            passes,
        })
    }
}
