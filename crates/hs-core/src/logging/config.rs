//! Logging configuration resolved from the command line.
//!
//! `HISTSAN_LOG_FORMAT` is read by clap alongside `--log-format`.
//! `HISTSAN_LOG` (or `RUST_LOG`) holds a filter directive and is only
//! consulted when no `-v` / `-q` flag was given.

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable console lines.
    #[default]
    Human,
    /// One JSON object per event.
    Jsonl,
}

/// Verbosity requested with `-q` / `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Pass lifecycle and skipped records.
    #[default]
    Normal,
    /// Per-stage progress.
    Verbose,
    Trace,
}

impl Verbosity {
    /// `-q` beats any number of `-v`.
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Normal,
            (false, 1) => Verbosity::Verbose,
            (false, _) => Verbosity::Trace,
        }
    }

    /// Filter directive for this verbosity.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

/// Resolved logging settings for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub verbosity: Verbosity,
}

impl LogConfig {
    pub fn from_flags(quiet: bool, verbose: u8, format: Option<LogFormat>) -> Self {
        LogConfig {
            format: format.unwrap_or_default(),
            verbosity: Verbosity::from_flags(quiet, verbose),
        }
    }

    /// Whether the flags override a filter from the environment.
    pub fn overrides_env(&self) -> bool {
        self.verbosity != Verbosity::Normal
    }
}
