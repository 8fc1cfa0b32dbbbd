//! Structured logging for histsan.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for scripted runs
//!
//! # Usage
//!
//! ```ignore
//! use hs_core::logging::{init_logging, event_names, LogConfig, LogContext, Stage};
//!
//! init_logging(&LogConfig::from_flags(false, 0, None));
//!
//! let ctx = LogContext::new(generate_run_id()).for_pass("trim12");
//! log_event!(ctx, INFO, event_names::PASS_OPENED, Stage::Open, "pass opened", trim = 12u64);
//! ```
//!
//! # Design Notes
//!
//! - stdout is reserved for command payloads (reports, guidance)
//! - stderr receives all log output (human or JSONL)
//! - Events carry counts and line numbers, never history values; free text
//!   is additionally scrubbed with the standard rules before JSONL output

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, Verbosity};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use hs_redact::{HashAlgorithm, Preset, RedactionEngine, RuleSet, TrimLength};
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_SCRUBBER: OnceLock<Option<RedactionEngine>> = OnceLock::new();

fn log_scrubber() -> Option<&'static RedactionEngine> {
    LOG_SCRUBBER
        .get_or_init(|| {
            let rules = RuleSet::compile(Preset::Standard.rules()).ok()?;
            RedactionEngine::new(rules, HashAlgorithm::Sha256, None).ok()
        })
        .as_ref()
}

/// Replace credential-looking spans in free text before it is logged.
///
/// Applies the standard preset's command-line rules with 12-character
/// tokens. If the scrubber cannot be built or fails, the text is withheld.
pub fn scrub_for_log(text: &str) -> String {
    let redacted = log_scrubber().and_then(|engine| {
        engine
            .redactor(TrimLength::new(12))
            .and_then(|r| r.redact_str("cmdLine", text))
            .ok()
    });
    match redacted {
        Some(value) => value.output,
        None => "[withheld]".to_string(),
    }
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. Without
/// `-v` / `-q`, a filter in `HISTSAN_LOG` or `RUST_LOG` replaces `info`.
pub fn init_logging(config: &LogConfig) {
    let directive = config.verbosity.directive();
    let filter = if config.overrides_env() {
        EnvFilter::new(directive)
    } else {
        EnvFilter::try_from_env("HISTSAN_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(directive))
    };

    match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(std::io::stderr().is_terminal());
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init();
        }
        LogFormat::Jsonl => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(JsonlLayer::stderr())
                .try_init();
        }
    }
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    format!("run-{}", &uuid.simple().to_string()[..12])
}

/// Structured event logging with context.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::PASS_OPENED, Stage::Open, "pass opened");
/// log_event!(ctx, WARN, event_names::RECORD_SKIPPED, Stage::Stream, "skipped malformed record",
///     line = 42u64);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(
            target: $event,
            run_id = %$ctx.run_id,
            pass = ?$ctx.pass,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(
            target: $event,
            run_id = %$ctx.run_id,
            pass = ?$ctx.pass,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(
            target: $event,
            run_id = %$ctx.run_id,
            pass = ?$ctx.pass,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(
            target: $event,
            run_id = %$ctx.run_id,
            pass = ?$ctx.pass,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
}
