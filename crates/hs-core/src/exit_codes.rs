//! Exit codes for the histsan CLI.
//!
//! Exit code ranges:
//! - 0-9: Job outcomes (0 only when every requested pass succeeded)
//! - 10-19: User/configuration errors, raised before any record is read
//! - 20-29: Internal and I/O errors outside a pass

/// Exit codes for histsan operations.
///
/// These codes are a stable contract for scripts wrapping histsan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Job Outcomes (0-9)
    // ========================================================================
    /// Every pass reached Succeeded
    Success = 0,

    /// At least one pass failed; the others may have published output
    PassFailed = 1,

    // ========================================================================
    // User / Configuration Errors (10-19)
    // ========================================================================
    /// Invalid arguments (e.g. no home directory to derive default paths)
    ArgsError = 10,

    /// Invalid rules, algorithm, trim length, key or output layout
    ConfigError = 11,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error outside a pipeline pass
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Check if this exit code is a user/configuration error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    /// Check if this exit code is an internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::PassFailed => "ERR_PASS_FAILED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
