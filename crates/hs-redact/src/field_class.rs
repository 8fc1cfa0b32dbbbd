//! Field classification for history records.
//!
//! Maps the well-known field names of a history record to a coarse class.
//! Classes drive shape validation when records are parsed and let rules
//! select groups of fields (`@path`, `@identifier`) instead of naming each.

use crate::error::{RedactionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse classification of a history record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Full command line text (highest risk)
    CmdLine,
    /// Command name only (first word)
    Command,
    /// Filesystem path (working directory, home, git dir)
    Path,
    /// Git remote URL
    Remote,
    /// Host, login, machine and session identifiers
    Identifier,
    /// Wall-clock or duration values
    Timestamp,
    /// Exit codes, PIDs and other integers
    Integer,
    /// Anything else (shell, locale, OS release info)
    Metadata,
}

impl FieldClass {
    /// All classes, in declaration order.
    pub const ALL: &'static [FieldClass] = &[
        FieldClass::CmdLine,
        FieldClass::Command,
        FieldClass::Path,
        FieldClass::Remote,
        FieldClass::Identifier,
        FieldClass::Timestamp,
        FieldClass::Integer,
        FieldClass::Metadata,
    ];

    /// Classify a record field by name.
    pub fn of(field: &str) -> FieldClass {
        match field {
            "cmdLine" | "recallLastCmdLine" | "recallPrefix" => FieldClass::CmdLine,
            "firstWord" => FieldClass::Command,
            "pwd" | "pwdAfter" | "realPwd" | "realPwdAfter" | "home" | "shellEnv" | "gitDir"
            | "gitDirAfter" | "gitRealDir" | "gitRealDirAfter" => FieldClass::Path,
            "gitOriginRemote" | "gitOriginRemoteAfter" => FieldClass::Remote,
            "host" | "login" | "machineId" | "reshUuid" | "sessionId" | "recordId" => {
                FieldClass::Identifier
            }
            "exitCode" | "pid" | "sessionPid" | "shlvl" | "recallHistno" => FieldClass::Integer,
            f if f.starts_with("realtime") => FieldClass::Timestamp,
            _ => FieldClass::Metadata,
        }
    }

    /// Returns whether values of this class must be JSON strings.
    pub fn expects_string(&self) -> bool {
        matches!(
            self,
            FieldClass::CmdLine
                | FieldClass::Command
                | FieldClass::Path
                | FieldClass::Remote
                | FieldClass::Identifier
        )
    }

    /// Parse a field class from a string.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "cmdline" | "cmd_line" => Some(FieldClass::CmdLine),
            "command" => Some(FieldClass::Command),
            "path" => Some(FieldClass::Path),
            "remote" => Some(FieldClass::Remote),
            "identifier" => Some(FieldClass::Identifier),
            "timestamp" => Some(FieldClass::Timestamp),
            "integer" => Some(FieldClass::Integer),
            "metadata" => Some(FieldClass::Metadata),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldClass::CmdLine => "cmd_line",
            FieldClass::Command => "command",
            FieldClass::Path => "path",
            FieldClass::Remote => "remote",
            FieldClass::Identifier => "identifier",
            FieldClass::Timestamp => "timestamp",
            FieldClass::Integer => "integer",
            FieldClass::Metadata => "metadata",
        };
        write!(f, "{}", s)
    }
}

/// Selects the record fields a rule applies to.
///
/// Accepted forms: `*` (every field), `@class` (every field of a class),
/// a glob with `*` wildcards (`git*Dir*`), or an exact field name.
#[derive(Debug, Clone)]
pub enum FieldSelector {
    Any,
    Class(FieldClass),
    Glob(Regex),
    Exact(String),
}

impl FieldSelector {
    /// Parse a selector expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(RedactionError::config("empty field selector"));
        }
        if expr == "*" {
            return Ok(FieldSelector::Any);
        }
        if let Some(class) = expr.strip_prefix('@') {
            return FieldClass::parse_str(class)
                .map(FieldSelector::Class)
                .ok_or_else(|| RedactionError::config(format!("unknown field class '@{}'", class)));
        }
        if expr.contains('*') {
            let pattern = expr
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let re = Regex::new(&format!("^{}$", pattern)).map_err(|e| {
                RedactionError::config(format!("invalid field glob '{}': {}", expr, e))
            })?;
            return Ok(FieldSelector::Glob(re));
        }
        Ok(FieldSelector::Exact(expr.to_string()))
    }

    /// Returns whether this selector picks the named field.
    pub fn matches(&self, field: &str) -> bool {
        match self {
            FieldSelector::Any => true,
            FieldSelector::Class(class) => FieldClass::of(field) == *class,
            FieldSelector::Glob(re) => re.is_match(field),
            FieldSelector::Exact(name) => name == field,
        }
    }
}
