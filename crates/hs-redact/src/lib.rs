//! Classification and hash redaction for shell history records.
//!
//! This crate decides which parts of a history record are sensitive and
//! replaces them with content hashes, so that sanitized history can still be
//! analyzed (repeated values hash to the same token) without revealing the
//! original text.
//!
//! # Key Features
//!
//! - **Rule-driven classification**: regex patterns, credential flags,
//!   denylisted commands, path components and git remote parts, each with a
//!   priority and a whole-field or sub-span scope.
//! - **Deterministic tokens**: SHA-256, SHA-512 or keyed HMAC-SHA256 hex
//!   digests, optionally trimmed to a prefix.
//! - **Fail-closed**: overlapping rules never leave matched bytes
//!   unredacted, and a span that cannot be replaced is an error, never a
//!   passthrough.
//!
//! # Example
//!
//! ```no_run
//! use hs_redact::{HashAlgorithm, Preset, RedactionEngine, RuleSet, TrimLength};
//!
//! let rules = RuleSet::compile(Preset::Standard.rules()).unwrap();
//! let engine = RedactionEngine::new(rules, HashAlgorithm::Sha256, None).unwrap();
//! let redactor = engine.redactor(TrimLength::new(12)).unwrap();
//!
//! let result = redactor
//!     .redact_str("cmdLine", "mysql --password=hunter2 prod")
//!     .unwrap();
//! assert!(!result.output.contains("hunter2"));
//! ```

pub mod classify;
pub mod engine;
pub mod error;
pub mod field_class;
pub mod hash;
pub mod rules;
pub mod scope;

pub use classify::{lex, Redaction, Rule, RuleSet, Token};
pub use engine::{RedactedValue, RedactionEngine, Redactor};
pub use error::{RedactionError, Result};
pub use field_class::{FieldClass, FieldSelector};
pub use hash::{HashAlgorithm, HashConfig, Hasher, KeyManager, KeyMaterial, TrimLength};
pub use rules::{MatcherSpec, Preset, RuleSpec, RulesFile, RULES_SCHEMA_VERSION};
pub use scope::Scope;
