//! History record model.
//!
//! One [`HistoryEntry`] per non-blank line of a RESH history file. Parsing
//! checks the shape of the well-known fields and keeps every field, known
//! or not, in its original order so that sanitized output has the same
//! schema as the input.

use hs_redact::{FieldClass, Redactor};
use serde_json::{Map, Value};
use thiserror::Error;

/// The one field every record must carry.
pub const CMD_LINE: &str = "cmdLine";

/// A record that does not have the expected shape.
///
/// Messages name the field and the expected type, never the value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedRecordError {
    #[error("record is not valid UTF-8")]
    InvalidUtf8,

    #[error("record is not valid JSON ({category} error at column {column})")]
    InvalidJson { category: &'static str, column: usize },

    #[error("record is a JSON {found}, expected an object")]
    NotAnObject { found: &'static str },

    #[error("record has no '{field}' field")]
    MissingField { field: &'static str },

    #[error("field '{field}' must be {expected}, found {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One recorded shell invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    fields: Map<String, Value>,
}

impl HistoryEntry {
    /// Whether a raw line carries no record at all.
    pub fn is_blank(line: &[u8]) -> bool {
        line.iter().all(u8::is_ascii_whitespace)
    }

    /// Parse one serialized record.
    pub fn parse(line: &str) -> Result<Self, MalformedRecordError> {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            let category = match e.classify() {
                serde_json::error::Category::Io => "io",
                serde_json::error::Category::Syntax => "syntax",
                serde_json::error::Category::Data => "data",
                serde_json::error::Category::Eof => "unexpected end of input",
            };
            MalformedRecordError::InvalidJson {
                category,
                column: e.column(),
            }
        })?;
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(MalformedRecordError::NotAnObject {
                    found: json_type(&other),
                })
            }
        };
        Self::from_fields(fields)
    }

    /// Build an entry from an already decoded object, checking its shape.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, MalformedRecordError> {
        if !fields.contains_key(CMD_LINE) {
            return Err(MalformedRecordError::MissingField { field: CMD_LINE });
        }
        for (name, value) in &fields {
            check_shape(name, value)?;
        }
        Ok(Self { fields })
    }

    pub fn cmd_line(&self) -> &str {
        self.str_field(CMD_LINE).unwrap_or_default()
    }

    pub fn pwd(&self) -> Option<&str> {
        self.str_field("pwd")
    }

    pub fn real_pwd(&self) -> Option<&str> {
        self.str_field("realPwd")
    }

    pub fn home(&self) -> Option<&str> {
        self.str_field("home")
    }

    pub fn host(&self) -> Option<&str> {
        self.str_field("host")
    }

    pub fn login(&self) -> Option<&str> {
        self.str_field("login")
    }

    pub fn session_id(&self) -> Option<&str> {
        self.str_field("sessionId")
    }

    pub fn git_origin_remote(&self) -> Option<&str> {
        self.str_field("gitOriginRemote")
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.fields.get("exitCode").and_then(Value::as_i64)
    }

    pub fn realtime_before(&self) -> Option<f64> {
        self.fields.get("realtimeBefore").and_then(Value::as_f64)
    }

    pub fn realtime_after(&self) -> Option<f64> {
        self.fields.get("realtimeAfter").and_then(Value::as_f64)
    }

    /// Raw access to any field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field names in record order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Serialize unchanged, as compact JSON.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }

    /// Classify and redact every field with one pass's redactor.
    pub fn sanitize(self, redactor: &Redactor<'_>) -> hs_redact::Result<SanitizedEntry> {
        let mut fields = self.fields;
        let mut redactions = 0;
        for (name, value) in fields.iter_mut() {
            redactions += redactor.redact_value(name, value)?;
        }
        Ok(SanitizedEntry { fields, redactions })
    }
}

fn check_shape(name: &str, value: &Value) -> Result<(), MalformedRecordError> {
    let class = FieldClass::of(name);
    let ok = match class {
        FieldClass::Integer => value.is_i64() || value.is_u64(),
        FieldClass::Timestamp => value.is_number(),
        c if c.expects_string() => value.is_string(),
        _ => true,
    };
    if ok {
        return Ok(());
    }
    let expected = match class {
        FieldClass::Integer => "an integer",
        FieldClass::Timestamp => "a number",
        _ => "a string",
    };
    Err(MalformedRecordError::WrongType {
        field: name.to_string(),
        expected,
        found: json_type(value),
    })
}

/// A history record after redaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedEntry {
    fields: Map<String, Value>,
    redactions: usize,
}

impl SanitizedEntry {
    /// Number of spans or values replaced by tokens.
    pub fn redactions(&self) -> usize {
        self.redactions
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Serialize to one compact JSON object, fields in input order.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_redact::{HashAlgorithm, Preset, RedactionEngine, RuleSet, TrimLength};

    const RECORD: &str = r#"{"cmdLine":"ls -la","exitCode":0,"shell":"zsh","pwd":"/home/alice","host":"box","realtimeBefore":1566762905.1,"customField":[1,2]}"#;

    #[test]
    fn test_parse_accessors() {
        let entry = HistoryEntry::parse(RECORD).unwrap();
        assert_eq!(entry.cmd_line(), "ls -la");
        assert_eq!(entry.exit_code(), Some(0));
        assert_eq!(entry.pwd(), Some("/home/alice"));
        assert_eq!(entry.host(), Some("box"));
        assert_eq!(entry.realtime_before(), Some(1566762905.1));
        assert_eq!(entry.session_id(), None);
        assert_eq!(entry.len(), 7);
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let entry = HistoryEntry::parse(RECORD).unwrap();
        assert_eq!(entry.to_line().unwrap(), RECORD);
        let names: Vec<_> = entry.field_names().collect();
        assert_eq!(names[0], "cmdLine");
        assert_eq!(names[6], "customField");
    }

    #[test]
    fn test_roundtrip_normalizes_whitespace() {
        let spaced = "{ \"cmdLine\" : \"echo hi\",  \"exitCode\": 1 }\n";
        let entry = HistoryEntry::parse(spaced).unwrap();
        assert_eq!(entry.to_line().unwrap(), r#"{"cmdLine":"echo hi","exitCode":1}"#);
    }

    #[test]
    fn test_malformed_shapes() {
        assert!(matches!(
            HistoryEntry::parse("not json"),
            Err(MalformedRecordError::InvalidJson { .. })
        ));
        assert_eq!(
            HistoryEntry::parse("[1,2]"),
            Err(MalformedRecordError::NotAnObject { found: "array" })
        );
        assert_eq!(
            HistoryEntry::parse(r#"{"pwd":"/"}"#),
            Err(MalformedRecordError::MissingField { field: CMD_LINE })
        );
        assert_eq!(
            HistoryEntry::parse(r#"{"cmdLine":42}"#),
            Err(MalformedRecordError::WrongType {
                field: "cmdLine".into(),
                expected: "a string",
                found: "integer",
            })
        );
        assert!(HistoryEntry::parse(r#"{"cmdLine":"x","exitCode":"0"}"#).is_err());
        assert!(HistoryEntry::parse(r#"{"cmdLine":"x","pid":1.5}"#).is_err());
        assert!(HistoryEntry::parse(r#"{"cmdLine":"x","realtimeAfter":"now"}"#).is_err());
        assert!(HistoryEntry::parse(r#"{"cmdLine":"x","login":null}"#).is_err());
    }

    #[test]
    fn test_error_messages_never_echo_values() {
        let secret = "hunter2-secret-value";
        let inputs = [
            format!(r#"{{"cmdLine":"x","exitCode":"{}"}}"#, secret),
            format!(r#"{{"cmdLine":"x","login":["{}"]}}"#, secret),
            format!(r#"{{"cmdLine":"{}"#, secret),
            format!(r#""{}""#, secret),
        ];
        for input in &inputs {
            let err = HistoryEntry::parse(input).unwrap_err();
            assert!(!err.to_string().contains(secret), "{}", err);
        }
    }

    #[test]
    fn test_blank_lines() {
        assert!(HistoryEntry::is_blank(b""));
        assert!(HistoryEntry::is_blank(b"  \t\r\n"));
        assert!(!HistoryEntry::is_blank(b" {}"));
    }

    #[test]
    fn test_sanitize_counts_redactions() {
        let rules = RuleSet::compile(Preset::Standard.rules()).unwrap();
        let engine = RedactionEngine::new(rules, HashAlgorithm::Sha256, None).unwrap();
        let redactor = engine.redactor(TrimLength::new(12)).unwrap();

        let entry = HistoryEntry::parse(RECORD).unwrap();
        let sanitized = entry.sanitize(&redactor).unwrap();
        // "alice" in pwd and the host identifier.
        assert_eq!(sanitized.redactions(), 2);
        assert_eq!(sanitized.get("cmdLine"), Some(&Value::from("ls -la")));
        assert_eq!(sanitized.get("shell"), Some(&Value::from("zsh")));
        assert_eq!(
            sanitized.get("host"),
            Some(&Value::String(redactor.token(b"box")))
        );
    }

    #[test]
    fn test_numbers_keep_their_literal_text() {
        let line = r#"{"cmdLine":"ls","exitCode":0,"custom":123456789012345678901234567890,"realtimeBefore":1566762905.250,"id":18446744073709551616}"#;
        let entry = HistoryEntry::parse(line).unwrap();
        assert_eq!(entry.to_line().unwrap(), line);

        let rules = RuleSet::compile(Preset::Standard.rules()).unwrap();
        let engine = RedactionEngine::new(rules, HashAlgorithm::Sha256, None).unwrap();
        let redactor = engine.redactor(TrimLength::FULL).unwrap();
        let sanitized = entry.sanitize(&redactor).unwrap();
        assert_eq!(sanitized.redactions(), 0);
        assert_eq!(sanitized.to_line().unwrap(), line);
    }
}
