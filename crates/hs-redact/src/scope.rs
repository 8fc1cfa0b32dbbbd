//! Redaction scopes.

use serde::{Deserialize, Serialize};

/// How much of a field a matching rule replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Replace the whole field value with a single token.
    #[default]
    Field,
    /// Replace only the matched sub-spans, leaving the rest of the value intact.
    Span,
}

impl Scope {
    /// Parse a scope from a string.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "field" | "whole" => Some(Scope::Field),
            "span" | "sub_span" | "subspan" => Some(Scope::Span),
            _ => None,
        }
    }

    /// Returns whether matches under this scope widen to the entire value.
    pub fn is_whole_field(&self) -> bool {
        matches!(self, Scope::Field)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scope::Field => "field",
            Scope::Span => "span",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope() {
        assert_eq!(Scope::parse_str("field"), Some(Scope::Field));
        assert_eq!(Scope::parse_str("SPAN"), Some(Scope::Span));
        assert_eq!(Scope::parse_str("partial"), None);
    }

    #[test]
    fn test_default_is_whole_field() {
        assert!(Scope::default().is_whole_field());
        assert_eq!(serde_json::to_string(&Scope::Span).unwrap(), "\"span\"");
    }
}
