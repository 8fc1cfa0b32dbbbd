//! Classification rule configuration.
//!
//! Rules are declared in a JSON rules file or taken from a built-in preset,
//! then compiled once into a [`crate::RuleSet`]. Nothing here changes while
//! records are processed.

use crate::hash::HashAlgorithm;
use crate::Scope;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Schema version for the rules file.
pub const RULES_SCHEMA_VERSION: &str = "1.0.0";

/// A single classification rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Unique rule name, reported in redaction summaries.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Field selectors (`*`, `@class`, glob or exact name).
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    /// What to look for inside selected fields.
    #[serde(rename = "match")]
    pub matcher: MatcherSpec,

    /// Whole field vs matched sub-spans.
    #[serde(default)]
    pub scope: Scope,

    /// Priority (higher = evaluated first).
    #[serde(default)]
    pub priority: i32,
}

fn default_fields() -> Vec<String> {
    vec!["*".to_string()]
}

impl RuleSpec {
    pub fn new(name: &str, fields: &[&str], matcher: MatcherSpec, scope: Scope, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            matcher,
            scope,
            priority,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Matcher declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherSpec {
    /// Regex; redacts the `secret` named group, else `group`, else the whole match.
    Pattern {
        pattern: String,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "deserialize_group"
        )]
        group: Option<usize>,
    },
    /// The argument following one of the flags (`--password X`, `--password=X`).
    FlagValue { flags: Vec<String> },
    /// A command segment whose first word is one of the names.
    Command { names: Vec<String> },
    /// The entire value.
    Whole,
    /// Every path component not in `keep`.
    PathComponents {
        #[serde(default)]
        keep: Vec<String>,
    },
    /// User, host and path segments of a remote URL.
    RemoteUrl,
    /// Every command-line token not in `keep`.
    Tokens {
        #[serde(default)]
        keep: Vec<String>,
        #[serde(default = "default_true")]
        keep_flags: bool,
    },
}

fn default_true() -> bool {
    true
}

/// Tagged-enum content reaches us as buffered JSON, so read through `Value`.
fn deserialize_group<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid capture group: {}", value))),
    }
}

impl MatcherSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            MatcherSpec::Pattern { .. } => "pattern",
            MatcherSpec::FlagValue { .. } => "flag_value",
            MatcherSpec::Command { .. } => "command",
            MatcherSpec::Whole => "whole",
            MatcherSpec::PathComponents { .. } => "path_components",
            MatcherSpec::RemoteUrl => "remote_url",
            MatcherSpec::Tokens { .. } => "tokens",
        }
    }
}

/// Built-in rule presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Targeted secret rules plus identifier, path and remote hashing.
    Standard,
    /// Standard plus hashing of every non-allowlisted command-line token.
    #[default]
    Strict,
    /// No built-in rules.
    Empty,
}

impl Preset {
    pub const ALL: &'static [Preset] = &[Preset::Standard, Preset::Strict, Preset::Empty];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Standard => "standard",
            Preset::Strict => "strict",
            Preset::Empty => "empty",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(Preset::Standard),
            "strict" | "paranoid" | "default" => Some(Preset::Strict),
            "empty" | "none" => Some(Preset::Empty),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Preset::Standard => "Hash secrets in command lines, identifiers, paths and git remotes",
            Preset::Strict => "Standard rules plus hashing of every uncommon command-line token",
            Preset::Empty => "No built-in rules; only rules from the rules file apply",
        }
    }

    /// The rules this preset contributes.
    pub fn rules(&self) -> Vec<RuleSpec> {
        match self {
            Preset::Standard => standard_rules(),
            Preset::Strict => {
                let mut rules = standard_rules();
                rules.push(
                    RuleSpec::new(
                        "command-tokens",
                        &["@cmd_line", "@command"],
                        MatcherSpec::Tokens {
                            keep: COMMON_WORDS.iter().map(|s| s.to_string()).collect(),
                            keep_flags: true,
                        },
                        Scope::Span,
                        10,
                    )
                    .with_description("Every command-line word outside the common vocabulary"),
                );
                rules
            }
            Preset::Empty => Vec::new(),
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::parse_str(s).ok_or_else(|| format!("unknown preset: {}", s))
    }
}

/// Commands whose whole invocation is treated as sensitive.
const DENYLISTED_COMMANDS: &[&str] = &["sshpass", "htpasswd", "chpasswd", "mysql_config_editor"];

/// Flags whose following argument is a credential.
const SECRET_FLAGS: &[&str] = &[
    "--password",
    "--passwd",
    "--pass",
    "--token",
    "--access-token",
    "--auth-token",
    "--api-key",
    "--apikey",
    "--secret",
    "--client-secret",
    "--passphrase",
];

/// Path components that stay readable in sanitized paths.
const COMMON_PATH_COMPONENTS: &[&str] = &[
    "~", ".", "..", "home", "Users", "root", "usr", "bin", "sbin", "lib", "lib64", "etc", "var",
    "tmp", "opt", "srv", "mnt", "media", "dev", "proc", "sys", "run", "share", "local", "src",
    "include", "log", "cache", "Library", "Applications", "Documents", "Downloads", "Desktop",
    ".config", ".local", ".cache", ".git", ".ssh", "git", "go", "projects", "workspace", "work",
    "code", "repos", "node_modules", "target", "build", "dist", "debug", "release", "test",
    "tests", "docs", "scripts",
];

/// Common command words kept readable under the strict preset.
const COMMON_WORDS: &[&str] = &[
    "sudo", "env", "ls", "ll", "cd", "pwd", "cat", "less", "more", "head", "tail", "grep", "rg",
    "find", "fd", "sed", "awk", "sort", "uniq", "wc", "cut", "tr", "xargs", "echo", "printf",
    "cp", "mv", "rm", "mkdir", "rmdir", "touch", "chmod", "chown", "ln", "tar", "zip", "unzip",
    "gzip", "curl", "wget", "ssh", "scp", "rsync", "ping", "git", "add", "commit", "push",
    "pull", "fetch", "status", "diff", "log", "checkout", "switch", "branch", "merge", "rebase",
    "stash", "clone", "init", "reset", "show", "tag", "remote", "make", "cargo", "build", "run",
    "test", "check", "install", "update", "upgrade", "npm", "yarn", "pnpm", "node", "python",
    "python3", "pip", "pip3", "go", "docker", "kubectl", "get", "describe", "apply", "delete",
    "logs", "exec", "ps", "top", "htop", "kill", "killall", "man", "which", "history", "source",
    "export", "vim", "vi", "nvim", "nano", "code", "emacs", "tmux", "screen", "clear", "exit",
    "true", "false", "systemctl", "journalctl", "start", "stop", "restart", "apt", "brew", "jq",
    "|", "||", "&&", ";", ">", ">>", "<", "2>&1", "&", ".", "..", "~", "-", "--",
];

fn standard_rules() -> Vec<RuleSpec> {
    let strs = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let pattern = |p: &str| MatcherSpec::Pattern {
        pattern: p.to_string(),
        group: None,
    };

    vec![
        RuleSpec::new(
            "denylisted-command",
            &["@cmd_line"],
            MatcherSpec::Command {
                names: strs(DENYLISTED_COMMANDS),
            },
            Scope::Field,
            100,
        )
        .with_description("Whole command line when it invokes a credential-handling tool"),
        RuleSpec::new(
            "private-key-block",
            &["*"],
            pattern(r"-----BEGIN[A-Z ]*PRIVATE KEY-----"),
            Scope::Field,
            95,
        )
        .with_description("Any value embedding a PEM private key"),
        RuleSpec::new("aws-access-key", &["*"], pattern(r"AKIA[0-9A-Z]{16}"), Scope::Span, 80),
        RuleSpec::new(
            "github-token",
            &["*"],
            pattern(r"gh[pousr]_[A-Za-z0-9_]{36,}"),
            Scope::Span,
            80,
        ),
        RuleSpec::new(
            "gitlab-token",
            &["*"],
            pattern(r"glpat-[A-Za-z0-9\-_]{20,}"),
            Scope::Span,
            80,
        ),
        RuleSpec::new(
            "slack-token",
            &["*"],
            pattern(r"xox[baprs]-[A-Za-z0-9\-]+"),
            Scope::Span,
            80,
        ),
        RuleSpec::new(
            "jwt",
            &["*"],
            pattern(r"eyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+"),
            Scope::Span,
            80,
        ),
        RuleSpec::new(
            "ai-api-key",
            &["*"],
            pattern(r"sk-(?:ant-)?[A-Za-z0-9_-]{20,}"),
            Scope::Span,
            80,
        ),
        RuleSpec::new(
            "bearer-token",
            &["@cmd_line"],
            pattern(r"(?i)\bbearer\s+(?P<secret>[A-Za-z0-9._~+/=-]+)"),
            Scope::Span,
            70,
        )
        .with_description("Credential following an HTTP Bearer scheme"),
        RuleSpec::new(
            "basic-auth",
            &["@cmd_line"],
            pattern(r"(?i)\bbasic\s+(?P<secret>[A-Za-z0-9+/]{8,}={0,2})"),
            Scope::Span,
            70,
        ),
        RuleSpec::new(
            "url-credentials",
            &["*"],
            pattern(r"[A-Za-z][A-Za-z0-9+.-]*://[^/\s:@]+:(?P<secret>[^@\s/]+)@"),
            Scope::Span,
            65,
        )
        .with_description("Password part of user:password@ in URLs"),
        RuleSpec::new(
            "secret-flags",
            &["@cmd_line"],
            MatcherSpec::FlagValue {
                flags: strs(SECRET_FLAGS),
            },
            Scope::Span,
            60,
        )
        .with_description("Argument following a credential flag"),
        RuleSpec::new(
            "secret-assignment",
            &["@cmd_line"],
            pattern(
                r#"(?i)\b[A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD|PASSWD|CREDENTIALS?|AUTH)[A-Z0-9_]*=(?P<secret>"[^"]*"|'[^']*'|[^\s'"]+)"#,
            ),
            Scope::Span,
            55,
        )
        .with_description("Value assigned to a secret-looking variable"),
        RuleSpec::new("identifiers", &["@identifier"], MatcherSpec::Whole, Scope::Field, 50)
            .with_description("Host, login, machine and session identifiers"),
        RuleSpec::new(
            "paths",
            &["@path"],
            MatcherSpec::PathComponents {
                keep: strs(COMMON_PATH_COMPONENTS),
            },
            Scope::Span,
            40,
        ),
        RuleSpec::new("git-remotes", &["@remote"], MatcherSpec::RemoteUrl, Scope::Span, 40),
    ]
}

/// Hash settings section of the rules file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<HashAlgorithm>,

    /// Key file for keyed algorithms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

/// Rules file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesFile {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Preset the file's rules extend.
    #[serde(default)]
    pub preset: Preset,

    /// Use only this file's rules, ignoring the preset.
    #[serde(default)]
    pub replace_preset: bool,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,

    #[serde(default)]
    pub hash: HashSection,
}

fn default_schema_version() -> String {
    RULES_SCHEMA_VERSION.to_string()
}

impl Default for RulesFile {
    fn default() -> Self {
        Self::from_preset(Preset::default())
    }
}

impl RulesFile {
    /// A rules file that only selects a preset.
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            schema_version: RULES_SCHEMA_VERSION.to_string(),
            preset,
            replace_preset: false,
            rules: Vec::new(),
            hash: HashSection::default(),
        }
    }

    /// Load a rules file.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse rules file JSON.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let file: RulesFile = serde_json::from_str(content)?;
        if file.schema_version != RULES_SCHEMA_VERSION {
            return Err(crate::RedactionError::config(format!(
                "rules schema version mismatch: expected {}, got {}",
                RULES_SCHEMA_VERSION, file.schema_version
            )));
        }
        Ok(file)
    }

    /// Save the rules file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Preset rules followed by this file's own rules.
    pub fn effective_rules(&self) -> Vec<RuleSpec> {
        let mut rules = if self.replace_preset {
            Vec::new()
        } else {
            self.preset.rules()
        };
        rules.extend(self.rules.iter().cloned());
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_file() {
        let file = RulesFile::default();
        assert_eq!(file.schema_version, RULES_SCHEMA_VERSION);
        assert_eq!(file.preset, Preset::Strict);
        assert!(file
            .effective_rules()
            .iter()
            .any(|r| r.name == "command-tokens"));
        assert!(!file.effective_rules().is_empty());
    }

    #[test]
    fn test_strict_extends_standard() {
        let standard = Preset::Standard.rules();
        let strict = Preset::Strict.rules();
        assert_eq!(strict.len(), standard.len() + 1);
        assert!(strict.iter().any(|r| r.name == "command-tokens"));
        assert!(Preset::Empty.rules().is_empty());
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!(Preset::parse_str("STANDARD"), Some(Preset::Standard));
        assert_eq!(Preset::parse_str("paranoid"), Some(Preset::Strict));
        assert_eq!(Preset::parse_str("default"), Some(Preset::default()));
        assert_eq!("none".parse::<Preset>().unwrap(), Preset::Empty);
        assert!("lenient".parse::<Preset>().is_err());
    }

    #[test]
    fn test_parse_rules_file() {
        let json = r#"{
            "schema_version": "1.0.0",
            "preset": "empty",
            "rules": [
                {
                    "name": "internal-host",
                    "fields": ["cmdLine"],
                    "match": { "kind": "pattern", "pattern": "[a-z]+\\.corp\\.example" },
                    "scope": "span",
                    "priority": 5
                },
                {
                    "name": "login",
                    "fields": ["login"],
                    "match": { "kind": "whole" }
                }
            ],
            "hash": { "algorithm": "sha512" }
        }"#;
        let file = RulesFile::parse(json).unwrap();
        assert_eq!(file.preset, Preset::Empty);
        assert_eq!(file.hash.algorithm, Some(HashAlgorithm::Sha512));
        let rules = file.effective_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].matcher.kind(), "pattern");
        assert_eq!(rules[1].scope, Scope::Field);
        assert_eq!(rules[1].priority, 0);
    }

    #[test]
    fn test_pattern_capture_group_from_json() {
        let json = r#"{
            "preset": "empty",
            "rules": [
                {
                    "name": "ticket",
                    "match": { "kind": "pattern", "pattern": "ticket-([0-9]+)", "group": 1 }
                },
                {
                    "name": "plain",
                    "match": { "kind": "pattern", "pattern": "x", "group": null }
                }
            ]
        }"#;
        let file = RulesFile::parse(json).unwrap();
        assert_eq!(
            file.rules[0].matcher,
            MatcherSpec::Pattern {
                pattern: "ticket-([0-9]+)".to_string(),
                group: Some(1),
            }
        );
        assert!(matches!(
            file.rules[1].matcher,
            MatcherSpec::Pattern { group: None, .. }
        ));

        let negative = r#"{ "rules": [ { "name": "n", "match": { "kind": "pattern", "pattern": "x", "group": -1 } } ] }"#;
        assert!(RulesFile::parse(negative).is_err());
    }

    #[test]
    fn test_rejects_unknown_algorithm_and_version() {
        let bad_algo = r#"{ "hash": { "algorithm": "md5" } }"#;
        assert!(RulesFile::parse(bad_algo).unwrap_err().is_configuration());

        let bad_version = r#"{ "schema_version": "9.9.9" }"#;
        assert!(RulesFile::parse(bad_version).unwrap_err().is_configuration());
    }

    #[test]
    fn test_rules_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let mut file = RulesFile::from_preset(Preset::Strict);
        file.rules.push(RuleSpec::new(
            "custom",
            &["*"],
            MatcherSpec::Whole,
            Scope::Field,
            1,
        ));
        file.save(&path).unwrap();
        let loaded = RulesFile::load(&path).unwrap();
        assert_eq!(loaded, file);
    }
}
