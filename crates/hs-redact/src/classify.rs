//! Sensitivity classification.
//!
//! Compiles [`RuleSpec`]s into matchers and resolves, for one field value,
//! the set of byte spans that must be redacted. Rules are applied in
//! priority order; a span already claimed by a higher-priority rule is
//! never claimed again, and a lower-priority span that overlaps claimed
//! bytes keeps only its unclaimed remainder.

use crate::error::{RedactionError, Result};
use crate::field_class::FieldSelector;
use crate::rules::{MatcherSpec, RuleSpec};
use crate::Scope;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;

/// One span of a field value claimed by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    /// Byte range within the value. Empty only for a whole-field
    /// redaction of an empty value.
    pub span: Range<usize>,
    /// Name of the rule that claimed the span.
    pub rule: String,
}

#[derive(Debug)]
enum Matcher {
    Pattern { regex: Regex, group: Option<usize> },
    FlagValue { flags: Vec<String> },
    Command { names: HashSet<String> },
    Whole,
    PathComponents { keep: HashSet<String> },
    RemoteUrl,
    Tokens { keep: HashSet<String>, keep_flags: bool },
}

/// A compiled rule.
#[derive(Debug)]
pub struct Rule {
    spec: RuleSpec,
    selectors: Vec<FieldSelector>,
    matcher: Matcher,
}

impl Rule {
    fn compile(spec: RuleSpec) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(RedactionError::config("rule name must not be empty"));
        }
        if spec.fields.is_empty() {
            return Err(RedactionError::config(format!(
                "rule '{}' selects no fields",
                spec.name
            )));
        }
        let selectors = spec
            .fields
            .iter()
            .map(|f| FieldSelector::parse(f))
            .collect::<Result<Vec<_>>>()?;
        let matcher = compile_matcher(&spec.name, &spec.matcher)?;
        Ok(Self {
            spec,
            selectors,
            matcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Returns whether the rule applies to the named field.
    pub fn selects(&self, field: &str) -> bool {
        self.selectors.iter().any(|s| s.matches(field))
    }

    /// Raw spans found by the matcher, before scope widening.
    fn find(&self, value: &str) -> Vec<Range<usize>> {
        match &self.matcher {
            Matcher::Pattern { regex, group } => regex
                .captures_iter(value)
                .filter_map(|caps| {
                    caps.name("secret")
                        .or_else(|| group.and_then(|g| caps.get(g)))
                        .or_else(|| caps.get(0))
                        .map(|m| m.range())
                })
                .collect(),
            Matcher::FlagValue { flags } => find_flag_values(value, flags),
            Matcher::Command { names } => find_commands(value, names),
            Matcher::Whole => vec![0..value.len()],
            Matcher::PathComponents { keep } => find_path_components(value, 0, keep),
            Matcher::RemoteUrl => find_remote_parts(value),
            Matcher::Tokens { keep, keep_flags } => lex(value)
                .into_iter()
                .filter(|t| !keep_token(&t.text, keep, *keep_flags))
                .map(|t| t.span)
                .collect(),
        }
    }
}

fn compile_matcher(rule: &str, spec: &MatcherSpec) -> Result<Matcher> {
    let to_set = |items: &[String]| items.iter().cloned().collect::<HashSet<_>>();
    match spec {
        MatcherSpec::Pattern { pattern, group } => {
            let regex = Regex::new(pattern).map_err(|e| RedactionError::Pattern {
                rule: rule.to_string(),
                message: e.to_string(),
            })?;
            if let Some(g) = group {
                if *g >= regex.captures_len() {
                    return Err(RedactionError::config(format!(
                        "rule '{}' references capture group {} but the pattern has {}",
                        rule,
                        g,
                        regex.captures_len() - 1
                    )));
                }
            }
            Ok(Matcher::Pattern {
                regex,
                group: *group,
            })
        }
        MatcherSpec::FlagValue { flags } => {
            if flags.is_empty() || flags.iter().any(|f| !f.starts_with('-') || f.len() < 2) {
                return Err(RedactionError::config(format!(
                    "rule '{}' needs at least one flag, each starting with '-'",
                    rule
                )));
            }
            Ok(Matcher::FlagValue {
                flags: flags.clone(),
            })
        }
        MatcherSpec::Command { names } => {
            if names.is_empty() || names.iter().any(|n| n.trim().is_empty()) {
                return Err(RedactionError::config(format!(
                    "rule '{}' needs at least one non-empty command name",
                    rule
                )));
            }
            Ok(Matcher::Command {
                names: to_set(names),
            })
        }
        MatcherSpec::Whole => Ok(Matcher::Whole),
        MatcherSpec::PathComponents { keep } => Ok(Matcher::PathComponents {
            keep: to_set(keep),
        }),
        MatcherSpec::RemoteUrl => Ok(Matcher::RemoteUrl),
        MatcherSpec::Tokens { keep, keep_flags } => Ok(Matcher::Tokens {
            keep: to_set(keep),
            keep_flags: *keep_flags,
        }),
    }
}

/// A compiled, priority-ordered rule set.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile rule specs. Any invalid rule fails the whole set.
    pub fn compile(specs: Vec<RuleSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.clone()) {
                return Err(RedactionError::config(format!(
                    "duplicate rule name '{}'",
                    spec.name
                )));
            }
        }

        let mut rules = specs
            .into_iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>>>()?;
        // Stable sort keeps declaration order among equal priorities.
        rules.sort_by_key(|r| std::cmp::Reverse(r.spec.priority));
        Ok(Self { rules })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the redactions for one field value.
    ///
    /// Returned spans are sorted and non-overlapping.
    pub fn classify(&self, field: &str, value: &str) -> Vec<Redaction> {
        let mut claimed: Vec<Redaction> = Vec::new();

        for rule in self.rules.iter().filter(|r| r.selects(field)) {
            let found = rule.find(value);
            if found.is_empty() {
                continue;
            }

            if rule.spec.scope == Scope::Field || value.is_empty() {
                if value.is_empty() && rule.spec.scope == Scope::Span {
                    // Nothing to hide in an empty value at span granularity.
                    continue;
                }
                if claimed.is_empty() {
                    return vec![Redaction {
                        span: 0..value.len(),
                        rule: rule.spec.name.clone(),
                    }];
                }
                claim(&mut claimed, 0..value.len(), &rule.spec.name);
                continue;
            }

            for span in found {
                if span.start < span.end {
                    claim(&mut claimed, span, &rule.spec.name);
                }
            }
        }

        claimed.sort_by_key(|r| r.span.start);
        claimed
    }
}

/// Add the unclaimed parts of `span` to `claimed`.
fn claim(claimed: &mut Vec<Redaction>, span: Range<usize>, rule: &str) {
    let mut pieces = vec![span];
    for existing in claimed.iter() {
        pieces = pieces
            .into_iter()
            .flat_map(|p| subtract(p, &existing.span))
            .collect();
        if pieces.is_empty() {
            return;
        }
    }
    claimed.extend(pieces.into_iter().map(|span| Redaction {
        span,
        rule: rule.to_string(),
    }));
}

fn subtract(span: Range<usize>, taken: &Range<usize>) -> Vec<Range<usize>> {
    if taken.end <= span.start || taken.start >= span.end {
        return vec![span];
    }
    let mut out = Vec::with_capacity(2);
    if span.start < taken.start {
        out.push(span.start..taken.start);
    }
    if taken.end < span.end {
        out.push(taken.end..span.end);
    }
    out
}

/// A shell word with its byte span in the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Unquoted text of the word.
    pub text: String,
    /// Span of the raw word, quotes included.
    pub span: Range<usize>,
}

/// Split a command line into shell words.
///
/// Handles single quotes, double quotes and backslash escapes. An
/// unterminated quote extends the word to the end of the line.
pub fn lex(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();
    let mut current: Option<(usize, String)> = None;

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if let Some((start, text)) = current.take() {
                    tokens.push(Token { text, span: start..i });
                }
            }
            '\'' | '"' => {
                let (_, text) = current.get_or_insert_with(|| (i, String::new()));
                let quote = c;
                while let Some((_, q)) = chars.next() {
                    if q == quote {
                        break;
                    }
                    if q == '\\' && quote == '"' {
                        if let Some((_, escaped)) = chars.next() {
                            text.push(escaped);
                        }
                        continue;
                    }
                    text.push(q);
                }
            }
            '\\' => {
                let (_, text) = current.get_or_insert_with(|| (i, String::new()));
                if let Some((_, escaped)) = chars.next() {
                    text.push(escaped);
                }
            }
            _ => {
                let (_, text) = current.get_or_insert_with(|| (i, String::new()));
                text.push(c);
            }
        }
    }
    if let Some((start, text)) = current.take() {
        tokens.push(Token {
            text,
            span: start..line.len(),
        });
    }
    tokens
}

fn find_flag_values(line: &str, flags: &[String]) -> Vec<Range<usize>> {
    let tokens = lex(line);
    let mut spans = Vec::new();
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        for flag in flags {
            if token.text == *flag {
                if let Some(next) = iter.peek() {
                    spans.push(next.span.clone());
                }
                break;
            }
            if let Some(span) = attached_value(line, token, flag) {
                spans.push(span);
                break;
            }
        }
    }
    spans
}

/// Span of a value glued to `flag` inside one token (`--flag=v`, `-pv`).
/// When quoting hides the flag from the raw text, the whole token is the span.
fn attached_value(line: &str, token: &Token, flag: &str) -> Option<Range<usize>> {
    let is_short = !flag.starts_with("--") && flag.len() == 2;
    let glued = |rest: &str| match rest.strip_prefix('=') {
        Some(value) => Some(value.len()),
        None if is_short && !rest.is_empty() => Some(rest.len()),
        None => None,
    };

    let raw = &line[token.span.clone()];
    if let Some(rest) = raw.strip_prefix(flag) {
        return glued(rest)
            .filter(|len| *len > 0)
            .map(|len| token.span.end - len..token.span.end);
    }
    token
        .text
        .strip_prefix(flag)
        .and_then(glued)
        .filter(|len| *len > 0)
        .map(|_| token.span.clone())
}

static RE_SEGMENT_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\|?|&&|;|\$\(|`").unwrap());

static RE_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").unwrap());

/// Words that run the next word as the actual command.
const COMMAND_PREFIXES: &[&str] = &["sudo", "env", "nohup", "time", "command", "exec", "nice"];

fn find_commands(line: &str, names: &HashSet<String>) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut bounds: Vec<Range<usize>> = RE_SEGMENT_SEPARATOR
        .find_iter(line)
        .map(|m| {
            let seg = start..m.start();
            start = m.end();
            seg
        })
        .collect();
    bounds.push(start..line.len());

    for segment in bounds {
        let text = &line[segment.clone()];
        // After a wrapper word, any later word may be the command.
        let mut wrapped = false;
        for token in lex(text) {
            if RE_ASSIGNMENT.is_match(&token.text) {
                continue;
            }
            if COMMAND_PREFIXES.contains(&token.text.as_str()) {
                wrapped = true;
                continue;
            }
            let base = token.text.rsplit('/').next().unwrap_or(&token.text);
            if names.contains(base) {
                spans.push(segment.clone());
                break;
            }
            if !wrapped {
                break;
            }
        }
    }
    spans
}

fn find_path_components(path: &str, offset: usize, keep: &HashSet<String>) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut pos = 0;
    for component in path.split('/') {
        let start = pos;
        pos += component.len() + 1;
        if component.is_empty() || keep.contains(component) {
            continue;
        }
        spans.push(offset + start..offset + start + component.len());
    }
    spans
}

static RE_REMOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[A-Za-z][A-Za-z0-9+.-]*://)?(?:(?P<user>[^@/\s]+)@)?(?P<host>[^:/\s@]+)(?::(?P<port>\d+))?(?P<rest>[:/].*)?$",
    )
    .unwrap()
});

fn find_remote_parts(remote: &str) -> Vec<Range<usize>> {
    let none = HashSet::new();
    let Some(caps) = RE_REMOTE.captures(remote) else {
        // Local filesystem remote or something unrecognized: hash every component.
        return find_path_components(remote, 0, &none);
    };

    let mut spans = Vec::new();
    if let Some(user) = caps.name("user") {
        if user.as_str() != "git" {
            spans.push(user.range());
        }
    }
    if let Some(host) = caps.name("host") {
        spans.push(host.range());
    }
    if let Some(rest) = caps.name("rest") {
        let offset = rest.start();
        for span in find_path_components(&rest.as_str().replace(':', "/"), offset, &none) {
            let segment = &remote[span.clone()];
            match segment.strip_suffix(".git") {
                Some(stem) if !stem.is_empty() => spans.push(span.start..span.start + stem.len()),
                _ => spans.push(span),
            }
        }
    }
    spans
}

fn keep_token(text: &str, keep: &HashSet<String>, keep_flags: bool) -> bool {
    if keep.contains(text) {
        return true;
    }
    keep_flags && text.starts_with('-') && !text.contains('=')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Preset;

    fn rule(name: &str, fields: &[&str], matcher: MatcherSpec, scope: Scope, prio: i32) -> RuleSpec {
        RuleSpec::new(name, fields, matcher, scope, prio)
    }

    fn pattern(p: &str) -> MatcherSpec {
        MatcherSpec::Pattern {
            pattern: p.to_string(),
            group: None,
        }
    }

    fn spans_text<'a>(value: &'a str, redactions: &[Redaction]) -> Vec<&'a str> {
        redactions.iter().map(|r| &value[r.span.clone()]).collect()
    }

    #[test]
    fn test_lex_quotes_and_escapes() {
        let tokens = lex(r#"curl -H 'Authorization: Bearer X' "a\"b" c\ d"#);
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["curl", "-H", "Authorization: Bearer X", "a\"b", "c d"]);
        assert_eq!(tokens[2].span, 8..33);
    }

    #[test]
    fn test_lex_unterminated_quote_runs_to_end() {
        let tokens = lex("echo 'oops never closed");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].span.end, "echo 'oops never closed".len());
    }

    #[test]
    fn test_flag_value_forms() {
        let set = RuleSet::compile(vec![rule(
            "flags",
            &["*"],
            MatcherSpec::FlagValue {
                flags: vec!["--password".into(), "-p".into()],
            },
            Scope::Span,
            0,
        )])
        .unwrap();
        let line = "db --password hunter2 --password=swordfish -pletmein -p 'two words'";
        let found = set.classify("cmdLine", line);
        assert_eq!(
            spans_text(line, &found),
            vec!["hunter2", "swordfish", "letmein", "'two words'"]
        );
    }

    #[test]
    fn test_command_denylist_segments() {
        let set = RuleSet::compile(vec![rule(
            "deny",
            &["cmdLine"],
            MatcherSpec::Command {
                names: vec!["sshpass".into()],
            },
            Scope::Span,
            0,
        )])
        .unwrap();
        let line = "cd /srv && sudo /usr/bin/sshpass -p pw ssh host";
        let found = set.classify("cmdLine", line);
        assert_eq!(spans_text(line, &found), vec![" sudo /usr/bin/sshpass -p pw ssh host"]);
        assert!(set.classify("cmdLine", "echo sshpass").is_empty());
    }

    #[test]
    fn test_command_denylist_behind_wrapper_options() {
        let set = RuleSet::compile(vec![rule(
            "deny",
            &["cmdLine"],
            MatcherSpec::Command {
                names: vec!["sshpass".into()],
            },
            Scope::Span,
            0,
        )])
        .unwrap();
        for line in [
            "sudo -u deploy sshpass -p pw ssh host",
            "nice -n 10 sshpass -p pw ssh host",
            "env -u HOME sshpass -p pw ssh host",
            "time -f %e /usr/bin/sshpass -p pw ssh host",
            "FOO=1 sudo -E nohup sshpass -p pw ssh host",
        ] {
            let found = set.classify("cmdLine", line);
            assert_eq!(spans_text(line, &found), vec![line], "{}", line);
        }
        // Without a wrapper only the first word names the command.
        assert!(set.classify("cmdLine", "grep sshpass notes.txt").is_empty());
    }

    #[test]
    fn test_flag_value_inside_quoted_token() {
        let set = RuleSet::compile(vec![rule(
            "flags",
            &["*"],
            MatcherSpec::FlagValue {
                flags: vec!["--password".into(), "-p".into()],
            },
            Scope::Span,
            0,
        )])
        .unwrap();
        let line = r#"db "--password=x y" '-pquoted' --password="a b""#;
        let found = set.classify("cmdLine", line);
        assert_eq!(
            spans_text(line, &found),
            vec![r#""--password=x y""#, "'-pquoted'", r#""a b""#]
        );
    }

    #[test]
    fn test_path_components() {
        let set = RuleSet::compile(Preset::Standard.rules()).unwrap();
        let path = "/home/alice/projects/secret-app";
        let found = set.classify("pwd", path);
        assert_eq!(spans_text(path, &found), vec!["alice", "secret-app"]);
    }

    #[test]
    fn test_remote_url_parts() {
        let set = RuleSet::compile(Preset::Standard.rules()).unwrap();

        let scp = "git@github.com:acme/widgets.git";
        let found = set.classify("gitOriginRemote", scp);
        assert_eq!(spans_text(scp, &found), vec!["github.com", "acme", "widgets"]);

        let https = "https://bob@gitlab.example.com:8443/team/repo";
        let found = set.classify("gitOriginRemote", https);
        assert_eq!(
            spans_text(https, &found),
            vec!["bob", "gitlab.example.com", "team", "repo"]
        );

        let local = "/srv/git/repo.git";
        let found = set.classify("gitOriginRemote", local);
        assert_eq!(spans_text(local, &found), vec!["srv", "git", "repo.git"]);
    }

    #[test]
    fn test_priority_and_overlap_trimming() {
        let set = RuleSet::compile(vec![
            rule("low", &["*"], pattern("CDEFGH"), Scope::Span, 1),
            rule("high", &["*"], pattern("ABCDE"), Scope::Span, 10),
        ])
        .unwrap();
        let value = "xxABCDEFGHyy";
        let found = set.classify("f", value);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].rule, "high");
        assert_eq!(&value[found[0].span.clone()], "ABCDE");
        assert_eq!(found[1].rule, "low");
        assert_eq!(&value[found[1].span.clone()], "FGH");
    }

    #[test]
    fn test_contained_lower_span_discarded() {
        let set = RuleSet::compile(vec![
            rule("outer", &["*"], pattern("token=[a-z0-9]+"), Scope::Span, 5),
            rule("inner", &["*"], pattern("abc"), Scope::Span, 1),
        ])
        .unwrap();
        let found = set.classify("cmdLine", "x token=abc123");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule, "outer");
    }

    #[test]
    fn test_field_scope_claims_whole_value() {
        let set = RuleSet::compile(vec![rule(
            "any-digit",
            &["*"],
            pattern(r"\d"),
            Scope::Field,
            0,
        )])
        .unwrap();
        let found = set.classify("host", "box7.lan");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].span, 0..8);
    }

    #[test]
    fn test_empty_value_whole_field() {
        let set = RuleSet::compile(vec![rule(
            "ids",
            &["login"],
            MatcherSpec::Whole,
            Scope::Field,
            0,
        )])
        .unwrap();
        let found = set.classify("login", "");
        assert_eq!(found, vec![Redaction { span: 0..0, rule: "ids".into() }]);
    }

    #[test]
    fn test_unselected_field_untouched() {
        let set = RuleSet::compile(Preset::Standard.rules()).unwrap();
        assert!(set.classify("shell", "zsh").is_empty());
        assert!(set.classify("cmdLine", "ls -la").is_empty());
    }

    #[test]
    fn test_compile_errors() {
        let bad_regex = vec![rule("bad", &["*"], pattern("(unclosed"), Scope::Span, 0)];
        assert!(matches!(
            RuleSet::compile(bad_regex),
            Err(RedactionError::Pattern { .. })
        ));

        let dup = vec![
            rule("same", &["*"], MatcherSpec::Whole, Scope::Field, 0),
            rule("same", &["*"], MatcherSpec::Whole, Scope::Field, 0),
        ];
        assert!(RuleSet::compile(dup).unwrap_err().is_configuration());

        let no_flags = vec![rule(
            "flags",
            &["*"],
            MatcherSpec::FlagValue { flags: vec![] },
            Scope::Span,
            0,
        )];
        assert!(RuleSet::compile(no_flags).is_err());

        let bad_group = vec![rule(
            "group",
            &["*"],
            MatcherSpec::Pattern {
                pattern: "(a)".into(),
                group: Some(2),
            },
            Scope::Span,
            0,
        )];
        assert!(RuleSet::compile(bad_group).is_err());

        let bad_selector = vec![rule("sel", &["@bogus"], MatcherSpec::Whole, Scope::Field, 0)];
        assert!(RuleSet::compile(bad_selector).is_err());
    }

    #[test]
    fn test_standard_preset_compiles() {
        let set = RuleSet::compile(Preset::Strict.rules()).unwrap();
        let priorities: Vec<i32> = set.rules().iter().map(|r| r.spec().priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
    }
}
