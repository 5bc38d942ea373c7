//! Compliance rules.
//!
//! A rule is a pure function of one file: it sees the project-relative path
//! and the current content and returns a [`RuleOutcome`]. Rules never write;
//! remediated content is handed back to the gate, which owns the write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use convoy_core::config::{ComplianceConfig, RuleConfig};
use convoy_core::{Issue, IssueKind, ProjectName, Severity, Stage};
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::error::GateError;

// ---------------------------------------------------------------------------
// Rule contract
// ---------------------------------------------------------------------------

/// What a rule knows about the file it evaluates.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    pub project: &'a ProjectName,
    /// Path relative to the project root.
    pub relative: &'a Path,
    /// Whether remediating rules may produce fixed content.
    pub remediate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Violations(Vec<Issue>),
    /// `fixed` is the full new file content. `issues` holds one `info` record
    /// per fix plus any violations the rule could not fix.
    Remediable { issues: Vec<Issue>, fixed: String },
}

pub trait ComplianceRule: Send + Sync {
    fn id(&self) -> &str;
    fn applies_to(&self, relative: &Path) -> bool;
    fn evaluate(&self, ctx: &FileContext<'_>, content: &str) -> RuleOutcome;
}

/// Instantiate the configured rule set, in configuration order.
pub fn build_rules(config: &ComplianceConfig) -> Result<Vec<Box<dyn ComplianceRule>>, GateError> {
    let year = chrono::Utc::now().year();
    let mut rules: Vec<Box<dyn ComplianceRule>> = Vec::with_capacity(config.rules.len());
    for rule in &config.rules {
        match rule {
            RuleConfig::RequiredHeader { needle, header, extensions, search_lines, remediate } => {
                rules.push(Box::new(RequiredHeader {
                    needle: needle.clone(),
                    header: header.clone(),
                    extensions: lowercase_all(extensions),
                    search_lines: *search_lines,
                    remediate: *remediate,
                    year,
                }));
            }
            RuleConfig::ForbiddenTerms { terms, replacements, extensions, remediate } => {
                rules.push(Box::new(ForbiddenTerms::new(
                    terms,
                    replacements,
                    extensions,
                    *remediate,
                )?));
            }
            RuleConfig::ManifestSchema { files, required_keys } => {
                rules.push(Box::new(ManifestSchema {
                    files: files.clone(),
                    required_keys: required_keys.clone(),
                }));
            }
            RuleConfig::YamlSyntax => rules.push(Box::new(YamlSyntax)),
        }
    }
    Ok(rules)
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.trim_start_matches('.').to_lowercase()).collect()
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn violation(ctx: &FileContext<'_>, severity: Severity, line: Option<usize>, msg: String) -> Issue {
    Issue::blocking(Stage::Compliance, IssueKind::ComplianceViolation, severity, msg)
        .at(ctx.relative, line)
}

fn remediated(ctx: &FileContext<'_>, line: Option<usize>, msg: String) -> Issue {
    Issue::info(Stage::Compliance, IssueKind::Remediated, msg).at(ctx.relative, line)
}

// ---------------------------------------------------------------------------
// required_header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    Line(&'static str),
    Block(&'static str, &'static str),
}

fn comment_style(path: &Path) -> Option<CommentStyle> {
    let ext = extension_of(path)?;
    let style = match ext.as_str() {
        "py" | "sh" | "bash" | "rb" | "pl" | "r" | "yaml" | "yml" | "toml" | "cmake" | "mk" => {
            CommentStyle::Line("#")
        }
        "js" | "jsx" | "ts" | "tsx" | "go" | "rs" | "java" | "kt" | "scala" | "swift" | "c"
        | "cc" | "cpp" | "cxx" | "h" | "hh" | "hpp" | "cs" | "dart" | "proto" => {
            CommentStyle::Line("//")
        }
        "sql" | "lua" | "hs" => CommentStyle::Line("--"),
        "css" => CommentStyle::Block("/*", "*/"),
        "html" | "xml" | "md" => CommentStyle::Block("<!--", "-->"),
        _ => return None,
    };
    Some(style)
}

/// Prepend `header` in `style`, after a leading shebang line if present.
fn insert_header(content: &str, header: &str, style: CommentStyle) -> String {
    let mut out = String::with_capacity(content.len() + header.len() + 16);
    let rest = if content.starts_with("#!") {
        match content.find('\n') {
            Some(i) => {
                out.push_str(&content[..=i]);
                &content[i + 1..]
            }
            None => {
                out.push_str(content);
                out.push('\n');
                ""
            }
        }
    } else {
        content
    };

    for line in header.lines() {
        let commented = match style {
            CommentStyle::Line(prefix) => format!("{prefix} {line}"),
            CommentStyle::Block(open, close) => format!("{open} {line} {close}"),
        };
        out.push_str(commented.trim_end());
        out.push('\n');
    }
    if !rest.is_empty() {
        out.push('\n');
        out.push_str(rest);
    }
    out
}

pub struct RequiredHeader {
    needle: String,
    header: String,
    extensions: Vec<String>,
    search_lines: usize,
    remediate: bool,
    year: i32,
}

impl RequiredHeader {
    fn render(&self, project: &ProjectName) -> String {
        self.header
            .replace("{year}", &self.year.to_string())
            .replace("{project}", project.as_str())
    }
}

impl ComplianceRule for RequiredHeader {
    fn id(&self) -> &str {
        "required_header"
    }

    fn applies_to(&self, relative: &Path) -> bool {
        extension_of(relative)
            .map(|e| self.extensions.contains(&e))
            .unwrap_or(false)
    }

    fn evaluate(&self, ctx: &FileContext<'_>, content: &str) -> RuleOutcome {
        if content
            .lines()
            .take(self.search_lines)
            .any(|l| l.contains(&self.needle))
        {
            return RuleOutcome::Pass;
        }

        if ctx.remediate && self.remediate {
            if let Some(style) = comment_style(ctx.relative) {
                let header = self.render(ctx.project);
                return RuleOutcome::Remediable {
                    issues: vec![remediated(ctx, Some(1), format!("inserted header '{header}'"))],
                    fixed: insert_header(content, &header, style),
                };
            }
        }

        RuleOutcome::Violations(vec![violation(
            ctx,
            Severity::Medium,
            None,
            format!(
                "missing '{}' header in the first {} lines",
                self.needle, self.search_lines
            ),
        )])
    }
}

// ---------------------------------------------------------------------------
// forbidden_terms
// ---------------------------------------------------------------------------

struct Term {
    term: String,
    pattern: Regex,
    replacement: Option<String>,
}

pub struct ForbiddenTerms {
    terms: Vec<Term>,
    extensions: Vec<String>,
    remediate: bool,
}

impl ForbiddenTerms {
    pub fn new(
        terms: &[String],
        replacements: &BTreeMap<String, String>,
        extensions: &[String],
        remediate: bool,
    ) -> Result<Self, GateError> {
        let mut compiled = Vec::with_capacity(terms.len());
        for term in terms {
            let pattern = Regex::new(&format!("(?i){}", regex::escape(term))).map_err(|e| {
                GateError::Pattern { term: term.clone(), source: e }
            })?;
            let replacement = replacements
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(term))
                .map(|(_, v)| v.clone());
            compiled.push(Term { term: term.clone(), pattern, replacement });
        }
        Ok(Self {
            terms: compiled,
            extensions: lowercase_all(extensions),
            remediate,
        })
    }
}

impl ComplianceRule for ForbiddenTerms {
    fn id(&self) -> &str {
        "forbidden_terms"
    }

    fn applies_to(&self, relative: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        extension_of(relative)
            .map(|e| self.extensions.contains(&e))
            .unwrap_or(false)
    }

    fn evaluate(&self, ctx: &FileContext<'_>, content: &str) -> RuleOutcome {
        let mut issues = Vec::new();
        let mut fixed_any = false;
        let mut output = String::with_capacity(content.len());

        for (idx, line) in content.split_inclusive('\n').enumerate() {
            let line_no = idx + 1;
            let mut current = line.to_string();
            for term in &self.terms {
                if !term.pattern.is_match(&current) {
                    continue;
                }
                let fix = term
                    .replacement
                    .as_deref()
                    .filter(|_| ctx.remediate && self.remediate);
                for m in term.pattern.find_iter(&current) {
                    let found = m.as_str();
                    let issue = match fix {
                        Some(repl) => remediated(
                            ctx,
                            Some(line_no),
                            format!("replaced '{found}' with '{}'", shape_like(found, repl)),
                        ),
                        None => violation(
                            ctx,
                            Severity::High,
                            Some(line_no),
                            match &term.replacement {
                                Some(repl) => format!("forbidden term '{found}' (use '{repl}')"),
                                None => format!("forbidden term '{found}'"),
                            },
                        ),
                    };
                    issues.push(issue);
                }
                if let Some(repl) = fix {
                    current = term
                        .pattern
                        .replace_all(&current, |caps: &Captures| shape_like(&caps[0], repl))
                        .into_owned();
                    fixed_any = true;
                }
            }
            output.push_str(&current);
        }

        if issues.is_empty() {
            RuleOutcome::Pass
        } else if fixed_any {
            RuleOutcome::Remediable { issues, fixed: output }
        } else {
            RuleOutcome::Violations(issues)
        }
    }
}

impl std::fmt::Debug for ForbiddenTerms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForbiddenTerms")
            .field("terms", &self.terms.iter().map(|t| &t.term).collect::<Vec<_>>())
            .field("remediate", &self.remediate)
            .finish()
    }
}

/// Give `replacement` the case shape of `matched`: UPPER, Title or as configured.
fn shape_like(matched: &str, replacement: &str) -> String {
    let letters: Vec<char> = matched.chars().filter(|c| c.is_alphabetic()).collect();
    match letters.first() {
        None => replacement.to_string(),
        Some(_) if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) => {
            replacement.to_uppercase()
        }
        Some(first) if first.is_uppercase() => title_case(replacement),
        Some(_) => replacement.to_string(),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// manifest_schema
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ManifestSchema {
    files: Vec<PathBuf>,
    required_keys: Vec<String>,
}

impl ComplianceRule for ManifestSchema {
    fn id(&self) -> &str {
        "manifest_schema"
    }

    fn applies_to(&self, relative: &Path) -> bool {
        self.files.iter().any(|f| f == relative)
    }

    fn evaluate(&self, ctx: &FileContext<'_>, content: &str) -> RuleOutcome {
        let value: serde_yaml::Value = if content.trim().is_empty() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            match serde_yaml::from_str(content) {
                Ok(v) => v,
                Err(e) => {
                    let line = e.location().map(|l| l.line());
                    return RuleOutcome::Violations(vec![violation(
                        ctx,
                        Severity::High,
                        line,
                        format!("manifest does not parse: {e}"),
                    )]);
                }
            }
        };

        let Some(map) = value.as_mapping() else {
            return RuleOutcome::Violations(vec![violation(
                ctx,
                Severity::High,
                None,
                "manifest must be a YAML mapping".to_string(),
            )]);
        };

        let missing: Vec<Issue> = self
            .required_keys
            .iter()
            .filter(|k| !map.contains_key(k.as_str()))
            .map(|k| violation(ctx, Severity::High, None, format!("missing required key '{k}'")))
            .collect();
        if missing.is_empty() {
            RuleOutcome::Pass
        } else {
            RuleOutcome::Violations(missing)
        }
    }
}

// ---------------------------------------------------------------------------
// yaml_syntax
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct YamlSyntax;

impl ComplianceRule for YamlSyntax {
    fn id(&self) -> &str {
        "yaml_syntax"
    }

    fn applies_to(&self, relative: &Path) -> bool {
        matches!(extension_of(relative).as_deref(), Some("yaml" | "yml"))
    }

    fn evaluate(&self, ctx: &FileContext<'_>, content: &str) -> RuleOutcome {
        for doc in serde_yaml::Deserializer::from_str(content) {
            if let Err(e) = serde_yaml::Value::deserialize(doc) {
                let line = e.location().map(|l| l.line());
                return RuleOutcome::Violations(vec![violation(
                    ctx,
                    Severity::High,
                    line,
                    format!("invalid YAML: {e}"),
                )]);
            }
        }
        RuleOutcome::Pass
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
