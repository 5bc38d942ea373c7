//! Markdown audit reports.
//!
//! ```text
//! **Project**: libpng                     (document default, optional)
//!
//! ### 1. Vulnerability: Heap overflow in chunk parser
//! **Severity**: CRITICAL
//! **Project**: libpng                     (overrides the default)
//! **CWE**: CWE-122
//! **CVSS Vector**: `CVSS:3.1/AV:N/...`
//! **Summary**: one line
//! ```
//!
//! Each `### N. Vulnerability:` heading starts a section. Sections are parsed
//! independently; one that cannot be attributed or graded is skipped.

use std::path::Path;
use std::sync::OnceLock;

use convoy_core::{ProjectName, Severity};
use regex::Regex;
use tracing::warn;

use crate::finding::{SecurityFinding, SkippedSection};

fn section_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^###\s+(\d+)\.\s+Vulnerability:[ \t]*(.*)$").expect("valid heading regex")
    })
}

fn field(name: &'static str) -> Regex {
    Regex::new(&format!(r"(?m)^[ \t]*(?:[-*][ \t]+)?\*\*{name}\*\*:[ \t]*(.+?)[ \t]*$"))
        .expect("valid field regex")
}

struct Fields {
    severity: Regex,
    project: Regex,
    cwe: Regex,
    cvss: Regex,
    summary: Regex,
}

fn fields() -> &'static Fields {
    static FIELDS: OnceLock<Fields> = OnceLock::new();
    FIELDS.get_or_init(|| Fields {
        severity: field("Severity"),
        project: field("Project"),
        cwe: field("CWE"),
        cvss: field("CVSS Vector"),
        summary: field("Summary"),
    })
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
}

fn clean_project(raw: &str) -> String {
    raw.trim_matches(|c: char| c == '`' || c == '*' || c.is_whitespace())
        .to_string()
}

/// Parse every vulnerability section in `content`.
pub fn parse(source: &Path, content: &str) -> (Vec<SecurityFinding>, Vec<SkippedSection>) {
    let headings: Vec<_> = section_heading().captures_iter(content).collect();
    let preamble_end = headings
        .first()
        .and_then(|c| c.get(0))
        .map(|m| m.start())
        .unwrap_or(content.len());
    let default_project = capture(&fields().project, &content[..preamble_end]).map(clean_project);

    let mut findings = Vec::new();
    let mut skipped = Vec::new();

    for (i, caps) in headings.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let body_end = headings
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map(|m| m.start())
            .unwrap_or(content.len());
        let body = &content[whole.end()..body_end];
        let number: usize = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(i + 1);
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

        match parse_section(source, number, title, body, default_project.as_deref()) {
            Ok(f) => findings.push(f),
            Err(reason) => {
                warn!(source = %source.display(), section = number, %reason, "skipping advisory section");
                skipped.push(SkippedSection {
                    source: source.to_path_buf(),
                    index: number,
                    reason,
                });
            }
        }
    }
    (findings, skipped)
}

fn parse_section(
    source: &Path,
    number: usize,
    title: &str,
    body: &str,
    default_project: Option<&str>,
) -> Result<SecurityFinding, String> {
    let f = fields();
    if title.is_empty() {
        return Err("section has no title".to_string());
    }
    let project = capture(&f.project, body)
        .map(clean_project)
        .or_else(|| default_project.map(str::to_string))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "section names no project".to_string())?;
    let severity_raw = capture(&f.severity, body).ok_or_else(|| "section has no severity".to_string())?;
    let severity: Severity = severity_raw
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches('*')
        .parse()?;

    Ok(SecurityFinding {
        id: format!("VULN-{number:03}"),
        project: ProjectName::from(project),
        severity,
        title: title.to_string(),
        description: capture(&f.summary, body).unwrap_or_default().to_string(),
        cwe: capture(&f.cwe, body).map(str::to_string),
        cvss: capture(&f.cvss, body).map(|s| s.trim_matches('`').to_string()),
        source: source.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIT: &str = r#"# Security Audit

**Project**: libpng

## Findings

### 1. Vulnerability: Heap overflow in chunk parser
**Severity**: CRITICAL
**CWE**: CWE-122
**CVSS Vector**: `CVSS:3.1/AV:N/AC:L`
**Summary**: Oversized chunk length overflows the buffer.

### 2. Vulnerability: Integer truncation
**Severity**: Medium
**Project**: zlib

### 3. Vulnerability: Unrated issue
**Project**: zlib

### 4. Vulnerability: Bogus grade
**Severity**: Apocalyptic
"#;

    #[test]
    fn parses_sections_and_skips_bad_ones() {
        let (findings, skipped) = parse(Path::new("audit.md"), AUDIT);
        assert_eq!(findings.len(), 2);
        assert_eq!(skipped.len(), 2);

        let first = &findings[0];
        assert_eq!(first.id, "VULN-001");
        assert_eq!(first.project, ProjectName::from("libpng"));
        assert_eq!(first.severity, Severity::Critical);
        assert_eq!(first.cwe.as_deref(), Some("CWE-122"));
        assert_eq!(first.cvss.as_deref(), Some("CVSS:3.1/AV:N/AC:L"));
        assert_eq!(first.description, "Oversized chunk length overflows the buffer.");

        let second = &findings[1];
        assert_eq!(second.id, "VULN-002");
        assert_eq!(second.project, ProjectName::from("zlib"));
        assert_eq!(second.severity, Severity::Medium);

        assert_eq!(skipped[0].index, 3);
        assert!(skipped[0].reason.contains("severity"));
        assert_eq!(skipped[1].index, 4);
        assert!(skipped[1].reason.contains("unknown severity"));
    }

    #[test]
    fn section_without_any_project_is_skipped() {
        let doc = "### 1. Vulnerability: Orphan\n**Severity**: HIGH\n";
        let (findings, skipped) = parse(Path::new("a.md"), doc);
        assert!(findings.is_empty());
        assert_eq!(skipped[0].reason, "section names no project");
    }

    #[test]
    fn section_without_title_is_skipped() {
        let doc = "**Project**: x\n### 1. Vulnerability:\n**Severity**: HIGH\n";
        let (findings, skipped) = parse(Path::new("a.md"), doc);
        assert!(findings.is_empty());
        assert_eq!(skipped[0].reason, "section has no title");
    }

    #[test]
    fn document_without_sections_yields_nothing() {
        let (findings, skipped) = parse(Path::new("a.md"), "# Clean audit\nNo issues.\n");
        assert!(findings.is_empty() && skipped.is_empty());
    }
}
