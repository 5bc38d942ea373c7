//! Advisory ingestion from files on disk.

use std::fs;

use convoy_core::{ProjectName, Severity};
use convoy_security::{AdvisoryError, Advisories};
use rstest::rstest;
use tempfile::TempDir;

const MARKDOWN: &str = "\
**Project**: libpng

### 1. Vulnerability: Heap overflow
**Severity**: CRITICAL

### 2. Vulnerability: Info leak
**Severity**: LOW
**Project**: ghost
";

const JSON: &str = r#"{"findings": [
  {"project": "libpng", "severity": "HIGH", "title": "Double free"}
]}"#;

#[test]
fn loads_both_formats_in_order() {
    let dir = TempDir::new().expect("tempdir");
    let md = dir.path().join("audit.md");
    let js = dir.path().join("scan.json");
    fs::write(&md, MARKDOWN).expect("write");
    fs::write(&js, JSON).expect("write");

    let advisories = Advisories::load(&[&md, &js]).expect("load");
    let titles: Vec<&str> = advisories.findings().iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles, vec!["Heap overflow", "Info leak", "Double free"]);

    let libpng = ProjectName::from("libpng");
    assert_eq!(advisories.for_project(&libpng).count(), 2);
    assert_eq!(advisories.blockers(Severity::Critical).count(), 1);
    assert_eq!(advisories.blockers(Severity::High).count(), 2);
}

#[rstest]
#[case(Severity::Critical, 1)]
#[case(Severity::High, 2)]
#[case(Severity::Info, 2)]
fn summary_counts_blockers_for_known_projects_only(
    #[case] threshold: Severity,
    #[case] expected_blocking: usize,
) {
    let mut advisories = Advisories::new();
    advisories
        .ingest_str(std::path::Path::new("audit.md"), MARKDOWN)
        .expect("markdown");
    advisories
        .ingest_str(std::path::Path::new("scan.json"), JSON)
        .expect("json");

    let summary = advisories.summary(threshold, |p| p.as_str() == "libpng");
    assert_eq!(summary.findings, 3);
    assert_eq!(summary.blocking, expected_blocking);
    assert_eq!(summary.unmatched_findings.len(), 1);
    assert_eq!(summary.unmatched_findings[0].project, ProjectName::from("ghost"));
    assert_eq!(summary.by_severity.get(&Severity::Low), Some(&1));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = Advisories::load(&[dir.path().join("nope.md")]).unwrap_err();
    assert!(matches!(err, AdvisoryError::Io { .. }));
}
