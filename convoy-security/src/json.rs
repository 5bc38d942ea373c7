//! JSON advisory documents: `{"findings": [...]}` or a bare array.

use std::path::Path;

use convoy_core::{ProjectName, Severity};
use serde::Deserialize;
use tracing::warn;

use crate::error::AdvisoryError;
use crate::finding::{SecurityFinding, SkippedSection};

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    id: Option<String>,
    project: String,
    severity: String,
    title: String,
    #[serde(default, alias = "summary")]
    description: String,
    #[serde(default)]
    cwe: Option<String>,
    #[serde(default, alias = "cvss_vector")]
    cvss: Option<String>,
}

/// Parse a JSON document. Entries that do not fit are skipped one by one.
pub fn parse(
    source: &Path,
    content: &str,
) -> Result<(Vec<SecurityFinding>, Vec<SkippedSection>), AdvisoryError> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| AdvisoryError::Json {
            path: source.to_path_buf(),
            source: e,
        })?;
    let entries = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("findings") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Err(AdvisoryError::Shape { path: source.to_path_buf() }),
        },
        _ => return Err(AdvisoryError::Shape { path: source.to_path_buf() }),
    };

    let mut findings = Vec::new();
    let mut skipped = Vec::new();
    for (i, entry) in entries.into_iter().enumerate() {
        let index = i + 1;
        match convert(source, index, entry) {
            Ok(f) => findings.push(f),
            Err(reason) => {
                warn!(source = %source.display(), entry = index, %reason, "skipping advisory entry");
                skipped.push(SkippedSection {
                    source: source.to_path_buf(),
                    index,
                    reason,
                });
            }
        }
    }
    Ok((findings, skipped))
}

fn convert(source: &Path, index: usize, entry: serde_json::Value) -> Result<SecurityFinding, String> {
    let raw: RawFinding = serde_json::from_value(entry).map_err(|e| e.to_string())?;
    if raw.project.trim().is_empty() {
        return Err("entry names no project".to_string());
    }
    let severity: Severity = raw.severity.parse()?;
    Ok(SecurityFinding {
        id: raw.id.unwrap_or_else(|| format!("VULN-{index:03}")),
        project: ProjectName::from(raw.project.trim()),
        severity,
        title: raw.title,
        description: raw.description,
        cwe: raw.cwe,
        cvss: raw.cvss,
        source: source.to_path_buf(),
    })
}
