//! Unified diffs of planned remediations, for dry runs.

use std::path::PathBuf;

use similar::TextDiff;

use crate::writer::Remediation;

/// A single planned file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Render one diff per remediation, headed `a/<relative>` / `b/<relative>`.
pub fn render_diffs(remediations: &[Remediation]) -> Vec<FileDiff> {
    remediations
        .iter()
        .filter(|r| r.original != r.content)
        .map(|r| {
            let old_header = format!("a/{}", r.relative.display());
            let new_header = format!("b/{}", r.relative.display());
            let unified = TextDiff::from_lines(&r.original, &r.content)
                .unified_diff()
                .header(&old_header, &new_header)
                .context_radius(3)
                .to_string();
            FileDiff {
                path: r.path.clone(),
                unified_diff: unified,
            }
        })
        .collect()
}
