//! Build validation: structural checks only, nothing is compiled or run and
//! nothing is written.

use std::path::{Component, Path, PathBuf};

use convoy_core::config::BuildConfig;
use convoy_core::{Issue, IssueKind, ProjectDescriptor, Severity, Stage};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct BuildValidator {
    required_files: Vec<PathBuf>,
    check_structured: bool,
}

impl BuildValidator {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            required_files: config.required_files.clone(),
            check_structured: config.check_structured,
        }
    }

    /// Every problem found in `project`. An empty list means build-valid.
    pub fn validate(&self, project: &ProjectDescriptor) -> Vec<Issue> {
        let mut issues = Vec::new();

        if let Some(problem) = parse_structured(&project.manifest) {
            issues.push(invalid(format!("manifest does not parse: {problem}")).at(
                project
                    .manifest
                    .strip_prefix(&project.root)
                    .unwrap_or(project.manifest.as_path()),
                None,
            ));
        }

        let mut required: Vec<&PathBuf> = Vec::new();
        for p in self.required_files.iter().chain(project.required_files.iter()) {
            if !required.contains(&p) {
                required.push(p);
            }
        }
        for rel in required {
            if escapes_root(rel) {
                issues.push(invalid("required path escapes the project root".into()).at(rel, None));
                continue;
            }
            let path = project.root.join(rel);
            if !path.exists() {
                issues.push(invalid("missing required file".into()).at(rel, None));
                continue;
            }
            if self.check_structured && path.is_file() && is_structured(&path) {
                if let Some(problem) = parse_structured(&path) {
                    issues.push(invalid(format!("does not parse: {problem}")).at(rel, None));
                }
            }
        }

        for rel in &project.entry_points {
            if escapes_root(rel) {
                issues.push(invalid("entry point escapes the project root".into()).at(rel, None));
                continue;
            }
            let path = project.root.join(rel);
            if !path.is_file() {
                issues.push(invalid("entry point missing".into()).at(rel, None));
            } else if !is_executable(&path) {
                issues.push(invalid("entry point is not executable".into()).at(rel, None));
            }
        }

        info!(project = %project.name, issues = issues.len(), "build validated");
        issues
    }
}

fn invalid(message: String) -> Issue {
    Issue::blocking(Stage::Build, IssueKind::BuildInvalid, Severity::High, message)
}

fn escapes_root(rel: &Path) -> bool {
    rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

fn is_structured(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

/// `Some(message)` when the file cannot be read or parsed.
fn parse_structured(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return Some(e.to_string()),
    };
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<serde_json::Value>(&content)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        _ => serde_yaml::from_str::<serde_yaml::Value>(&content)
            .map(|_| ())
            .map_err(|e| e.to_string()),
    };
    parsed.err()
}

/// A regular file with an execute bit set. Elsewhere, any regular file.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_paths_are_detected() {
        assert!(escapes_root(Path::new("../other/Dockerfile")));
        assert!(escapes_root(Path::new("/etc/passwd")));
        assert!(escapes_root(Path::new("a/../../b")));
        assert!(!escapes_root(Path::new("fuzzers/build.sh")));
    }

    #[test]
    fn structured_extensions() {
        assert!(is_structured(Path::new("x/project.yaml")));
        assert!(is_structured(Path::new("deps.json")));
        assert!(!is_structured(Path::new("Dockerfile")));
    }

    #[cfg(unix)]
    #[test]
    fn only_regular_files_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("tempdir");
        let script = dir.path().join("deploy.sh");
        std::fs::write(&script, "#!/bin/sh\n").expect("write");
        assert!(!is_executable(&script));
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        assert!(is_executable(&script));

        let nested = dir.path().join("bin");
        std::fs::create_dir(&nested).expect("mkdir");
        std::fs::set_permissions(&nested, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        assert!(!is_executable(&nested));
        assert!(!is_executable(&dir.path().join("missing")));
    }
}
