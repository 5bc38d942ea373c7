//! Language detection for `convoy-detector`.
//!
//! `detect_language(path)` inspects indicator files in a project root and
//! returns a lowercase language tag (`"c++"`, `"python"`, `"rust"`, ...) in the
//! vocabulary project manifests use. Checks run from most to least specific:
//! language manifests win over build-system files, and build-system files win
//! over loose source files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// How the language was inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// A language manifest (e.g. `Cargo.toml`) was found.
    High,
    /// Only build-system files or source extensions matched.
    Medium,
}

/// A detected project language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedLanguage {
    /// Lowercase language tag.
    pub language: String,
    /// The file that decided the match.
    pub indicator: PathBuf,
    pub confidence: Confidence,
}

/// Errors from language detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

fn io_err(path: &Path, source: std::io::Error) -> DetectError {
    DetectError::Io { path: path.to_path_buf(), source }
}

// ---------------------------------------------------------------------------
// Indicator table
// ---------------------------------------------------------------------------

/// Manifest files that identify a language on their own, in precedence order.
const MANIFESTS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("go.mod", "go"),
    ("pyproject.toml", "python"),
    ("setup.py", "python"),
    ("requirements.txt", "python"),
    ("pom.xml", "jvm"),
    ("build.gradle", "jvm"),
    ("build.gradle.kts", "jvm"),
    ("Package.swift", "swift"),
    ("Gemfile", "ruby"),
];

/// Build-system files shared by C and C++ projects.
const NATIVE_BUILD_FILES: &[&str] = &["CMakeLists.txt", "configure.ac", "meson.build", "Makefile"];

const CPP_EXTENSIONS: &[&str] = &["cc", "cpp", "cxx", "hpp", "hh"];

/// Source extensions used when no manifest or build file matched.
const SOURCE_EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("go", "go"),
    ("py", "python"),
    ("java", "jvm"),
    ("kt", "jvm"),
    ("js", "javascript"),
    ("ts", "javascript"),
    ("swift", "swift"),
    ("rb", "ruby"),
    ("cc", "c++"),
    ("cpp", "c++"),
    ("c", "c"),
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the language of the project at `path`.
///
/// Returns `Ok(None)` when nothing recognisable is present; callers fall back
/// to `"unknown"`.
pub fn detect_language(path: &Path) -> Result<Option<DetectedLanguage>, DetectError> {
    for (file, language) in MANIFESTS {
        let candidate = path.join(file);
        if candidate.is_file() {
            return Ok(Some(DetectedLanguage {
                language: (*language).to_string(),
                indicator: candidate,
                confidence: Confidence::High,
            }));
        }
    }

    if let Some(found) = detect_javascript(path)? {
        return Ok(Some(found));
    }

    let entries = list_files(path)?;

    for build_file in NATIVE_BUILD_FILES {
        let candidate = path.join(build_file);
        if candidate.is_file() {
            let is_cpp = entries.iter().any(|f| has_extension(f, CPP_EXTENSIONS));
            return Ok(Some(DetectedLanguage {
                language: if is_cpp { "c++" } else { "c" }.to_string(),
                indicator: candidate,
                confidence: Confidence::Medium,
            }));
        }
    }

    for (ext, language) in SOURCE_EXTENSIONS {
        if let Some(file) = entries.iter().find(|f| has_extension(f, &[*ext])) {
            return Ok(Some(DetectedLanguage {
                language: (*language).to_string(),
                indicator: file.clone(),
                confidence: Confidence::Medium,
            }));
        }
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn detect_javascript(path: &Path) -> Result<Option<DetectedLanguage>, DetectError> {
    let file = path.join("package.json");
    if !file.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&file).map_err(|e| io_err(&file, e))?;
    serde_json::from_str::<serde_json::Value>(&content).map_err(|e| DetectError::Parse {
        path: file.clone(),
        message: e.to_string(),
    })?;
    Ok(Some(DetectedLanguage {
        language: "javascript".to_string(),
        indicator: file,
        confidence: Confidence::High,
    }))
}

/// Regular files directly inside `path`, sorted by name.
fn list_files(path: &Path) -> Result<Vec<PathBuf>, DetectError> {
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|e| io_err(path, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.contains(&e))
        .unwrap_or(false)
}
