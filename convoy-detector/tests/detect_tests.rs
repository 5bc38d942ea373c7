//! Parameterised language detection tests for `convoy-detector`.
//!
//! Each `#[case]` gets an isolated `TempDir`.

use std::fs;

use convoy_detector::{detect_language, Confidence, DetectError};
use rstest::rstest;
use tempfile::TempDir;

fn make_dir() -> TempDir {
    TempDir::new().expect("tempdir")
}

fn write(dir: &TempDir, filename: &str, content: &str) {
    fs::write(dir.path().join(filename), content).expect("write fixture");
}

#[rstest]
#[case("Cargo.toml", "rust")]
#[case("go.mod", "go")]
#[case("pyproject.toml", "python")]
#[case("setup.py", "python")]
#[case("pom.xml", "jvm")]
#[case("build.gradle.kts", "jvm")]
#[case("Package.swift", "swift")]
#[case("Gemfile", "ruby")]
fn manifest_detection(#[case] file: &str, #[case] language: &str) {
    let dir = make_dir();
    write(&dir, file, "");
    let found = detect_language(dir.path()).expect("detect").expect("some");
    assert_eq!(found.language, language);
    assert_eq!(found.confidence, Confidence::High);
    assert_eq!(found.indicator, dir.path().join(file));
}

#[test]
fn package_json_is_javascript() {
    let dir = make_dir();
    write(&dir, "package.json", r#"{"name": "demo"}"#);
    let found = detect_language(dir.path()).expect("detect").expect("some");
    assert_eq!(found.language, "javascript");
}

#[test]
fn malformed_package_json_is_a_parse_error() {
    let dir = make_dir();
    write(&dir, "package.json", "{ not json");
    let err = detect_language(dir.path()).unwrap_err();
    assert!(matches!(err, DetectError::Parse { .. }));
}

#[rstest]
#[case("parser.cc", "c++")]
#[case("parser.c", "c")]
fn native_build_files_pick_c_or_cpp(#[case] source: &str, #[case] language: &str) {
    let dir = make_dir();
    write(&dir, "CMakeLists.txt", "project(demo)");
    write(&dir, source, "int main() { return 0; }");
    let found = detect_language(dir.path()).expect("detect").expect("some");
    assert_eq!(found.language, language);
    assert_eq!(found.confidence, Confidence::Medium);
}

#[test]
fn manifest_beats_build_file() {
    let dir = make_dir();
    write(&dir, "Makefile", "all:");
    write(&dir, "go.mod", "module demo");
    let found = detect_language(dir.path()).expect("detect").expect("some");
    assert_eq!(found.language, "go");
}

#[test]
fn loose_sources_fall_back_to_extension() {
    let dir = make_dir();
    write(&dir, "fuzz_target.py", "import atheris");
    let found = detect_language(dir.path()).expect("detect").expect("some");
    assert_eq!(found.language, "python");
    assert_eq!(found.confidence, Confidence::Medium);
}

#[test]
fn empty_dir_detects_nothing() {
    let dir = make_dir();
    write(&dir, "Dockerfile", "FROM base");
    assert!(detect_language(dir.path()).expect("detect").is_none());
}
