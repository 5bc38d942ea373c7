//! Project discovery.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   convoy.yaml              (optional orchestration config)
//!   <project>/
//!     project.yaml           (or project.yml; one per project)
//!     ...
//! ```
//!
//! Every immediate subdirectory holding a recognised manifest becomes one
//! [`ProjectDescriptor`]. A malformed manifest is recorded as a
//! [`DiscoveryError`] and the scan continues.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OrchestrationConfig;
use crate::error::{registry_io, DiscoveryError, RegistryError};
use crate::types::{DeploySpec, Priority, ProjectDescriptor, ProjectName, DEFAULT_PRIORITY};

/// Manifest file names, in lookup order.
pub const MANIFEST_NAMES: &[&str] = &["project.yaml", "project.yml"];

/// Manifests above this size are rejected unparsed.
pub const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Manifest document
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Manifest {
    priority: Option<Priority>,
    language: Option<String>,
    dependencies: Vec<String>,
    required_files: Vec<PathBuf>,
    entry_points: Vec<PathBuf>,
    deploy: DeploySpec,
}

fn parse_manifest(path: &Path) -> Result<Manifest, String> {
    let meta = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if meta.len() > MAX_MANIFEST_BYTES {
        return Err(format!(
            "manifest is {} bytes; limit is {MAX_MANIFEST_BYTES}",
            meta.len()
        ));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    if contents.trim().is_empty() {
        return Ok(Manifest::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| e.to_string())
}

fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Collapse duplicate names, keeping first occurrences in order.
fn dedup_names<I: IntoIterator<Item = ProjectName>>(names: I) -> Vec<ProjectName> {
    let mut out: Vec<ProjectName> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The catalog of projects for one run.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    root: PathBuf,
    projects: BTreeMap<ProjectName, ProjectDescriptor>,
    errors: Vec<DiscoveryError>,
}

impl Registry {
    /// Scan `root` and build descriptors, applying config overrides.
    pub fn discover(root: &Path, config: &OrchestrationConfig) -> Result<Self, RegistryError> {
        if !root.is_dir() {
            return Err(RegistryError::RootNotFound { path: root.to_path_buf() });
        }
        let root = root.canonicalize().map_err(|e| registry_io(root, e))?;

        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&root)
            .map_err(|e| registry_io(&root, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path())
            .collect();
        dirs.sort();

        let mut registry = Registry { root: root.clone(), ..Self::default() };
        for dir in dirs {
            let Some(manifest_path) = find_manifest(&dir) else {
                continue;
            };
            let name = ProjectName::from(
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
            match parse_manifest(&manifest_path) {
                Ok(manifest) => {
                    let descriptor = build_descriptor(name, dir, manifest_path, manifest, config);
                    debug!(
                        project = %descriptor.name,
                        priority = descriptor.priority,
                        language = %descriptor.language,
                        "discovered project"
                    );
                    registry.projects.insert(descriptor.name.clone(), descriptor);
                }
                Err(message) => {
                    warn!(project = %name, manifest = %manifest_path.display(), %message, "malformed manifest");
                    registry.errors.push(DiscoveryError {
                        project: name,
                        manifest: manifest_path,
                        message,
                    });
                }
            }
        }
        Ok(registry)
    }

    /// Build a registry from ready-made descriptors; used by embedders and tests.
    pub fn from_descriptors<I>(root: impl Into<PathBuf>, descriptors: I) -> Self
    where
        I: IntoIterator<Item = ProjectDescriptor>,
    {
        Registry {
            root: root.into(),
            projects: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            errors: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &ProjectName) -> Option<&ProjectDescriptor> {
        self.projects.get(name)
    }

    pub fn contains(&self, name: &ProjectName) -> bool {
        self.projects.contains_key(name)
    }

    /// Descriptors sorted by name.
    pub fn projects(&self) -> impl Iterator<Item = &ProjectDescriptor> {
        self.projects.values()
    }

    pub fn names(&self) -> Vec<ProjectName> {
        self.projects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn discovery_errors(&self) -> &[DiscoveryError] {
        &self.errors
    }
}

fn build_descriptor(
    name: ProjectName,
    root: PathBuf,
    manifest_path: PathBuf,
    manifest: Manifest,
    config: &OrchestrationConfig,
) -> ProjectDescriptor {
    let priority = config
        .priorities
        .get(&name)
        .copied()
        .or(manifest.priority)
        .unwrap_or(DEFAULT_PRIORITY);

    let dependencies = match config.dependencies.get(&name) {
        Some(over) => dedup_names(over.iter().cloned()),
        None => dedup_names(manifest.dependencies.into_iter().map(ProjectName::from)),
    };

    let language = config
        .languages
        .get(&name)
        .cloned()
        .or(manifest.language)
        .or_else(|| detect(&name, &root))
        .unwrap_or_else(|| "unknown".to_string());

    ProjectDescriptor {
        name,
        priority,
        language,
        dependencies,
        root,
        manifest: manifest_path,
        required_files: manifest.required_files,
        entry_points: manifest.entry_points,
        deploy: manifest.deploy,
    }
}

fn detect(name: &ProjectName, root: &Path) -> Option<String> {
    match convoy_detector::detect_language(root) {
        Ok(found) => found.map(|d| d.language),
        Err(e) => {
            debug!(project = %name, error = %e, "language detection failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
