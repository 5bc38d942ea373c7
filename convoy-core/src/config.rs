//! Orchestration config (`convoy.yaml`).
//!
//! # Resolution order
//!
//! 1. an explicit `--config` path (must exist)
//! 2. `<root>/convoy.yaml`
//! 3. `<config_dir>/convoy/config.yaml`
//! 4. built-in defaults
//!
//! Every section is `#[serde(default)]`, so a partial document only overrides
//! what it names. The loaded config is validated before use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{config_io, ConfigError};
use crate::types::{Priority, ProjectName, Severity};

/// File name looked up in the scan root.
pub const ROOT_CONFIG_FILE: &str = "convoy.yaml";

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Unknown dependencies abort resolution when set.
    pub strict: bool,
    pub priorities: BTreeMap<ProjectName, Priority>,
    /// Replaces the manifest dependency list of the named project.
    pub dependencies: BTreeMap<ProjectName, Vec<ProjectName>>,
    pub languages: BTreeMap<ProjectName, String>,
    pub concurrency: ConcurrencyConfig,
    pub security: SecurityConfig,
    pub compliance: ComplianceConfig,
    pub build: BuildConfig,
    pub deployment: DeploymentConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            strict: true,
            priorities: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            languages: BTreeMap::new(),
            concurrency: ConcurrencyConfig::default(),
            security: SecurityConfig::default(),
            compliance: ComplianceConfig::default(),
            build: BuildConfig::default(),
            deployment: DeploymentConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Concurrent compliance + build evaluations.
    pub validation: usize,
    /// Concurrent deployments within one ready set.
    pub deployment: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { validation: 4, deployment: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Findings at or above this severity block deployment.
    pub blocking_severity: Severity,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { blocking_severity: Severity::Critical }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// File names never evaluated.
    pub exclude_files: Vec<String>,
    /// Directory names never descended into, in addition to hidden ones.
    pub skip_dirs: Vec<String>,
    /// Master switch; a rule remediates only when this and its own flag are set.
    pub auto_remediate: bool,
    pub rules: Vec<RuleConfig>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            exclude_files: Vec::new(),
            skip_dirs: vec![
                ".git".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
            auto_remediate: true,
            rules: default_rules(),
        }
    }
}

/// One entry of the compliance rule set, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    RequiredHeader {
        needle: String,
        /// Header text; `{year}` and `{project}` are substituted.
        header: String,
        #[serde(default = "default_header_extensions")]
        extensions: Vec<String>,
        #[serde(default = "default_search_lines")]
        search_lines: usize,
        #[serde(default = "default_true")]
        remediate: bool,
    },
    ForbiddenTerms {
        terms: Vec<String>,
        #[serde(default)]
        replacements: BTreeMap<String, String>,
        /// Empty means every text file.
        #[serde(default)]
        extensions: Vec<String>,
        #[serde(default = "default_true")]
        remediate: bool,
    },
    ManifestSchema {
        files: Vec<PathBuf>,
        required_keys: Vec<String>,
    },
    YamlSyntax,
}

impl RuleConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleConfig::RequiredHeader { .. } => "required_header",
            RuleConfig::ForbiddenTerms { .. } => "forbidden_terms",
            RuleConfig::ManifestSchema { .. } => "manifest_schema",
            RuleConfig::YamlSyntax => "yaml_syntax",
        }
    }
}

fn default_header_extensions() -> Vec<String> {
    ["py", "sh", "js", "ts", "go", "rs", "java", "c", "cc", "cpp", "h", "hpp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_search_lines() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Header check plus the marketing-term scrub, then YAML well-formedness.
pub fn default_rules() -> Vec<RuleConfig> {
    let replacements: BTreeMap<String, String> = [
        ("ai-powered", "pattern-powered"),
        ("ai-assisted", "pattern-assisted"),
        ("sentient core", "pattern-based core"),
        ("tower of babel", "universal plugin generator"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    vec![
        RuleConfig::RequiredHeader {
            needle: "Copyright".to_string(),
            header: "Copyright {year} The {project} Authors".to_string(),
            extensions: default_header_extensions(),
            search_lines: default_search_lines(),
            remediate: true,
        },
        RuleConfig::ForbiddenTerms {
            terms: replacements.keys().cloned().collect(),
            replacements,
            extensions: Vec::new(),
            remediate: true,
        },
        RuleConfig::YamlSyntax,
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Required in every project, on top of the manifest's own list.
    pub required_files: Vec<PathBuf>,
    /// Parse required `.yaml`/`.yml`/`.json` files.
    pub check_structured: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { required_files: Vec::new(), check_structured: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub remote: String,
    /// Push target; the current branch when unset.
    pub branch: Option<String>,
    /// `{project}` is substituted.
    pub commit_message: String,
    /// Roll back partial changes when a driver fails midway.
    pub rollback_on_failure: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: None,
            commit_message: "Deploy {project}".to_string(),
            rollback_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub discovery_secs: u64,
    pub gate_secs: u64,
    pub deploy_secs: u64,
    pub health_check_secs: u64,
    pub rollback_secs: u64,
    /// Whole-run deadline; unbounded when unset.
    pub run_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            discovery_secs: 30,
            gate_secs: 300,
            deploy_secs: 600,
            health_check_secs: 120,
            rollback_secs: 300,
            run_secs: None,
        }
    }
}

impl TimeoutConfig {
    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_secs)
    }
    pub fn gate(&self) -> Duration {
        Duration::from_secs(self.gate_secs)
    }
    pub fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy_secs)
    }
    pub fn health_check(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }
    pub fn rollback(&self) -> Duration {
        Duration::from_secs(self.rollback_secs)
    }
    pub fn run(&self) -> Option<Duration> {
        self.run_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl OrchestrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.concurrency;
        if c.validation == 0 {
            return Err(ConfigError::Invalid("concurrency.validation must be at least 1".into()));
        }
        if c.deployment == 0 {
            return Err(ConfigError::Invalid("concurrency.deployment must be at least 1".into()));
        }
        if c.deployment > c.validation {
            return Err(ConfigError::Invalid(format!(
                "concurrency.deployment ({}) must not exceed concurrency.validation ({})",
                c.deployment, c.validation
            )));
        }

        let t = &self.timeouts;
        for (name, secs) in [
            ("discovery_secs", t.discovery_secs),
            ("gate_secs", t.gate_secs),
            ("deploy_secs", t.deploy_secs),
            ("health_check_secs", t.health_check_secs),
            ("rollback_secs", t.rollback_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("timeouts.{name} must be positive")));
            }
        }
        if t.run_secs == Some(0) {
            return Err(ConfigError::Invalid("timeouts.run_secs must be positive".into()));
        }

        for rule in &self.compliance.rules {
            match rule {
                RuleConfig::RequiredHeader { needle, search_lines, .. } => {
                    if needle.trim().is_empty() {
                        return Err(ConfigError::Invalid("required_header.needle is empty".into()));
                    }
                    if *search_lines == 0 {
                        return Err(ConfigError::Invalid(
                            "required_header.search_lines must be at least 1".into(),
                        ));
                    }
                }
                RuleConfig::ForbiddenTerms { terms, replacements, .. } => {
                    if let Some(t) = terms.iter().find(|t| t.trim().is_empty()) {
                        return Err(ConfigError::Invalid(format!(
                            "forbidden_terms contains an empty term: {t:?}"
                        )));
                    }
                    let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
                    if let Some(key) = replacements
                        .keys()
                        .find(|k| !lowered.contains(&k.to_lowercase()))
                    {
                        return Err(ConfigError::Invalid(format!(
                            "forbidden_terms replacement for '{key}' names no listed term"
                        )));
                    }
                }
                RuleConfig::ManifestSchema { files, .. } => {
                    if files.is_empty() {
                        return Err(ConfigError::Invalid("manifest_schema.files is empty".into()));
                    }
                }
                RuleConfig::YamlSyntax => {}
            }
        }

        if self.deployment.remote.trim().is_empty() {
            return Err(ConfigError::Invalid("deployment.remote is empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / resolve
// ---------------------------------------------------------------------------

/// Load and validate the config at `path`. An empty file yields the defaults.
pub fn load_at(path: &Path) -> Result<OrchestrationConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| config_io(path, e))?;
    let config: OrchestrationConfig = if contents.trim().is_empty() {
        OrchestrationConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Resolve the config for a run rooted at `root`.
///
/// Returns the config and the path it came from (`None` for defaults).
pub fn resolve_at(
    explicit: Option<&Path>,
    root: &Path,
    config_home: Option<&Path>,
) -> Result<(OrchestrationConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = explicit {
        return Ok((load_at(path)?, Some(path.to_path_buf())));
    }

    let mut candidates = vec![root.join(ROOT_CONFIG_FILE)];
    if let Some(home) = config_home {
        candidates.push(home.join("convoy").join("config.yaml"));
    }
    for candidate in candidates {
        if candidate.is_file() {
            return Ok((load_at(&candidate)?, Some(candidate)));
        }
    }
    Ok((OrchestrationConfig::default(), None))
}

/// `resolve_at` convenience wrapper using `dirs::config_dir()`.
pub fn resolve(
    explicit: Option<&Path>,
    root: &Path,
) -> Result<(OrchestrationConfig, Option<PathBuf>), ConfigError> {
    resolve_at(explicit, root, dirs::config_dir().as_deref())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
