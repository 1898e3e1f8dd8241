//! Plugin manifest parsing, validation, and mode-dependent defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// How a plugin's code is executed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Runs in-process, sharing the host's address space.
    Trusted,
    /// Runs out-of-process behind an IPC channel with quotas.
    Sandboxed,
    /// Legacy in-process mode retained for compatibility; treated like `Trusted`
    /// by the runner but recorded distinctly in manifests and status reports.
    Legacy,
}

/// Rate-limit policy: at most `calls` calls within a sliding `period_seconds` window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub calls: u32,
    pub period_seconds: u64,
}

/// Resource quotas and timing bounds for a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub timeout_seconds: u64,
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
    pub rate_limit: RateLimitPolicy,
}

/// Health-check cadence for sandboxed plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            timeout_seconds: 3,
        }
    }
}

/// Retry policy applied by the dispatcher to transient call failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    pub max_attempts: u32,
    pub backoff_seconds: f64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_seconds: 0.5,
        }
    }
}

/// Runtime behavior knobs distinct from resource quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub health_check: HealthCheckSpec,
    #[serde(default)]
    pub retry: RetrySpec,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            health_check: HealthCheckSpec::default(),
            retry: RetrySpec::default(),
        }
    }
}

/// Filesystem access policy enforced by the `TrustedRunner`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemSpec {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub denied_paths: Vec<String>,
}

/// Effect of a permission grant/denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionEffect {
    Allow,
    Deny,
}

/// A declared (but, beyond filesystem, unenforced) permission entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub resource: String,
    pub actions: Vec<String>,
    pub effect: PermissionEffect,
}

/// The parsed, validated, and mode-defaulted manifest for one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub execution_mode: ExecutionMode,
    pub framework_version: semver::VersionReq,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    #[serde(default)]
    pub runtime: RuntimeSpec,
    #[serde(default)]
    pub filesystem: FilesystemSpec,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_resources(mode: ExecutionMode) -> ResourceSpec {
    match mode {
        ExecutionMode::Trusted | ExecutionMode::Legacy => ResourceSpec {
            timeout_seconds: 30,
            max_memory_mb: 0,
            max_disk_mb: 0,
            rate_limit: RateLimitPolicy {
                calls: 1000,
                period_seconds: 60,
            },
        },
        ExecutionMode::Sandboxed => ResourceSpec {
            timeout_seconds: 10,
            max_memory_mb: 128,
            max_disk_mb: 50,
            rate_limit: RateLimitPolicy {
                calls: 100,
                period_seconds: 60,
            },
        },
    }
}

fn default_entry_point(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Sandboxed => "src/main.rs",
        ExecutionMode::Trusted | ExecutionMode::Legacy => "src/lib.rs",
    }
}

static NAME_PATTERN_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789_-";

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| NAME_PATTERN_CHARS.contains(c))
}

/// View over host environment variables used for `${VAR}` substitution.
pub trait EnvView {
    fn get(&self, key: &str) -> Option<String>;
}

impl EnvView for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Substitutes `${VAR}` occurrences in `value` using `env`. Fails loudly if a
/// referenced variable is unresolved.
pub fn substitute_env(value: &str, env: &dyn EnvView) -> HostResult<String> {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    let mut run_start = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            let end = value[i + 2..]
                .find('}')
                .map(|p| i + 2 + p)
                .ok_or_else(|| HostError::Manifest {
                    name: String::new(),
                    reason: format!("unterminated ${{}} substitution in '{}'", value),
                })?;
            let var_name = &value[i + 2..end];
            let resolved = env.get(var_name).ok_or_else(|| HostError::Manifest {
                name: String::new(),
                reason: format!("unresolved environment variable '{}'", var_name),
            })?;
            out.push_str(&value[run_start..i]);
            out.push_str(&resolved);
            i = end + 1;
            run_start = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&value[run_start..]);
    Ok(out)
}

impl PluginManifest {
    /// Parses, validates, and applies mode defaults for a manifest file on disk.
    ///
    /// `plugin_dir` is the plugin's root directory (manifest's parent); used to
    /// validate that `entry_point` resolves to a readable file inside it and that
    /// filesystem allow/deny paths do not escape it.
    pub fn load(
        manifest_path: &Path,
        plugin_dir: &Path,
        host_platform_version: &semver::Version,
        env: &dyn EnvView,
    ) -> HostResult<Self> {
        let raw = std::fs::read_to_string(manifest_path).map_err(|e| HostError::Manifest {
            name: manifest_path.display().to_string(),
            reason: format!("cannot read manifest: {}", e),
        })?;

        let mut manifest: PluginManifest =
            toml::from_str(&raw).map_err(|e| HostError::Manifest {
                name: manifest_path.display().to_string(),
                reason: format!("invalid manifest: {}", e),
            })?;

        manifest.apply_mode_defaults();
        manifest.validate(plugin_dir, host_platform_version, env)?;

        Ok(manifest)
    }

    fn apply_mode_defaults(&mut self) {
        if self.resources.is_none() {
            self.resources = Some(default_resources(self.execution_mode));
        }
        if self.entry_point.is_none() {
            self.entry_point = Some(default_entry_point(self.execution_mode).to_string());
        }
    }

    /// Validates invariants and resolves `${VAR}` substitutions in `env` in place.
    fn validate(
        &mut self,
        plugin_dir: &Path,
        host_platform_version: &semver::Version,
        env: &dyn EnvView,
    ) -> HostResult<()> {
        if !is_valid_name(&self.name) {
            return Err(HostError::Manifest {
                name: self.name.clone(),
                reason: "name must match [a-z0-9_-]+".to_string(),
            });
        }

        if !self.framework_version.matches(host_platform_version) {
            return Err(HostError::Manifest {
                name: self.name.clone(),
                reason: format!(
                    "framework_version {} incompatible with host version {}",
                    self.framework_version, host_platform_version
                ),
            });
        }

        let entry_point = self.entry_point.clone().unwrap_or_default();
        let entry_path = plugin_dir.join(&entry_point);
        if !entry_path.exists() {
            return Err(HostError::Manifest {
                name: self.name.clone(),
                reason: format!("entry_point '{}' not found under plugin directory", entry_point),
            });
        }
        ensure_within(plugin_dir, &entry_path, &self.name)?;

        for path in self
            .filesystem
            .allowed_paths
            .iter()
            .chain(self.filesystem.denied_paths.iter())
        {
            let candidate = PathBuf::from(path);
            if candidate.is_relative() {
                ensure_within(plugin_dir, &plugin_dir.join(&candidate), &self.name)?;
            }
        }

        if self.requires.iter().any(|d| d == &self.name) {
            return Err(HostError::Manifest {
                name: self.name.clone(),
                reason: "a plugin cannot require itself".to_string(),
            });
        }

        let mut substituted = HashMap::with_capacity(self.env.len());
        for (k, v) in &self.env {
            substituted.insert(k.clone(), substitute_env(v, env)?);
        }
        self.env = substituted;

        Ok(())
    }

    /// Resources after mode defaults have been applied; always `Some` post-load.
    pub fn resources(&self) -> &ResourceSpec {
        self.resources.as_ref().expect("mode defaults applied on load")
    }

    /// The resolved entry point path, relative to the plugin directory.
    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().expect("mode defaults applied on load")
    }
}

fn ensure_within(root: &Path, candidate: &Path, plugin_name: &str) -> HostResult<()> {
    let root_canon = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let candidate_canon = candidate
        .canonicalize()
        .unwrap_or_else(|_| candidate.to_path_buf());

    if !candidate_canon.starts_with(&root_canon) {
        return Err(HostError::Manifest {
            name: plugin_name.to_string(),
            reason: format!("path '{}' escapes the plugin directory", candidate.display()),
        });
    }
    Ok(())
}

/// Scans `plugins_root` for subdirectories each containing a `plugin.toml`,
/// parsing every manifest found. Parse failures are recorded by name rather
/// than aborting the scan; duplicate names (across subdirectories) are also
/// recorded as failures for every occurrence past the first.
pub fn scan_directory(
    plugins_root: &Path,
    host_platform_version: &semver::Version,
    env: &dyn EnvView,
) -> (Vec<(PluginManifest, PathBuf)>, Vec<(String, HostError)>) {
    let mut manifests = Vec::new();
    let mut failures = Vec::new();
    let mut seen_names = std::collections::HashSet::new();

    let entries = match std::fs::read_dir(plugins_root) {
        Ok(e) => e,
        Err(e) => {
            failures.push((
                plugins_root.display().to_string(),
                HostError::Manifest {
                    name: plugins_root.display().to_string(),
                    reason: format!("cannot read plugins directory: {}", e),
                },
            ));
            return (manifests, failures);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join("plugin.toml");
        if !manifest_path.exists() {
            continue;
        }

        let label = path.display().to_string();
        match PluginManifest::load(&manifest_path, &path, host_platform_version, env) {
            Ok(manifest) => {
                if !seen_names.insert(manifest.name.clone()) {
                    failures.push((
                        manifest.name.clone(),
                        HostError::Manifest {
                            name: manifest.name.clone(),
                            reason: "duplicate plugin name within directory scan".to_string(),
                        },
                    ));
                    continue;
                }
                manifests.push((manifest, path));
            }
            Err(e) => failures.push((label, e)),
        }
    }

    (manifests, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_manifest(dir: &Path, body: &str) {
        std::fs::write(dir.join("plugin.toml"), body).unwrap();
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/lib.rs"), "// stub").unwrap();
    }

    #[test]
    fn trusted_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
            name = "notes"
            version = "1.0.0"
            execution_mode = "trusted"
            framework_version = "^0.1"
            "#,
        );

        let manifest = PluginManifest::load(
            &dir.path().join("plugin.toml"),
            dir.path(),
            &semver::Version::new(0, 1, 0),
            &HashMap::new(),
        )
        .unwrap();

        assert_eq!(manifest.resources().timeout_seconds, 30);
        assert_eq!(manifest.resources().max_memory_mb, 0);
        assert_eq!(manifest.entry_point(), "src/lib.rs");
    }

    #[test]
    fn sandboxed_defaults_are_stricter() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
            name = "worker-plugin"
            version = "1.0.0"
            execution_mode = "sandboxed"
            framework_version = "^0.1"
            "#,
        );

        let manifest = PluginManifest::load(
            &dir.path().join("plugin.toml"),
            dir.path(),
            &semver::Version::new(0, 1, 0),
            &HashMap::new(),
        )
        .unwrap();

        assert_eq!(manifest.resources().timeout_seconds, 10);
        assert_eq!(manifest.resources().max_memory_mb, 128);
    }

    #[test]
    fn rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
            name = "bad"
            version = "1.0.0"
            execution_mode = "trusted"
            framework_version = "^0.1"
            made_up_field = true
            "#,
        );

        let result = PluginManifest::load(
            &dir.path().join("plugin.toml"),
            dir.path(),
            &semver::Version::new(0, 1, 0),
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_incompatible_framework_version() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
            name = "old"
            version = "1.0.0"
            execution_mode = "trusted"
            framework_version = "^5.0"
            "#,
        );

        let result = PluginManifest::load(
            &dir.path().join("plugin.toml"),
            dir.path(),
            &semver::Version::new(0, 1, 0),
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
            name = "Bad Name!"
            version = "1.0.0"
            execution_mode = "trusted"
            framework_version = "^0.1"
            "#,
        );

        let result = PluginManifest::load(
            &dir.path().join("plugin.toml"),
            dir.path(),
            &semver::Version::new(0, 1, 0),
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn substitutes_env_vars() {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/plugins".to_string());

        let result = substitute_env("${HOME}/data", &env).unwrap();
        assert_eq!(result, "/home/plugins/data");
    }

    #[test]
    fn fails_on_unresolved_env_var() {
        let env: HashMap<String, String> = HashMap::new();
        let result = substitute_env("${MISSING}", &env);
        assert!(result.is_err());
    }
}
