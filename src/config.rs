//! Host-wide configuration: plugin root, signature policy, and runtime knobs.
//!
//! Per-plugin settings live in each plugin's own manifest, not here; this is
//! the single configuration object the host itself is constructed from.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::HostResult;

/// Host-wide configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Directory containing one subdirectory per plugin.
    pub plugins_root: PathBuf,

    /// Require and verify a signature for every trusted/legacy plugin before
    /// it is activated. Sandboxed plugins are never gated on this: subprocess
    /// isolation is the trust boundary for that mode, not a signature.
    #[serde(default)]
    pub strict_trusted: bool,

    /// Shared HMAC key used for signing/verification. Never logged; normally
    /// supplied via the `PLUGIN_HOST_SIGNING_KEY` environment variable rather
    /// than this field, which exists for test fixtures and local development.
    #[serde(default, skip_serializing)]
    pub signing_key: Option<String>,

    /// Maximum number of plugins activated concurrently within one dependency wave.
    #[serde(default = "default_wave_concurrency")]
    pub wave_concurrency: usize,

    /// Grace period the manager waits for plugins to shut down cooperatively
    /// before forcing termination.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    /// Log level applied to the host's own tracing subscriber (not per-plugin
    /// `runtime.log_level`, which only affects that plugin's own logging).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: "pretty" for human-readable, "json" for structured.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Host's own semantic version, checked against each manifest's
    /// `framework_version` requirement.
    #[serde(default = "default_platform_version")]
    pub platform_version: semver::Version,

    /// Arbitrary host-level metadata surfaced in status reports.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_wave_concurrency() -> usize {
    8
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_platform_version() -> semver::Version {
    semver::Version::new(0, 1, 0)
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("./plugins"),
            strict_trusted: false,
            signing_key: None,
            wave_concurrency: default_wave_concurrency(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            platform_version: default_platform_version(),
            metadata: HashMap::new(),
        }
    }
}

impl HostConfig {
    /// Loads a `HostConfig` from a TOML file, then overlays the signing key
    /// from `PLUGIN_HOST_SIGNING_KEY` if set (the environment always wins
    /// over a key embedded in the file).
    pub fn load(path: &std::path::Path) -> HostResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HostConfig = toml::from_str(&content)?;
        if let Ok(key) = std::env::var("PLUGIN_HOST_SIGNING_KEY") {
            config.signing_key = Some(key);
        }
        Ok(config)
    }

    /// The resolved signing key bytes, if any.
    pub fn signing_key_bytes(&self) -> Option<Vec<u8>> {
        self.signing_key.as_ref().map(|k| k.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plugins_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.plugins_root = root.into();
        self
    }

    pub fn strict_trusted(mut self, required: bool) -> Self {
        self.config.strict_trusted = required;
        self
    }

    pub fn signing_key(mut self, key: impl Into<String>) -> Self {
        self.config.signing_key = Some(key.into());
        self
    }

    pub fn wave_concurrency(mut self, n: usize) -> Self {
        self.config.wave_concurrency = n;
        self
    }

    pub fn build(self) -> HostConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_for_local_development() {
        let config = HostConfig::default();
        assert!(!config.strict_trusted);
        assert_eq!(config.wave_concurrency, 8);
    }

    #[test]
    fn load_from_toml_applies_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "plugins_root = \"/opt/plugins\"\n").unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.plugins_root, PathBuf::from("/opt/plugins"));
        assert_eq!(config.shutdown_grace_seconds, 10);
    }

    #[test]
    fn builder_sets_fields() {
        let config = HostConfigBuilder::new()
            .plugins_root("/plugins")
            .strict_trusted(true)
            .signing_key("secret")
            .wave_concurrency(4)
            .build();

        assert!(config.strict_trusted);
        assert_eq!(config.wave_concurrency, 4);
        assert_eq!(config.signing_key_bytes(), Some(b"secret".to_vec()));
    }
}
