//! Core trait definitions for the plugin system.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::HostResult;

/// Plugin metadata information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier.
    pub id: String,

    /// Human-readable plugin name.
    pub name: String,

    /// Plugin version.
    pub version: semver::Version,

    /// Plugin description.
    pub description: String,

    /// Plugin author(s).
    pub authors: Vec<String>,

    /// Plugin license.
    pub license: Option<String>,

    /// Plugin homepage URL.
    pub homepage: Option<String>,

    /// Plugin dependencies.
    pub dependencies: Vec<PluginDependency>,

    /// Minimum platform version required.
    pub min_platform_version: semver::Version,

    /// Maximum platform version supported.
    pub max_platform_version: Option<semver::Version>,

    /// Plugin capabilities/permissions.
    pub capabilities: Vec<String>,

    /// Plugin tags/categories.
    pub tags: Vec<String>,
}

/// Plugin dependency specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    /// Dependency plugin ID.
    pub id: String,

    /// Version requirement.
    pub version: semver::VersionReq,

    /// Whether this dependency is optional.
    pub optional: bool,
}

/// Plugin lifecycle state, as tracked by the manager owning the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Manifest parsed, scanned, and signed; activation is underway.
    Loading,

    /// Activated and able to accept `handle` calls.
    Loaded,

    /// Activation or reload raised an error; the record is kept for
    /// inspection but the plugin accepts no calls.
    Failed,

    /// `unload` or `reload` is tearing the plugin down.
    Unloading,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Loading => write!(f, "loading"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::Failed => write!(f, "failed"),
            PluginState::Unloading => write!(f, "unloading"),
        }
    }
}

/// Core plugin trait every plugin implements: a single duck-typed `handle`
/// entry point plus optional lifecycle hooks, rather than an inheritance-style
/// state machine. Both trusted (in-process) and sandboxed (subprocess)
/// execution drive plugins through this one contract.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get plugin metadata.
    fn metadata(&self) -> &PluginMetadata;

    /// Handle an `action` with its JSON `payload`, returning the plugin's own
    /// result object verbatim.
    async fn handle(&mut self, action: &str, payload: serde_json::Value) -> HostResult<serde_json::Value>;

    /// Called once after the plugin is loaded, before it receives any calls.
    async fn on_load(&mut self, _config: PluginConfig) -> HostResult<()> {
        Ok(())
    }

    /// Called before the plugin is dropped.
    async fn on_unload(&mut self) -> HostResult<()> {
        Ok(())
    }

    /// Called after `on_load` when a plugin is reloaded in place rather than
    /// freshly constructed.
    async fn on_reload(&mut self) -> HostResult<()> {
        Ok(())
    }

    /// Exposes a named service the plugin provides to other plugins or the
    /// embedding application, if any.
    fn get_service(&self, _name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }

    /// Get plugin as Any for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Get plugin as mutable Any for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Configuration key-value pairs.
    pub settings: HashMap<String, serde_json::Value>,

    /// Plugin data directory.
    pub data_dir: std::path::PathBuf,

    /// Plugin cache directory.
    pub cache_dir: std::path::PathBuf,

    /// Plugin runtime instance ID.
    pub instance_id: Uuid,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            settings: HashMap::new(),
            data_dir: std::path::PathBuf::from("/tmp/plugins/data"),
            cache_dir: std::path::PathBuf::from("/tmp/plugins/cache"),
            instance_id: Uuid::new_v4(),
        }
    }
}

/// Plugin context provided to plugins for platform interaction.
#[async_trait]
pub trait PluginContext: Send + Sync {
    /// Get the platform version.
    fn platform_version(&self) -> &semver::Version;

    /// Dispatches `action`/`payload` to another loaded plugin's `handle`,
    /// the same duck-typed call shape used across the whole host.
    async fn send_message(
        &self,
        target: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> HostResult<serde_json::Value>;

    /// Register a hook handler.
    async fn register_hook(&self, hook: &str, handler_id: &str) -> HostResult<()>;

    /// Unregister a hook handler.
    async fn unregister_hook(&self, hook: &str, handler_id: &str) -> HostResult<()>;

    /// Get a configuration value.
    fn get_config(&self, key: &str) -> Option<serde_json::Value>;

    /// Set a configuration value.
    async fn set_config(&self, key: &str, value: serde_json::Value) -> HostResult<()>;

    /// Log a message.
    fn log(&self, level: LogLevel, message: &str);
}

/// Log levels for plugin logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Plugin factory for creating plugin instances.
pub trait PluginFactory: Send + Sync {
    /// Create a new plugin instance.
    fn create(&self) -> HostResult<Box<dyn Plugin>>;

    /// Get the plugin metadata without creating an instance.
    fn metadata(&self) -> &PluginMetadata;
}
