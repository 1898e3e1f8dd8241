//! In-process execution of trusted plugins: dlopen the manifest's entry point
//! and drive it through the same lifecycle state machine sandboxed workers use.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{HostError, HostResult};
use crate::isolation::Sandbox;
use crate::loader::DynamicLoader;
use crate::traits::{Plugin, PluginConfig, PluginMetadata};

/// Runs a single trusted plugin loaded directly into the host process.
///
/// Holds the `DynamicLoader` that keeps the backing `Arc<Library>` alive;
/// dropping the runner (and therefore the loader) after the boxed `Plugin` is
/// dropped is what makes a clean unload possible — the library is never
/// unmapped while a trait object built from its symbols might still exist.
pub struct TrustedRunner {
    plugin_id: String,
    library_path: PathBuf,
    loader: DynamicLoader,
    plugin: Arc<RwLock<Box<dyn Plugin>>>,
    sandbox: Sandbox,
    call_timeout: Duration,
}

impl TrustedRunner {
    /// Loads `library_path` via the `_plugin_create` entry point and returns a
    /// runner for it. The plugin is loaded but not yet initialized.
    pub fn load(
        plugin_id: &str,
        library_path: &Path,
        sandbox: Sandbox,
        call_timeout: Duration,
    ) -> HostResult<Self> {
        let mut loader = DynamicLoader::new();
        let plugin = loader.load_plugin(library_path)?;

        Ok(Self {
            plugin_id: plugin_id.to_string(),
            library_path: library_path.to_path_buf(),
            loader,
            plugin: Arc::new(RwLock::new(plugin)),
            sandbox,
            call_timeout,
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    /// The loaded plugin's own declared metadata, for compatibility checks
    /// that want the plugin's compiled-in platform bounds rather than the
    /// manifest's `framework_version` range.
    pub async fn metadata(&self) -> PluginMetadata {
        self.plugin.read().await.metadata().clone()
    }

    async fn with_timeout<F, T>(&self, fut: F) -> HostResult<T>
    where
        F: std::future::Future<Output = HostResult<T>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| HostError::CallTimeout {
                id: self.plugin_id.clone(),
                millis: self.call_timeout.as_millis() as u64,
            })?
    }

    /// Runs the plugin's optional `on_load` hook with the supplied config.
    pub async fn on_load(&self, config: PluginConfig) -> HostResult<()> {
        let mut plugin = self.plugin.write().await;
        self.with_timeout(plugin.on_load(config)).await
    }

    /// Runs the plugin's optional `on_unload` hook.
    pub async fn on_unload(&self) -> HostResult<()> {
        let mut plugin = self.plugin.write().await;
        self.with_timeout(plugin.on_unload()).await
    }

    /// Runs the plugin's optional `on_reload` hook.
    pub async fn on_reload(&self) -> HostResult<()> {
        let mut plugin = self.plugin.write().await;
        self.with_timeout(plugin.on_reload()).await
    }

    /// Dispatches `action`/`payload` to the plugin's `handle`, enforcing the
    /// runner's call timeout the same way a sandboxed IPC call would.
    pub async fn call(&self, action: &str, payload: Value) -> HostResult<Value> {
        let mut plugin = self.plugin.write().await;
        self.with_timeout(plugin.handle(action, payload)).await
    }

    /// Validates a filesystem path the plugin wants to touch against its
    /// manifest-derived sandbox restrictions, independent of OS-level
    /// enforcement (trusted plugins run in-process, so this is advisory
    /// unless the plugin itself calls it before performing I/O).
    pub fn check_path(&self, path: &Path) -> HostResult<()> {
        self.sandbox
            .check_fs_access(path)
            .map_err(|_| HostError::FilesystemViolation {
                id: self.plugin_id.clone(),
                path: path.to_path_buf(),
            })
    }

    /// Number of dynamic libraries still mapped by this runner's loader
    /// (always 1 while loaded; used by tests and diagnostics).
    pub fn loaded_library_count(&self) -> usize {
        self.loader.loaded_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::{GlobalResourceLimits, ResourceMonitor};

    #[test]
    fn load_missing_library_reports_library_load_error() {
        let monitor = ResourceMonitor::new(GlobalResourceLimits::default());
        let sandbox = Sandbox::new("missing-plugin".to_string(), monitor, vec![]);

        let result = TrustedRunner::load(
            "missing-plugin",
            Path::new("/nonexistent/libplugin.so"),
            sandbox,
            Duration::from_secs(5),
        );

        assert!(matches!(result, Err(HostError::LibraryLoad { .. })));
    }

    #[test]
    fn check_path_denies_outside_allowlist() {
        let monitor = ResourceMonitor::new(GlobalResourceLimits::default());
        let mut sandbox = Sandbox::new("test-plugin".to_string(), monitor, vec![]);
        sandbox.set_fs_restrictions(
            crate::isolation::FileSystemRestrictions::new().allow_path("/tmp/plugin-data"),
        );

        // We can't construct a TrustedRunner without a real library, so this
        // exercises Sandbox::check_fs_access directly through the same path
        // TrustedRunner::check_path would take.
        assert!(sandbox
            .check_fs_access(Path::new("/tmp/plugin-data/file.json"))
            .is_ok());
        assert!(sandbox
            .check_fs_access(Path::new("/etc/passwd"))
            .is_err());
    }
}
