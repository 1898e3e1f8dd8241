//! # Plugin Host
//!
//! A runtime host for third-party plugins, providing:
//!
//! - Manifest-driven plugin discovery, with mode-dependent defaults and
//!   `${VAR}` environment substitution
//! - Two execution modes: trusted (in-process, `dlopen`'d) and sandboxed
//!   (subprocess behind a line-delimited JSON IPC channel)
//! - Dependency-ordered, wave-concurrent activation and reverse-ordered
//!   shutdown
//! - Static AST/textual scanning and HMAC-SHA256 signature verification
//!   gating activation
//! - Sandboxed worker health-checking, crash recovery, and disk quotas
//! - Per-plugin sliding-window rate limiting with retry/backoff on
//!   transient call failures
//! - Content-hash hot reload, debounced against filesystem noise
//! - A lifecycle hook bus for observing and reacting to plugin events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plugin_host::{HostConfig, PluginManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HostConfig::load(std::path::Path::new("host.toml"))?;
//!     let manager = PluginManager::new(config)?;
//!
//!     let report = manager.load_all().await?;
//!     tracing::info!(loaded = report.loaded.len(), failed = report.failed.len(), "startup complete");
//!
//!     let result = manager.call("example-plugin", "ping", serde_json::Value::Null).await?;
//!     println!("{}", result);
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Manifest**: parses and validates `plugin.toml`, applying mode defaults
//! - **Scanner**: static AST/textual pass rejecting plugins that reach for
//!   forbidden modules before they ever run
//! - **Signing**: HMAC-SHA256 signature verification over a canonicalized
//!   manifest + source digest
//! - **Dependency resolver**: topological wave computation from `requires`
//! - **Runner / Supervisor**: the two execution strategies, unified behind
//!   one call surface
//! - **Rate limiter / disk watcher / resource monitor**: quota enforcement
//! - **Hot reload**: debounced content-hash diffing against a filesystem
//!   watch
//! - **Hook bus**: lifecycle event fan-out for integration points
//!
//! ## Security
//!
//! Plugins are gated by static scanning and (optionally required)
//! signatures before they are ever loaded. Sandboxed plugins run in a
//! separate OS process with its own memory rlimit and disk quota; trusted
//! plugins are additionally checked against a manifest-declared filesystem
//! allow/deny list, advisory since they share the host's address space.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dependency;
pub mod diskwatch;
pub mod error;
pub mod hooks;
pub mod hotreload;
pub mod ipc;
pub mod isolation;
pub mod loader;
pub mod manifest;
pub mod ratelimit;
pub mod runner;
pub mod scanner;
pub mod signing;
pub mod snapshot;
pub mod supervisor;
pub mod traits;
pub mod versioning;

pub use config::{HostConfig, HostConfigBuilder};
pub use error::{HostError, HostResult};
pub use manifest::{ExecutionMode, PluginManifest};
pub use traits::{
    LogLevel, Plugin, PluginConfig, PluginContext, PluginDependency, PluginFactory,
    PluginMetadata, PluginState,
};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock as SyncRwLock;
use semver::VersionReq;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock, Semaphore};

use crate::dependency::DependencyResolver;
use crate::diskwatch::DiskStats;
use crate::hooks::{standard_hooks, EmitMode, HookManager, PluginLifecycleContext};
use crate::hotreload::{HotReloadConfig, HotReloadManager};
use crate::isolation::{FileSystemRestrictions, GlobalResourceLimits, ResourceMonitor, Sandbox};
use crate::manifest::ExecutionMode as Mode;
use crate::ratelimit::{RateLimitStats, RateLimiter};
use crate::runner::TrustedRunner;
use crate::scanner::ScanPolicy;
use crate::signing::SignatureManager;
use crate::supervisor::SandboxSupervisor;
use crate::versioning::VersionChecker;

/// Arbitrary services the host propagates to plugins but does not itself
/// implement (a database pool, an event bus), keyed by a name plugins and
/// the embedding application agree on out of band.
pub type ServiceRegistry = Arc<DashMap<String, Arc<dyn std::any::Any + Send + Sync>>>;

/// Either execution strategy behind one call surface.
enum Executor {
    Trusted(TrustedRunner),
    Sandboxed(SandboxSupervisor),
}

impl Executor {
    async fn call(&self, action: &str, payload: Value, timeout: Option<Duration>) -> HostResult<Value> {
        match self {
            Executor::Trusted(runner) => runner.call(action, payload).await,
            Executor::Sandboxed(supervisor) => supervisor.call(action, payload, timeout).await,
        }
    }

    async fn stop(&self, grace: Duration) -> HostResult<()> {
        match self {
            Executor::Trusted(runner) => runner.on_unload().await,
            Executor::Sandboxed(supervisor) => supervisor.stop(grace).await,
        }
    }
}

struct PluginRecord {
    manifest: PluginManifest,
    plugin_dir: PathBuf,
    state: PluginState,
    /// `None` only for a `Failed` record kept around for inspection after a
    /// reload's activation step failed; there is no running executor to call.
    executor: Option<Arc<Executor>>,
}

/// Outcome of a `load_all` sweep of the plugins root.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Plugins successfully activated, in the order they finished.
    pub loaded: Vec<String>,
    /// Plugins that failed manifest parsing, scanning, signing, or
    /// activation, paired with the reason.
    pub failed: Vec<(String, HostError)>,
}

/// Point-in-time snapshot of one loaded plugin, as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    /// Plugin id (its manifest `name`).
    pub id: String,
    /// Declared manifest version.
    pub version: semver::Version,
    /// Execution mode the plugin was activated under.
    pub execution_mode: ExecutionMode,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Rate-limit window stats, if the plugin is registered with one.
    pub rate_limit: Option<RateLimitStats>,
    /// Disk quota stats, populated only for sandboxed plugins.
    pub disk: Option<DiskStats>,
}

/// Bundle of the `PluginManager`'s shared, cheaply-cloneable state, handed
/// to activation tasks so they don't need to borrow `&PluginManager` across
/// an `await` (and so a whole wave can run concurrently).
#[derive(Clone)]
struct ActivationContext {
    plugins: Arc<DashMap<String, PluginRecord>>,
    rate_limiter: Arc<RateLimiter>,
    scan_policy: ScanPolicy,
    signatures: Arc<SignatureManager>,
    strict_trusted: bool,
    version_checker: Arc<VersionChecker>,
    resource_monitor: ResourceMonitor,
    hooks: HookManager,
    hot_reload: Arc<AsyncRwLock<HotReloadManager>>,
}

/// Orchestrates the full lifecycle of every plugin under a configured root:
/// discovery, dependency-ordered activation, rate-gated calls, unload,
/// reload, and shutdown.
pub struct PluginManager {
    config: HostConfig,
    plugins: Arc<DashMap<String, PluginRecord>>,
    dependency_resolver: Arc<SyncRwLock<DependencyResolver>>,
    rate_limiter: Arc<RateLimiter>,
    scan_policy: ScanPolicy,
    signatures: Arc<SignatureManager>,
    version_checker: Arc<VersionChecker>,
    resource_monitor: ResourceMonitor,
    hooks: HookManager,
    hot_reload: Arc<AsyncRwLock<HotReloadManager>>,
    services: ServiceRegistry,
}

impl PluginManager {
    /// Builds a manager from `config`. Construction is synchronous; nothing
    /// is scanned or loaded until `load_all` runs, and the hot-reload signal
    /// loop is not spawned until a caller hands the manager to
    /// `run_hot_reload_loop`.
    pub fn new(config: HostConfig) -> HostResult<Self> {
        let signing_key = config.signing_key_bytes().unwrap_or_default();
        let signatures = Arc::new(SignatureManager::new(signing_key, config.strict_trusted));
        let version_checker = Arc::new(VersionChecker::new(config.platform_version.clone()));
        let resource_monitor = ResourceMonitor::new(GlobalResourceLimits::default());

        let mut hot_reload = HotReloadManager::new(HotReloadConfig::default());
        hot_reload.start()?;

        Ok(Self {
            config,
            plugins: Arc::new(DashMap::new()),
            dependency_resolver: Arc::new(SyncRwLock::new(DependencyResolver::new())),
            rate_limiter: Arc::new(RateLimiter::new()),
            scan_policy: ScanPolicy::default(),
            signatures,
            version_checker,
            resource_monitor,
            hooks: HookManager::new(),
            hot_reload: Arc::new(AsyncRwLock::new(hot_reload)),
            services: Arc::new(DashMap::new()),
        })
    }

    fn context(&self) -> ActivationContext {
        ActivationContext {
            plugins: self.plugins.clone(),
            rate_limiter: self.rate_limiter.clone(),
            scan_policy: self.scan_policy.clone(),
            signatures: self.signatures.clone(),
            strict_trusted: self.config.strict_trusted,
            version_checker: self.version_checker.clone(),
            resource_monitor: self.resource_monitor.clone(),
            hooks: self.hooks.clone(),
            hot_reload: self.hot_reload.clone(),
        }
    }

    /// The service registry the embedding application populates and
    /// plugins' own context implementations may consult.
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// The hook bus, for registering handlers before or after `load_all`.
    pub fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    /// Discovers manifests under `config.plugins_root`, computes dependency
    /// waves from their `requires` lists, and activates each wave
    /// concurrently, bounded by `config.wave_concurrency`.
    pub async fn load_all(&self) -> HostResult<LoadReport> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let (manifests, parse_failures) = manifest::scan_directory(
            &self.config.plugins_root,
            &self.config.platform_version,
            &env,
        );

        let mut by_name: HashMap<String, (PluginManifest, PathBuf)> = HashMap::new();
        {
            let mut resolver = self.dependency_resolver.write();
            for (manifest, dir) in manifests {
                resolver.register(bridge_metadata(&manifest));
                by_name.insert(manifest.name.clone(), (manifest, dir));
            }
        }

        let ids: Vec<String> = by_name.keys().cloned().collect();
        let (waves, cyclic) = self.dependency_resolver.read().get_load_waves(&ids);

        let semaphore = Arc::new(Semaphore::new(self.config.wave_concurrency.max(1)));
        let mut loaded = Vec::new();
        let mut failed = parse_failures;

        for id in cyclic {
            by_name.remove(&id);
            tracing::warn!(plugin = %id, "excluded from activation: circular dependency");
            failed.push((
                id.clone(),
                HostError::Dependency {
                    id,
                    reason: "cycle".to_string(),
                },
            ));
        }

        for wave in waves {
            let mut set = tokio::task::JoinSet::new();
            for id in wave {
                let Some((manifest, dir)) = by_name.remove(&id) else {
                    continue;
                };
                let ctx = self.context();
                let semaphore = semaphore.clone();
                set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("activation semaphore is never closed");
                    let name = manifest.name.clone();
                    let result = activate(ctx, manifest, dir).await;
                    (name, result)
                });
            }

            while let Some(outcome) = set.join_next().await {
                match outcome {
                    Ok((name, Ok(()))) => loaded.push(name),
                    Ok((name, Err(e))) => failed.push((name, e)),
                    Err(join_error) => {
                        failed.push(("<unknown>".to_string(), HostError::Other(join_error.to_string())))
                    }
                }
            }
        }

        Ok(LoadReport { loaded, failed })
    }

    /// Re-parses a single manifest and activates it outside of `load_all`
    /// (e.g. a plugin dropped into the plugins root after startup).
    pub async fn load_one(&self, plugin_dir: PathBuf) -> HostResult<()> {
        let manifest_path = plugin_dir.join("plugin.toml");
        let env: HashMap<String, String> = std::env::vars().collect();
        let manifest =
            PluginManifest::load(&manifest_path, &plugin_dir, &self.config.platform_version, &env)?;

        if self.plugins.contains_key(&manifest.name) {
            return Err(HostError::PluginAlreadyLoaded { id: manifest.name });
        }

        self.dependency_resolver.write().register(bridge_metadata(&manifest));
        activate(self.context(), manifest, plugin_dir).await
    }

    /// Dispatches a call to a loaded plugin, checking its rate-limit budget
    /// and retrying transient failures per the plugin's manifest-declared
    /// retry policy.
    pub async fn call(&self, plugin_id: &str, action: &str, payload: Value) -> HostResult<Value> {
        self.rate_limiter.check(plugin_id)?;

        let (retry_attempts, backoff_seconds, timeout_secs, executor) = {
            let record = self
                .plugins
                .get(plugin_id)
                .ok_or_else(|| HostError::PluginUnavailable { id: plugin_id.to_string() })?;
            let executor = record
                .executor
                .clone()
                .ok_or_else(|| HostError::PluginUnavailable { id: plugin_id.to_string() })?;
            let retry = &record.manifest.runtime.retry;
            (
                retry.max_attempts,
                retry.backoff_seconds,
                record.manifest.resources().timeout_seconds,
                executor,
            )
        };

        let timeout = Duration::from_secs(timeout_secs.max(1));
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match executor.call(action, payload.clone(), Some(timeout)).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < retry_attempts.max(1) => {
                    let backoff = Duration::from_secs_f64(backoff_seconds * attempt as f64);
                    tracing::warn!(plugin = %plugin_id, attempt, error = %e, "retrying transient call failure");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stops and removes a plugin. Refuses to unload while another loaded
    /// plugin still depends on it.
    pub async fn unload(&self, plugin_id: &str) -> HostResult<()> {
        let loaded_ids: HashSet<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        if !self.dependency_resolver.read().can_unload(plugin_id, &loaded_ids) {
            return Err(HostError::Dependency {
                id: plugin_id.to_string(),
                reason: "other loaded plugins still depend on this plugin".to_string(),
            });
        }

        let Some((_, record)) = self.plugins.remove(plugin_id) else {
            return Err(HostError::PluginNotFound { id: plugin_id.to_string() });
        };

        let stop_result = match &record.executor {
            Some(executor) => {
                executor
                    .stop(Duration::from_secs(self.config.shutdown_grace_seconds))
                    .await
            }
            None => Ok(()),
        };

        self.rate_limiter.unregister(plugin_id);
        self.resource_monitor.stop_tracking(plugin_id);
        self.dependency_resolver.write().unregister(plugin_id);
        self.hot_reload.write().await.unwatch_plugin(plugin_id).await?;

        emit_lifecycle(&self.hooks, standard_hooks::PLUGIN_UNLOADED, plugin_id).await;
        tracing::info!(plugin = %plugin_id, "plugin unloaded");

        stop_result
    }

    /// Unloads and re-activates a plugin from its manifest on disk, then
    /// commits a fresh hot-reload baseline. On failure the plugin is left
    /// registered in the `failed` state rather than vanishing from the
    /// instance table, and a `plugin.<name>.failed` hook fires with the cause.
    pub async fn reload(&self, plugin_id: &str) -> HostResult<()> {
        let plugin_dir = self
            .plugins
            .get(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound { id: plugin_id.to_string() })?
            .plugin_dir
            .clone();
        let manifest_path = plugin_dir.join("plugin.toml");

        self.unload(plugin_id).await?;

        match self.reload_inner(&manifest_path, plugin_dir.clone()).await {
            Ok(()) => {
                self.hot_reload.read().await.commit_snapshot(plugin_id).await?;
                emit_lifecycle(&self.hooks, standard_hooks::PLUGIN_RELOADED, plugin_id).await;
                tracing::info!(plugin = %plugin_id, "plugin reloaded");
                Ok(())
            }
            Err(e) => {
                if let Ok(manifest) = PluginManifest::load(
                    &manifest_path,
                    &plugin_dir,
                    &self.config.platform_version,
                    &std::env::vars().collect(),
                ) {
                    self.plugins.insert(
                        plugin_id.to_string(),
                        PluginRecord {
                            manifest,
                            plugin_dir,
                            state: PluginState::Failed,
                            executor: None,
                        },
                    );
                }
                emit_lifecycle(&self.hooks, standard_hooks::PLUGIN_FAILED, plugin_id).await;
                tracing::error!(plugin = %plugin_id, error = %e, "plugin reload failed");
                Err(e)
            }
        }
    }

    async fn reload_inner(
        &self,
        manifest_path: &std::path::Path,
        plugin_dir: PathBuf,
    ) -> HostResult<()> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let manifest =
            PluginManifest::load(manifest_path, &plugin_dir, &self.config.platform_version, &env)?;
        self.dependency_resolver.write().register(bridge_metadata(&manifest));

        activate(self.context(), manifest, plugin_dir).await
    }

    /// Unloads every loaded plugin in reverse dependency order (dependents
    /// before their dependencies), logging but not aborting on individual
    /// failures so one stubborn plugin can't block the rest from stopping.
    pub async fn shutdown(&self) -> HostResult<()> {
        let ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        let order = self
            .dependency_resolver
            .read()
            .get_load_order(&ids)
            .unwrap_or_else(|_| ids.clone());

        for id in order.into_iter().rev() {
            if let Err(e) = self.unload(&id).await {
                tracing::warn!(plugin = %id, error = %e, "error unloading plugin during shutdown");
            }
        }
        Ok(())
    }

    /// Point-in-time status of every loaded plugin.
    pub async fn status(&self) -> Vec<PluginStatus> {
        let snapshot: Vec<(String, PluginManifest, PluginState, Option<Arc<Executor>>)> = self
            .plugins
            .iter()
            .map(|entry| {
                let record = entry.value();
                (
                    entry.key().clone(),
                    record.manifest.clone(),
                    record.state,
                    record.executor.clone(),
                )
            })
            .collect();

        let mut out = Vec::with_capacity(snapshot.len());
        for (id, manifest, state, executor) in snapshot {
            let disk = match executor.as_deref() {
                Some(Executor::Sandboxed(supervisor)) => supervisor.disk_stats().await.ok(),
                Some(Executor::Trusted(_)) | None => None,
            };
            out.push(PluginStatus {
                id: id.clone(),
                version: manifest.version,
                execution_mode: manifest.execution_mode,
                state,
                rate_limit: self.rate_limiter.stats(&id),
                disk,
            });
        }
        out
    }

    /// Drives the hot-reload signal loop: waits for debounced change
    /// signals and reloads the affected plugin if its content actually
    /// diverged from the last committed baseline. Runs until the signal
    /// channel closes. Callable at most once (the receiver can only be
    /// taken once); a second call is a silent no-op.
    pub async fn run_hot_reload_loop(self: Arc<Self>) {
        let receiver = self.hot_reload.read().await.take_signal_receiver().await;
        let Some(mut receiver) = receiver else {
            tracing::debug!("hot-reload signal receiver already taken; loop not started");
            return;
        };

        while let Some(plugin_id) = receiver.recv().await {
            let diff = {
                let hot_reload = self.hot_reload.read().await;
                match hot_reload.check_for_changes(&plugin_id).await {
                    Ok(diff) => diff,
                    Err(e) => {
                        tracing::warn!(plugin = %plugin_id, error = %e, "failed to check for content changes");
                        continue;
                    }
                }
            };

            let Some(diff) = diff else { continue };
            if diff.is_empty() {
                continue;
            }

            tracing::info!(plugin = %plugin_id, "detected content change, reloading");
            if let Err(e) = self.reload(&plugin_id).await {
                tracing::error!(plugin = %plugin_id, error = %e, "hot reload failed");
            }
        }
    }
}

/// Runs the scan/sign/load/start sequence for one manifest and registers
/// the resulting plugin, as a free function so it can be spawned inside a
/// `JoinSet` without borrowing `&PluginManager`.
async fn activate(ctx: ActivationContext, manifest: PluginManifest, plugin_dir: PathBuf) -> HostResult<()> {
    let name = manifest.name.clone();
    let manifest_path = plugin_dir.join("plugin.toml");
    let execution_mode = manifest.execution_mode;

    let report = scanner::scan_plugin(&plugin_dir, &ctx.scan_policy)?;
    for warning in &report.warnings {
        tracing::warn!(plugin = %name, %warning, "scanner warning");
    }
    if !report.passed {
        match execution_mode {
            // Sandboxed plugins run as a separate OS process, so the scanner
            // is the only static gate before they run; a failure blocks load.
            Mode::Sandboxed => {
                return Err(HostError::Scanner {
                    id: name.clone(),
                    reason: report.errors.join("; "),
                });
            }
            // Trusted/legacy plugins share the host's address space, but the
            // scanner is advisory for them: findings are logged, not blocking.
            Mode::Trusted | Mode::Legacy => {
                for error in &report.errors {
                    tracing::warn!(plugin = %name, finding = %error, "scanner finding (warning-only for trusted mode)");
                }
            }
        }
    }

    if matches!(execution_mode, Mode::Trusted | Mode::Legacy) && ctx.strict_trusted {
        ctx.signatures.verify_plugin(&manifest_path, &plugin_dir).await?;
    }

    let call_timeout = Duration::from_secs(manifest.resources().timeout_seconds.max(1));
    let rate_limit = manifest.resources().rate_limit.clone();

    let executor = match execution_mode {
        Mode::Trusted | Mode::Legacy => {
            let entry = plugin_dir.join(manifest.entry_point());

            let mut sandbox = Sandbox::new(name.clone(), ctx.resource_monitor.clone(), Vec::new());
            sandbox.set_fs_restrictions(FileSystemRestrictions {
                allowed_paths: manifest.filesystem.allowed_paths.clone(),
                denied_paths: manifest.filesystem.denied_paths.clone(),
                max_file_size_bytes: 0,
            });

            let runner = TrustedRunner::load(&name, &entry, sandbox, call_timeout)?;
            ctx.version_checker.is_compatible(&runner.metadata().await)?;

            let config = PluginConfig {
                settings: HashMap::new(),
                data_dir: plugin_dir.join("data"),
                cache_dir: plugin_dir.join("cache"),
                instance_id: uuid::Uuid::new_v4(),
            };
            runner.on_load(config).await?;

            Executor::Trusted(runner)
        }
        Mode::Sandboxed => {
            let supervisor = SandboxSupervisor::new(&manifest, plugin_dir.clone(), call_timeout);
            supervisor.start().await?;
            Executor::Sandboxed(supervisor)
        }
    };

    ctx.rate_limiter.register(&name, &rate_limit);
    ctx.resource_monitor.start_tracking(&name);
    ctx.hot_reload
        .write()
        .await
        .watch_plugin(&name, plugin_dir.clone())
        .await?;

    ctx.plugins.insert(
        name.clone(),
        PluginRecord {
            manifest,
            plugin_dir,
            state: PluginState::Loaded,
            executor: Some(Arc::new(executor)),
        },
    );

    emit_lifecycle(&ctx.hooks, standard_hooks::PLUGIN_LOADED, &name).await;

    tracing::info!(plugin = %name, mode = ?execution_mode, "plugin activated");
    Ok(())
}

/// Fires a `PluginLifecycleContext` through the hook bus sequentially,
/// discarding the result: lifecycle notifications are best-effort and must
/// never fail activation or unload.
async fn emit_lifecycle(hooks: &HookManager, hook_name: &str, plugin_id: &str) {
    let context = Arc::new(AsyncMutex::new(PluginLifecycleContext {
        plugin_id: plugin_id.to_string(),
        hook_name: hook_name.to_string(),
        data: HashMap::new(),
        cancelled: false,
    }));
    let _ = hooks.emit(hook_name, context, EmitMode::Sequential).await;
}

/// Synthesizes the `PluginMetadata` the dependency resolver operates on
/// from a manifest's plain `requires` name list. The manifest schema has no
/// per-dependency version constraint, so every bridged dependency accepts
/// any version of the named plugin.
fn bridge_metadata(manifest: &PluginManifest) -> PluginMetadata {
    PluginMetadata {
        id: manifest.name.clone(),
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        description: manifest.description.clone(),
        authors: if manifest.author.is_empty() {
            Vec::new()
        } else {
            vec![manifest.author.clone()]
        },
        license: None,
        homepage: None,
        dependencies: manifest
            .requires
            .iter()
            .map(|dep| PluginDependency {
                id: dep.clone(),
                version: VersionReq::STAR,
                optional: false,
            })
            .collect(),
        min_platform_version: semver::Version::new(0, 0, 0),
        max_platform_version: None,
        capabilities: Vec::new(),
        tags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn bridge_metadata_maps_requires_to_any_version() {
        let env: HashMap<String, String> = HashMap::new();
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("demo");
        fs::create_dir_all(plugin_dir.join("src")).unwrap();
        fs::write(plugin_dir.join("src/lib.rs"), "pub fn noop() {}").unwrap();
        fs::write(
            plugin_dir.join("plugin.toml"),
            r#"
            name = "demo"
            version = "1.0.0"
            execution_mode = "trusted"
            framework_version = "*"
            requires = ["base"]
            "#,
        )
        .unwrap();

        let manifest = PluginManifest::load(
            &plugin_dir.join("plugin.toml"),
            &plugin_dir,
            &semver::Version::new(0, 1, 0),
            &env,
        )
        .unwrap();

        let metadata = bridge_metadata(&manifest);
        assert_eq!(metadata.dependencies.len(), 1);
        assert_eq!(metadata.dependencies[0].id, "base");
        assert!(metadata.dependencies[0].version.matches(&semver::Version::new(9, 9, 9)));
    }

    #[tokio::test]
    async fn load_all_reports_manifestless_directory_as_empty() {
        let root = tempfile::tempdir().unwrap();
        let config = HostConfig {
            plugins_root: root.path().to_path_buf(),
            ..HostConfig::default()
        };
        let manager = PluginManager::new(config).unwrap();

        let report = manager.load_all().await.unwrap();
        assert!(report.loaded.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn call_against_unknown_plugin_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let config = HostConfig {
            plugins_root: root.path().to_path_buf(),
            ..HostConfig::default()
        };
        let manager = PluginManager::new(config).unwrap();

        let result = manager.call("missing", "ping", Value::Null).await;
        assert!(matches!(result, Err(HostError::PluginUnavailable { .. })));
    }

    #[tokio::test]
    async fn unload_unknown_plugin_reports_not_found() {
        let root = tempfile::tempdir().unwrap();
        let config = HostConfig {
            plugins_root: root.path().to_path_buf(),
            ..HostConfig::default()
        };
        let manager = PluginManager::new(config).unwrap();

        let result = manager.unload("missing").await;
        assert!(matches!(result, Err(HostError::PluginNotFound { .. })));
    }

    #[tokio::test]
    async fn shutdown_with_no_loaded_plugins_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let config = HostConfig {
            plugins_root: root.path().to_path_buf(),
            ..HostConfig::default()
        };
        let manager = PluginManager::new(config).unwrap();
        manager.shutdown().await.unwrap();
        assert!(manager.status().await.is_empty());
    }
}
