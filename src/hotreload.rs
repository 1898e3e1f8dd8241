//! Optional low-latency hot-reload trigger, layered above content-hash snapshots.
//!
//! `notify` events are cheap but noisy: metadata-only touches, editor swap
//! files, directory renames. Rather than act on a raw event, the watcher here
//! only debounces per plugin and forwards a "something under this plugin's
//! directory moved" signal; the actual decision of whether anything
//! meaningful changed is left to a `Snapshot` diff against the plugin's last
//! committed baseline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

use crate::error::{HostError, HostResult};
use crate::snapshot::{Snapshot, SnapshotDiff};

/// Watches plugin directories and reconciles raw filesystem events against
/// content-hash snapshots so editor noise never triggers a reload.
pub struct HotReloadManager {
    watcher: Option<RecommendedWatcher>,
    watched_paths: Arc<RwLock<HashMap<String, PathBuf>>>,
    baselines: Arc<RwLock<HashMap<String, Snapshot>>>,
    signal_tx: UnboundedSender<String>,
    signal_rx: Arc<RwLock<Option<UnboundedReceiver<String>>>>,
    debounce_duration: Duration,
    enabled: bool,
}

impl HotReloadManager {
    /// Creates a manager from `config`; does not start watching until `start`.
    pub fn new(config: HotReloadConfig) -> Self {
        let (signal_tx, signal_rx) = unbounded_channel();

        Self {
            watcher: None,
            watched_paths: Arc::new(RwLock::new(HashMap::new())),
            baselines: Arc::new(RwLock::new(HashMap::new())),
            signal_tx,
            signal_rx: Arc::new(RwLock::new(Some(signal_rx))),
            debounce_duration: Duration::from_millis(config.debounce_ms),
            enabled: config.enabled,
        }
    }

    /// Starts the underlying OS watcher. A no-op if hot-reload is disabled or
    /// already started.
    pub fn start(&mut self) -> HostResult<()> {
        if !self.enabled || self.watcher.is_some() {
            return Ok(());
        }

        tracing::info!("starting hot-reload watcher");

        let watched_paths = Arc::clone(&self.watched_paths);
        let signal_tx = self.signal_tx.clone();
        let debounce = self.debounce_duration;
        let last_signal: Arc<std::sync::Mutex<HashMap<String, Instant>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                return;
            }

            let watched_paths = Arc::clone(&watched_paths);
            let signal_tx = signal_tx.clone();
            let last_signal = Arc::clone(&last_signal);

            tokio::spawn(async move {
                let paths = watched_paths.read().await;
                for (plugin_id, root) in paths.iter() {
                    if !event.paths.iter().any(|p| p.starts_with(root)) {
                        continue;
                    }

                    let now = Instant::now();
                    let should_signal = {
                        let mut last = last_signal.lock().unwrap();
                        let should = last
                            .get(plugin_id)
                            .map(|t| now.duration_since(*t) > debounce)
                            .unwrap_or(true);
                        if should {
                            last.insert(plugin_id.clone(), now);
                        }
                        should
                    };

                    if should_signal {
                        let _ = signal_tx.send(plugin_id.clone());
                    }
                }
            });
        })?;

        self.watcher = Some(watcher);
        Ok(())
    }

    /// Begins watching `plugin_dir` and records its current content as the
    /// reload baseline.
    pub async fn watch_plugin(&mut self, plugin_id: &str, plugin_dir: PathBuf) -> HostResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let baseline = Snapshot::create(&plugin_dir)?;
        self.baselines
            .write()
            .await
            .insert(plugin_id.to_string(), baseline);
        self.watched_paths
            .write()
            .await
            .insert(plugin_id.to_string(), plugin_dir.clone());

        if let Some(watcher) = &mut self.watcher {
            watcher.watch(&plugin_dir, RecursiveMode::Recursive)?;
        }

        Ok(())
    }

    /// Stops watching a plugin and discards its baseline.
    pub async fn unwatch_plugin(&mut self, plugin_id: &str) -> HostResult<()> {
        self.baselines.write().await.remove(plugin_id);
        let path = self.watched_paths.write().await.remove(plugin_id);

        if let Some(path) = path {
            if let Some(watcher) = &mut self.watcher {
                let _ = watcher.unwatch(&path);
            }
        }

        Ok(())
    }

    /// Diffs the plugin directory's current content against its stored
    /// baseline without updating it; `None` if the plugin isn't watched.
    pub async fn check_for_changes(&self, plugin_id: &str) -> HostResult<Option<SnapshotDiff>> {
        let watched = self.watched_paths.read().await;
        let Some(dir) = watched.get(plugin_id) else {
            return Ok(None);
        };

        let current = Snapshot::create(dir)?;
        let baselines = self.baselines.read().await;
        let baseline = baselines
            .get(plugin_id)
            .cloned()
            .unwrap_or_default();

        Ok(Some(Snapshot::diff(&baseline, &current)))
    }

    /// Re-snapshots `plugin_id`'s directory and makes it the new baseline,
    /// called after a caller has successfully reloaded against this content.
    pub async fn commit_snapshot(&self, plugin_id: &str) -> HostResult<()> {
        let watched = self.watched_paths.read().await;
        let Some(dir) = watched.get(plugin_id) else {
            return Err(HostError::PluginNotFound {
                id: plugin_id.to_string(),
            });
        };

        let snapshot = Snapshot::create(dir)?;
        self.baselines
            .write()
            .await
            .insert(plugin_id.to_string(), snapshot);
        Ok(())
    }

    /// Takes ownership of the channel of debounced change signals; callable
    /// exactly once. The caller is expected to drive a loop that calls
    /// `check_for_changes`/`commit_snapshot` for each plugin id received.
    pub async fn take_signal_receiver(&self) -> Option<UnboundedReceiver<String>> {
        self.signal_rx.write().await.take()
    }

    pub fn set_debounce(&mut self, duration: Duration) {
        self.debounce_duration = duration;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn watched_count(&self) -> usize {
        self.watched_paths.read().await.len()
    }
}

/// Hook for callers that want to observe reload attempts (e.g. to emit a
/// lifecycle event) without the watcher itself knowing how a plugin reloads.
#[async_trait::async_trait]
pub trait ReloadHandler: Send + Sync {
    async fn before_reload(&self, plugin_id: &str) -> HostResult<()>;
    async fn after_reload(&self, plugin_id: &str, success: bool) -> HostResult<()>;
}

/// Hot-reload statistics.
#[derive(Debug, Clone, Default)]
pub struct ReloadStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_reload: Option<chrono::DateTime<chrono::Utc>>,
    pub avg_duration_ms: f64,
}

impl ReloadStats {
    pub fn record_attempt(&mut self, success: bool, duration: Duration) {
        self.total_attempts += 1;

        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }

        self.last_reload = Some(chrono::Utc::now());

        let total_duration = self.avg_duration_ms * (self.total_attempts - 1) as f64;
        let new_total = total_duration + duration.as_millis() as f64;
        self.avg_duration_ms = new_total / self.total_attempts as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            (self.successful as f64 / self.total_attempts as f64) * 100.0
        }
    }
}

/// Hot-reload configuration.
#[derive(Debug, Clone)]
pub struct HotReloadConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub auto_reload: bool,
    pub preserve_state: bool,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            auto_reload: true,
            preserve_state: false,
        }
    }
}

/// Builder for `HotReloadConfig`.
pub struct HotReloadBuilder {
    config: HotReloadConfig,
}

impl HotReloadBuilder {
    pub fn new() -> Self {
        Self {
            config: HotReloadConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    pub fn auto_reload(mut self, auto: bool) -> Self {
        self.config.auto_reload = auto;
        self
    }

    pub fn preserve_state(mut self, preserve: bool) -> Self {
        self.config.preserve_state = preserve;
        self
    }

    pub fn build(self) -> HotReloadConfig {
        self.config
    }
}

impl Default for HotReloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_stats_tracks_success_rate() {
        let mut stats = ReloadStats::default();

        stats.record_attempt(true, Duration::from_millis(100));
        stats.record_attempt(true, Duration::from_millis(200));
        stats.record_attempt(false, Duration::from_millis(150));

        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate() - 66.666_666_666_666_66).abs() < 1e-9);
    }

    #[test]
    fn builder_sets_fields() {
        let config = HotReloadBuilder::new()
            .enabled(true)
            .debounce_ms(1000)
            .auto_reload(false)
            .build();

        assert!(config.enabled);
        assert_eq!(config.debounce_ms, 1000);
        assert!(!config.auto_reload);
    }

    #[tokio::test]
    async fn watching_a_plugin_establishes_a_clean_baseline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn noop() {}").unwrap();

        let mut manager = HotReloadManager::new(HotReloadConfig::default());
        manager
            .watch_plugin("demo", dir.path().to_path_buf())
            .await
            .unwrap();

        let diff = manager.check_for_changes("demo").await.unwrap().unwrap();
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn detects_change_against_baseline_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn noop() {}").unwrap();

        let mut manager = HotReloadManager::new(HotReloadConfig::default());
        manager
            .watch_plugin("demo", dir.path().to_path_buf())
            .await
            .unwrap();

        std::fs::write(dir.path().join("lib.rs"), "pub fn noop() { 1; }").unwrap();

        let diff = manager.check_for_changes("demo").await.unwrap().unwrap();
        assert!(!diff.is_empty());

        manager.commit_snapshot("demo").await.unwrap();
        let diff_after_commit = manager.check_for_changes("demo").await.unwrap().unwrap();
        assert!(diff_after_commit.is_empty());
    }
}
