//! Supervises a sandboxed plugin's worker subprocess: spawn, health-check,
//! crash recovery with bounded exponential backoff, and call dispatch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::diskwatch::DiskWatcher;
use crate::error::{HostError, HostResult};
use crate::ipc::IpcChannel;
use crate::manifest::PluginManifest;

/// Maximum restarts allowed inside `RESTART_WINDOW` before the supervisor
/// gives up and reports the plugin as permanently crashed.
const MAX_RESTARTS: u32 = 5;
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Restarting,
    Crashed,
    Stopped,
}

struct RestartHistory {
    timestamps: Vec<Instant>,
}

impl RestartHistory {
    fn new() -> Self {
        Self {
            timestamps: Vec::new(),
        }
    }

    fn record_and_check(&mut self) -> HostResult<Duration> {
        let now = Instant::now();
        self.timestamps.retain(|t| now.duration_since(*t) < RESTART_WINDOW);
        self.timestamps.push(now);

        if self.timestamps.len() as u32 > MAX_RESTARTS {
            return Err(HostError::Other(format!(
                "exceeded {} restarts within {}s",
                MAX_RESTARTS,
                RESTART_WINDOW.as_secs()
            )));
        }

        let attempt = self.timestamps.len() as u32;
        let backoff = BACKOFF_BASE.saturating_mul(1 << attempt.saturating_sub(1).min(4));
        Ok(backoff.min(BACKOFF_CAP))
    }
}

/// Owns one worker subprocess for a sandboxed plugin and keeps it alive.
pub struct SandboxSupervisor {
    plugin_id: String,
    entry_point: PathBuf,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
    call_timeout: Duration,
    channel: Arc<RwLock<Option<IpcChannel>>>,
    disk_watcher: DiskWatcher,
    state: Arc<RwLock<SupervisorState>>,
    restarts: Arc<RwLock<RestartHistory>>,
    health_check_interval: Duration,
    health_check_timeout: Duration,
}

impl SandboxSupervisor {
    /// Builds a supervisor for `manifest`, rooted at `plugin_dir` (the
    /// directory the manifest itself was discovered in).
    pub fn new(manifest: &PluginManifest, plugin_dir: PathBuf, call_timeout: Duration) -> Self {
        let resources = manifest.resources();
        let health = &manifest.runtime.health_check;

        let entry_point = plugin_dir.join(manifest.entry_point());
        let data_dir = plugin_dir.join("data");

        Self {
            plugin_id: manifest.name.clone(),
            entry_point,
            working_dir: plugin_dir,
            env: manifest.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            call_timeout,
            channel: Arc::new(RwLock::new(None)),
            disk_watcher: DiskWatcher::new(data_dir, resources.max_disk_mb),
            state: Arc::new(RwLock::new(SupervisorState::Stopped)),
            restarts: Arc::new(RwLock::new(RestartHistory::new())),
            health_check_interval: Duration::from_secs(health.interval_seconds),
            health_check_timeout: Duration::from_secs(health.timeout_seconds),
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new("plugin-host-worker");
        cmd.arg("--entry").arg(&self.entry_point);
        cmd.current_dir(&self.working_dir);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env("PLUGIN_HOST_PLUGIN_ID", &self.plugin_id);
        cmd
    }

    /// Spawns the worker and starts the background health-check loop. Safe to
    /// call again after `stop()`.
    pub async fn start(&self) -> HostResult<()> {
        *self.state.write().await = SupervisorState::Starting;

        let channel = IpcChannel::spawn(&self.plugin_id, self.build_command(), self.call_timeout).await?;
        *self.channel.write().await = Some(channel);
        *self.state.write().await = SupervisorState::Running;

        self.spawn_health_loop();
        Ok(())
    }

    fn respawn_context(&self) -> SandboxSupervisorRespawn {
        SandboxSupervisorRespawn {
            plugin_id: self.plugin_id.clone(),
            entry_point: self.entry_point.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
        }
    }

    fn spawn_health_loop(&self) {
        let plugin_id = self.plugin_id.clone();
        let channel = self.channel.clone();
        let state = self.state.clone();
        let restarts = self.restarts.clone();
        let interval = self.health_check_interval;
        let health_timeout = self.health_check_timeout;
        let call_timeout = self.call_timeout;
        let respawn = self.respawn_context();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                if *state.read().await == SupervisorState::Stopped {
                    break;
                }

                let healthy = {
                    let guard = channel.read().await;
                    match guard.as_ref() {
                        Some(ch) => ch.ping(health_timeout).await,
                        None => false,
                    }
                };

                if healthy {
                    continue;
                }

                tracing::warn!(plugin = %plugin_id, "health check failed, restarting worker");
                if restart_worker(&plugin_id, &channel, &state, &restarts, &respawn, call_timeout)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Dispatches a call to the worker, first checking the plugin's disk
    /// quota isn't already exceeded so a runaway plugin can't keep writing
    /// through IPC after tripping its own limit. A response reporting the
    /// worker process has died marks the supervisor `Crashed` and schedules
    /// the same restart the health loop drives, rather than waiting for the
    /// next periodic health check to notice.
    pub async fn call(&self, action: &str, payload: Value, timeout: Option<Duration>) -> HostResult<Value> {
        self.disk_watcher.check_write(0).await?;

        let result = {
            let guard = self.channel.read().await;
            let channel = guard.as_ref().ok_or_else(|| HostError::PluginUnavailable {
                id: self.plugin_id.clone(),
            })?;
            channel.call(action, payload, timeout).await
        };

        if let Err(HostError::IpcProcessDead { .. }) = &result {
            tracing::warn!(plugin = %self.plugin_id, "worker process dead during call, restarting");
            *self.state.write().await = SupervisorState::Crashed;
            let respawn = self.respawn_context();
            let _ = restart_worker(
                &self.plugin_id,
                &self.channel,
                &self.state,
                &self.restarts,
                &respawn,
                self.call_timeout,
            )
            .await;
        }

        result
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    /// Gracefully shuts the worker down, waiting up to `grace` before a hard kill.
    pub async fn stop(&self, grace: Duration) -> HostResult<()> {
        *self.state.write().await = SupervisorState::Stopped;

        let mut guard = self.channel.write().await;
        if let Some(channel) = guard.take() {
            channel.close(grace).await?;
        }
        Ok(())
    }

    pub async fn disk_stats(&self) -> HostResult<crate::diskwatch::DiskStats> {
        self.disk_watcher.stats().await
    }
}

/// Records a restart attempt, backs off, and respawns the worker, updating
/// `channel`/`state` in place. Shared by the periodic health loop and by
/// `SandboxSupervisor::call`'s immediate crash handling so both paths drive
/// the exact same backoff and restart-history bookkeeping.
async fn restart_worker(
    plugin_id: &str,
    channel: &Arc<RwLock<Option<IpcChannel>>>,
    state: &Arc<RwLock<SupervisorState>>,
    restarts: &Arc<RwLock<RestartHistory>>,
    respawn: &SandboxSupervisorRespawn,
    call_timeout: Duration,
) -> HostResult<()> {
    *state.write().await = SupervisorState::Restarting;

    let backoff = match restarts.write().await.record_and_check() {
        Ok(backoff) => backoff,
        Err(e) => {
            tracing::error!(plugin = %plugin_id, error = %e, "giving up on restarts");
            *state.write().await = SupervisorState::Crashed;
            return Err(e);
        }
    };
    tokio::time::sleep(backoff).await;

    match respawn.spawn_channel(call_timeout).await {
        Ok(new_channel) => {
            *channel.write().await = Some(new_channel);
            *state.write().await = SupervisorState::Running;
            tracing::info!(plugin = %plugin_id, "worker restarted");
            Ok(())
        }
        Err(e) => {
            tracing::error!(plugin = %plugin_id, error = %e, "failed to restart worker");
            *state.write().await = SupervisorState::Crashed;
            Err(e)
        }
    }
}

/// Minimal respawn context handed to the detached health-check task, which
/// can't borrow `&SandboxSupervisor` across its own lifetime.
struct SandboxSupervisorRespawn {
    plugin_id: String,
    entry_point: PathBuf,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl SandboxSupervisorRespawn {
    async fn spawn_channel(&self, call_timeout: Duration) -> HostResult<IpcChannel> {
        let mut cmd = Command::new("plugin-host-worker");
        cmd.arg("--entry").arg(&self.entry_point);
        cmd.current_dir(&self.working_dir);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env("PLUGIN_HOST_PLUGIN_ID", &self.plugin_id);

        IpcChannel::spawn(&self.plugin_id, cmd, call_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_history_backs_off_and_eventually_gives_up() {
        let mut history = RestartHistory::new();

        let mut last = Duration::ZERO;
        for _ in 0..MAX_RESTARTS {
            let backoff = history.record_and_check().unwrap();
            assert!(backoff >= last || backoff == BACKOFF_CAP);
            last = backoff;
        }

        assert!(history.record_and_check().is_err());
    }
}
