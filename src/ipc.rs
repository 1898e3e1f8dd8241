//! Line-delimited JSON IPC channel to a sandboxed worker subprocess.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};

use crate::error::{HostError, HostResult};

/// Lines longer than this are treated as a protocol violation rather than
/// buffered indefinitely.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One line of the wire protocol sent to a worker. There is at most one
/// in-flight request per channel (calls are serialized on `rpc_lock`), so no
/// correlation id is needed.
#[derive(Debug, Clone, Serialize)]
struct IpcRequest {
    action: String,
    payload: Value,
}

struct Transport {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    process: Child,
}

/// One line-delimited JSON channel to a single worker subprocess.
///
/// A call acquires `rpc_lock` for its whole write-then-read round trip, so
/// concurrent callers are serialized onto the wire one at a time; the
/// supervisor is expected to run one `IpcChannel` per plugin instance, not
/// share one across plugins.
pub struct IpcChannel {
    plugin_id: String,
    transport: Arc<RwLock<Transport>>,
    rpc_lock: Arc<Mutex<()>>,
    default_timeout: Duration,
}

impl IpcChannel {
    /// Spawns `command` with piped stdio and wires up background stderr logging.
    pub async fn spawn(
        plugin_id: &str,
        mut command: Command,
        default_timeout: Duration,
    ) -> HostResult<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let label = plugin_id.to_string();
            tokio::spawn(async move {
                log_worker_stderr(label, stderr).await;
            });
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::IpcError {
                id: plugin_id.to_string(),
                reason: "worker has no stdin".to_string(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::IpcError {
                id: plugin_id.to_string(),
                reason: "worker has no stdout".to_string(),
            })?;

        Ok(Self {
            plugin_id: plugin_id.to_string(),
            transport: Arc::new(RwLock::new(Transport {
                stdin,
                stdout: BufReader::new(stdout),
                process: child,
            })),
            rpc_lock: Arc::new(Mutex::new(())),
            default_timeout,
        })
    }

    /// Issues one call and waits for its response, honoring `timeout` (or the
    /// channel's default if `None`). Only one call may be in flight per
    /// channel at a time; `rpc_lock` enforces that.
    pub async fn call(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> HostResult<Value> {
        let _guard = self.rpc_lock.lock().await;
        let deadline = timeout.unwrap_or(self.default_timeout);

        tokio::time::timeout(deadline, self.write_line(action, payload))
            .await
            .map_err(|_| HostError::IpcTimeout {
                id: self.plugin_id.clone(),
                millis: deadline.as_millis() as u64,
            })??;

        let response = tokio::time::timeout(deadline, self.read_response())
            .await
            .map_err(|_| HostError::IpcTimeout {
                id: self.plugin_id.clone(),
                millis: deadline.as_millis() as u64,
            })??;

        let status = response.get("status").and_then(Value::as_str).unwrap_or("");
        match status {
            "ok" => {
                let mut body = response.as_object().cloned().unwrap_or_default();
                body.remove("status");
                Ok(Value::Object(body))
            }
            _ => {
                let code = response
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let message = response
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("worker returned an error with no body");
                Err(HostError::PluginReturnedError {
                    id: self.plugin_id.clone(),
                    message: format!("{}: {}", code, message),
                })
            }
        }
    }

    /// Fire-and-forget liveness probe; any well-formed response counts as healthy.
    pub async fn ping(&self, timeout: Duration) -> bool {
        self.call("_ping", Value::Null, Some(timeout)).await.is_ok()
    }

    async fn write_line(&self, action: &str, payload: Value) -> HostResult<()> {
        let request = IpcRequest {
            action: action.to_string(),
            payload,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut transport = self.transport.write().await;
        transport.stdin.write_all(line.as_bytes()).await?;
        transport.stdin.flush().await?;
        Ok(())
    }

    async fn read_response(&self) -> HostResult<Value> {
        let mut transport = self.transport.write().await;
        loop {
            let mut line = String::new();
            let limited = (&mut transport.stdout).take(MAX_LINE_BYTES as u64);
            let mut limited = limited;
            let n = limited.read_line(&mut line).await?;

            if n == 0 {
                return Err(HostError::IpcProcessDead {
                    id: self.plugin_id.clone(),
                });
            }
            if line.len() >= MAX_LINE_BYTES {
                return Err(HostError::IpcError {
                    id: self.plugin_id.clone(),
                    reason: format!("response line exceeded {} bytes", MAX_LINE_BYTES),
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(serde_json::from_str(trimmed)?);
        }
    }

    /// Attempts a graceful `_shutdown` call, then waits briefly before killing
    /// the process outright.
    pub async fn close(&self, grace: Duration) -> HostResult<()> {
        let _ = self.call("_shutdown", Value::Null, Some(grace)).await;

        let mut transport = self.transport.write().await;
        let waited = tokio::time::timeout(grace, transport.process.wait()).await;
        if waited.is_err() {
            transport.process.start_kill()?;
        }
        Ok(())
    }

    /// The worker's OS process id, if still running.
    pub async fn pid(&self) -> Option<u32> {
        self.transport.read().await.process.id()
    }

    /// Whether the worker process has exited, without blocking.
    pub async fn has_exited(&self) -> bool {
        let mut transport = self.transport.write().await;
        matches!(transport.process.try_wait(), Ok(Some(_)))
    }
}

async fn log_worker_stderr(plugin_id: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let msg = line.trim_end();
                if !msg.is_empty() {
                    tracing::warn!(plugin = %plugin_id, "worker stderr: {}", msg);
                }
            }
            Err(error) => {
                tracing::debug!(plugin = %plugin_id, %error, "failed reading worker stderr");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_command() -> Command {
        let mut cmd = Command::new("python3");
        cmd.arg("-u").arg("-c").arg(
            r#"
import sys, json
for line in sys.stdin:
    req = json.loads(line)
    if req["action"] == "_shutdown":
        print(json.dumps({"status": "ok"}))
        sys.stdout.flush()
        break
    resp = dict(req["payload"])
    resp["status"] = "ok"
    print(json.dumps(resp))
    sys.stdout.flush()
"#,
        );
        cmd
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH; exercised in integration test environments"]
    async fn call_round_trips_payload() {
        let channel = IpcChannel::spawn("echo-plugin", echo_command(), Duration::from_secs(5))
            .await
            .unwrap();

        let result = channel
            .call("echo", serde_json::json!({"hello": "world"}), None)
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({"hello": "world"}));
        channel.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn call_against_dead_process_reports_process_dead() {
        let mut cmd = Command::new("true");
        let channel = IpcChannel::spawn("dead-plugin", cmd, Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = channel.call("noop", Value::Null, None).await;
        assert!(matches!(
            result,
            Err(HostError::IpcProcessDead { .. }) | Err(HostError::IpcTimeout { .. })
        ));
    }
}
