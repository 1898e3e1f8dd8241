//! Standalone worker process for sandboxed plugins.
//!
//! Spawned by `SandboxSupervisor` with `--entry <path-to-cdylib>`. Applies a
//! memory rlimit (when the host sets one via environment), dlopens the entry
//! point through the same `_plugin_create` convention trusted plugins use,
//! then speaks line-delimited JSON on stdin/stdout: one request per line in,
//! one response per line out. Diagnostic output goes to stderr, which the
//! supervisor's `IpcChannel` drains into its own tracing output.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use plugin_host::error::{HostError, HostResult};
use plugin_host::loader::DynamicLoader;
use plugin_host::traits::{Plugin, PluginConfig};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct WorkerRequest {
    action: String,
    #[serde(default)]
    payload: Value,
}

/// Builds the `{"status":"ok", ...}` response line, splicing `result`'s own
/// keys at the top level rather than nesting them under a `result` field. A
/// non-object result (or `Value::Null`) produces a bare `{"status":"ok"}`.
fn ok_response(result: Value) -> Value {
    let mut body = match result {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    body.insert("status".to_string(), Value::String("ok".to_string()));
    Value::Object(body)
}

fn err_response(error: &HostError) -> Value {
    error.to_response()
}

fn parse_entry_arg() -> HostResult<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--entry" {
            let path = args.next().ok_or_else(|| {
                HostError::Other("--entry requires a path argument".to_string())
            })?;
            return Ok(PathBuf::from(path));
        }
    }
    Err(HostError::Other("missing required --entry argument".to_string()))
}

/// Caps the worker's own address space when the supervisor requests it via
/// `PLUGIN_HOST_MAX_MEMORY_MB`. Absence of the variable leaves the process
/// unbounded; the host's `ResourceMonitor` still tracks usage independently.
fn apply_memory_limit() {
    let Ok(raw) = std::env::var("PLUGIN_HOST_MAX_MEMORY_MB") else {
        return;
    };
    let Ok(max_mb) = raw.parse::<u64>() else {
        tracing::warn!(value = %raw, "ignoring malformed PLUGIN_HOST_MAX_MEMORY_MB");
        return;
    };
    if max_mb == 0 {
        return;
    }
    let bytes = max_mb.saturating_mul(1024 * 1024);
    if let Err(error) = rlimit::setrlimit(rlimit::Resource::AS, bytes, bytes) {
        tracing::warn!(%error, "failed to set memory rlimit");
    }
}

fn plugin_config(plugin_id: &str) -> PluginConfig {
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    PluginConfig {
        settings: Default::default(),
        data_dir: base.join("data"),
        cache_dir: base.join("cache"),
        instance_id: Uuid::new_v4(),
    }
}

async fn dispatch(plugin: &mut dyn Plugin, action: &str, payload: Value) -> HostResult<Value> {
    plugin.handle(action, payload).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let plugin_id = std::env::var("PLUGIN_HOST_PLUGIN_ID").unwrap_or_else(|_| "unknown".to_string());
    apply_memory_limit();

    let entry = match parse_entry_arg() {
        Ok(path) => path,
        Err(error) => {
            tracing::error!(%error, "worker cannot start");
            std::process::exit(1);
        }
    };

    let mut loader = DynamicLoader::new();
    let mut plugin = match loader.load_plugin(&entry) {
        Ok(plugin) => plugin,
        Err(error) => {
            tracing::error!(%error, path = %entry.display(), "failed to load plugin entry point");
            std::process::exit(1);
        }
    };

    if let Err(error) = plugin.on_load(plugin_config(&plugin_id)).await {
        tracing::error!(%error, "plugin on_load failed");
        std::process::exit(1);
    }

    tracing::info!(plugin = %plugin_id, "worker ready");
    run_request_loop(plugin.as_mut()).await;

    let _ = plugin.on_unload().await;
}

async fn run_request_loop(plugin: &mut dyn Plugin) {
    let stdin = io::stdin();
    let stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                tracing::error!(%error, "stdin read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "discarding malformed request line");
                continue;
            }
        };

        let response = match request.action.as_str() {
            "_ping" => ok_response(Value::Null),
            "_shutdown" => {
                let reply = ok_response(Value::Null);
                write_response(&stdout, &reply);
                break;
            }
            action => match dispatch(plugin, action, request.payload).await {
                Ok(result) => ok_response(result),
                Err(error) => err_response(&error),
            },
        };

        write_response(&stdout, &response);
    }
}

fn write_response(stdout: &io::Stdout, response: &Value) {
    let mut handle = stdout.lock();
    let Ok(mut line) = serde_json::to_string(response) else {
        tracing::error!("failed to serialize response");
        return;
    };
    line.push('\n');
    if let Err(error) = handle.write_all(line.as_bytes()).and_then(|_| handle.flush()) {
        tracing::error!(%error, "failed to write response to stdout");
    }
}
