//! Error types for the plugin runtime host.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Comprehensive error type unifying every logical error kind the host raises.
#[derive(Debug, Error)]
pub enum HostError {
    /// Manifest missing, malformed, or violating an invariant.
    #[error("manifest error for '{name}': {reason}")]
    Manifest { name: String, reason: String },

    /// Static scan rejected the plugin's source tree.
    #[error("scanner rejected plugin '{id}': {reason}")]
    Scanner { id: String, reason: String },

    /// Signature missing, corrupted, or not matching under strict mode.
    #[error("signature error for plugin '{id}': {reason}")]
    Signature { id: String, reason: String },

    /// Dependency graph is cyclic or references an unknown plugin.
    #[error("dependency error for '{id}': {reason}")]
    Dependency { id: String, reason: String },

    /// A plugin or framework version requirement could not be satisfied.
    #[error("version incompatible: {0}")]
    VersionIncompatible(String),

    /// Call issued against a plugin that is not currently loaded.
    #[error("plugin '{id}' is unavailable")]
    PluginUnavailable { id: String },

    /// Per-plugin call budget exhausted.
    #[error("rate limit exceeded for plugin '{id}'")]
    RateLimitExceeded { id: String },

    /// A call did not complete within its configured wall-clock deadline.
    #[error("call to '{id}' timed out after {millis} ms")]
    CallTimeout { id: String, millis: u64 },

    /// The IPC channel did not receive a response before its own deadline.
    #[error("IPC call to '{id}' timed out after {millis} ms")]
    IpcTimeout { id: String, millis: u64 },

    /// The sandboxed worker exited before responding to an in-flight call.
    #[error("worker process for '{id}' exited unexpectedly")]
    IpcProcessDead { id: String },

    /// Malformed IPC framing or a response exceeding the line-length ceiling.
    #[error("IPC protocol error for '{id}': {reason}")]
    IpcError { id: String, reason: String },

    /// Trusted plugin attempted to access a path outside its allowed set.
    #[error("filesystem violation for plugin '{id}': {path}")]
    FilesystemViolation { id: String, path: PathBuf },

    /// Sandboxed plugin's data directory exceeded its disk quota.
    #[error("disk quota exceeded for plugin '{id}': {used_mb} MB > {max_mb} MB")]
    DiskQuotaExceeded {
        id: String,
        used_mb: u64,
        max_mb: u64,
    },

    /// A tracked resource (memory, CPU time, threads, network) exceeded its limit.
    #[error("resource limit exceeded for plugin '{id}': {resource}")]
    ResourceLimitExceeded { id: String, resource: String },

    /// Plugin attempted an action its declared permissions/capabilities forbid.
    #[error("permission denied for plugin '{id}': {action}")]
    PermissionDenied { id: String, action: String },

    /// Plugin not found in the manager's instance table.
    #[error("plugin '{id}' not found")]
    PluginNotFound { id: String },

    /// Plugin already loaded under this name.
    #[error("plugin '{id}' is already loaded")]
    PluginAlreadyLoaded { id: String },

    /// A plugin's `initialize` call returned an error.
    #[error("initialization failed for '{id}': {reason}")]
    InitializationFailed { id: String, reason: String },

    /// Invalid lifecycle state transition.
    #[error("invalid lifecycle transition for '{id}': {from} -> {to}")]
    InvalidStateTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Loading a dynamic library failed.
    #[error("failed to load library from {path:?}: {source}")]
    LibraryLoad {
        path: PathBuf,
        source: libloading::Error,
    },

    /// Host configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Hook registration or emission error.
    #[error("hook error for '{hook}': {reason}")]
    Hook { hook: String, reason: String },

    /// The plugin's `handle` returned a structured error verbatim.
    #[error("plugin '{id}' returned an error: {message}")]
    PluginReturnedError { id: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Filesystem-watch error from the optional hot-reload trigger.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// HMAC key of invalid length.
    #[error("invalid HMAC key length: {0}")]
    InvalidKeyLength(#[from] hmac::digest::InvalidLength),

    /// Catch-all for conditions with no dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Stable short code surfaced in `{"status":"error","code":...}` responses.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::Manifest { .. } => "manifest_error",
            HostError::Scanner { .. } => "scanner_error",
            HostError::Signature { .. } => "signature_error",
            HostError::Dependency { .. } => "dependency_error",
            HostError::VersionIncompatible(_) => "version_incompatible",
            HostError::PluginUnavailable { .. } => "plugin_unavailable",
            HostError::RateLimitExceeded { .. } => "rate_limit",
            HostError::CallTimeout { .. } => "timeout",
            HostError::IpcTimeout { .. } => "timeout",
            HostError::IpcProcessDead { .. } => "process_dead",
            HostError::IpcError { .. } => "ipc_error",
            HostError::FilesystemViolation { .. } => "filesystem_violation",
            HostError::DiskQuotaExceeded { .. } => "disk_quota_exceeded",
            HostError::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            HostError::PermissionDenied { .. } => "permission_denied",
            HostError::InitializationFailed { .. } => "initialization_failed",
            HostError::PluginNotFound { .. } => "plugin_not_found",
            HostError::PluginAlreadyLoaded { .. } => "plugin_already_loaded",
            HostError::InvalidStateTransition { .. } => "invalid_state",
            HostError::LibraryLoad { .. } => "library_load_error",
            HostError::Config(_) => "config_error",
            HostError::Hook { .. } => "hook_error",
            HostError::PluginReturnedError { .. } => "plugin_error",
            HostError::Io(_) => "io_error",
            HostError::Json(_) => "serialization_error",
            HostError::Toml(_) => "serialization_error",
            HostError::TomlSer(_) => "serialization_error",
            HostError::Watch(_) => "watch_error",
            HostError::InvalidKeyLength(_) => "signature_error",
            HostError::Other(_) => "error",
        }
    }

    /// Whether this error is transient and eligible for the manager's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::IpcTimeout { .. } | HostError::IpcProcessDead { .. })
    }

    /// Render as the wire-level `{"status":"error",...}` body.
    pub fn to_response(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}
