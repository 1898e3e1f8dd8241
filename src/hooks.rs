//! Extensibility hooks system for plugin integration points.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};

use crate::error::{HostError, HostResult};

/// How handlers for one `emit` call are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// One handler at a time, in priority order; a handler that sets
    /// `stop_propagation` on the context halts remaining handlers.
    Sequential,
    /// All handlers run concurrently; `stop_propagation` has no effect.
    Parallel,
}

/// Per-handler outcome of one `emit` call.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub handler_id: String,
    pub plugin_id: String,
    pub duration: Duration,
    pub error: Option<String>,
    pub cancelled: bool,
}

/// Hook manager for plugin extensibility.
#[derive(Clone)]
pub struct HookManager {
    hooks: Arc<DashMap<String, Vec<HookHandler>>>,
    middleware: Arc<RwLock<Vec<Box<dyn HookMiddleware>>>>,
    registration_seq: Arc<AtomicUsize>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            hooks: Arc::new(DashMap::new()),
            middleware: Arc::new(RwLock::new(Vec::new())),
            registration_seq: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers a handler under `hook_pattern`, which may be an exact hook
    /// name (`plugin.loaded`) or a single-wildcard glob (`plugin.*`, `*.failed`).
    pub fn register_hook(&self, hook_pattern: &str, mut handler: HookHandler) -> HostResult<()> {
        handler.sequence = self.registration_seq.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pattern = hook_pattern, handler = %handler.id, "registering hook handler");

        self.hooks
            .entry(hook_pattern.to_string())
            .or_default()
            .push(handler);

        Ok(())
    }

    pub fn unregister_hook(&self, hook_pattern: &str, handler_id: &str) -> HostResult<()> {
        if let Some(mut handlers) = self.hooks.get_mut(hook_pattern) {
            handlers.retain(|h| h.id != handler_id);
        }
        Ok(())
    }

    /// Every `(pattern, handler)` registered under a pattern that matches
    /// `hook_name`, sorted by priority descending then registration order.
    fn matching_handlers(&self, hook_name: &str) -> Vec<(String, HookHandler)> {
        let mut matches: Vec<(String, HookHandler)> = Vec::new();

        for entry in self.hooks.iter() {
            let pattern = entry.key();
            if !pattern_matches(pattern, hook_name) {
                continue;
            }
            for handler in entry.value().iter() {
                if handler.enabled {
                    matches.push((pattern.clone(), handler.clone_for_dispatch()));
                }
            }
        }

        matches.sort_by(|a, b| {
            b.1.priority
                .cmp(&a.1.priority)
                .then_with(|| a.1.sequence.cmp(&b.1.sequence))
        });

        matches
    }

    fn remove_once_handler(&self, pattern: &str, handler_id: &str) {
        if let Some(mut handlers) = self.hooks.get_mut(pattern) {
            handlers.retain(|h| h.id != handler_id);
        }
    }

    /// Runs every matching handler per `mode`, collecting a `HookResult` for each.
    pub async fn emit<T>(
        &self,
        hook_name: &str,
        context: Arc<Mutex<T>>,
        mode: EmitMode,
    ) -> HostResult<Vec<HookResult>>
    where
        T: HookContext + Send + Sync + 'static,
    {
        {
            let mut ctx = context.lock().await;
            let middleware = self.middleware.read().await;
            for mw in middleware.iter() {
                mw.before_hook(hook_name, &mut *ctx).await?;
            }
        }

        let handlers = self.matching_handlers(hook_name);
        let results = match mode {
            EmitMode::Sequential => self.emit_sequential(&handlers, context.clone()).await,
            EmitMode::Parallel => self.emit_parallel(&handlers, context.clone()).await,
        };

        {
            let mut ctx = context.lock().await;
            let middleware = self.middleware.read().await;
            for mw in middleware.iter() {
                mw.after_hook(hook_name, &mut *ctx).await?;
            }
        }

        Ok(results)
    }

    async fn emit_sequential<T>(
        &self,
        handlers: &[(String, HookHandler)],
        context: Arc<Mutex<T>>,
    ) -> Vec<HookResult>
    where
        T: HookContext + Send + Sync + 'static,
    {
        let mut results = Vec::with_capacity(handlers.len());

        for (pattern, handler) in handlers {
            let started = Instant::now();
            let mut ctx = context.lock().await;

            if ctx.stop_propagation() {
                results.push(HookResult {
                    handler_id: handler.id.clone(),
                    plugin_id: handler.plugin_id.clone(),
                    duration: Duration::ZERO,
                    error: None,
                    cancelled: true,
                });
                continue;
            }

            let outcome = (handler.callback)(&mut *ctx).await;
            drop(ctx);

            let error = match &outcome {
                Ok(()) => None,
                Err(e) => Some(e.to_string()),
            };

            if let Err(e) = &outcome {
                tracing::error!(handler = %handler.id, hook = %pattern, error = %e, "hook handler failed");
            }

            if outcome.is_ok() && handler.once {
                self.remove_once_handler(pattern, &handler.id);
            }

            let failed_and_blocking = outcome.is_err() && !handler.allow_errors;

            results.push(HookResult {
                handler_id: handler.id.clone(),
                plugin_id: handler.plugin_id.clone(),
                duration: started.elapsed(),
                error,
                cancelled: false,
            });

            if failed_and_blocking {
                break;
            }
        }

        results
    }

    async fn emit_parallel<T>(
        &self,
        handlers: &[(String, HookHandler)],
        context: Arc<Mutex<T>>,
    ) -> Vec<HookResult>
    where
        T: HookContext + Send + Sync + 'static,
    {
        let mut tasks = Vec::with_capacity(handlers.len());

        for (pattern, handler) in handlers {
            let context = context.clone();
            let pattern = pattern.clone();
            let handler = handler.clone_for_dispatch();

            tasks.push(tokio::spawn(async move {
                let started = Instant::now();
                let mut ctx = context.lock().await;
                let outcome = (handler.callback)(&mut *ctx).await;
                drop(ctx);

                if let Err(e) = &outcome {
                    tracing::error!(handler = %handler.id, hook = %pattern, error = %e, "hook handler failed");
                }

                HookResult {
                    handler_id: handler.id,
                    plugin_id: handler.plugin_id,
                    duration: started.elapsed(),
                    error: outcome.err().map(|e| e.to_string()),
                    cancelled: false,
                }
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Ok(result) = task.await {
                results.push(result);
            }
        }
        results
    }

    /// Sequential dispatch that stops at (and returns) the first handler's result.
    pub async fn emit_until_first<T>(
        &self,
        hook_name: &str,
        context: Arc<Mutex<T>>,
    ) -> Option<HookResult>
    where
        T: HookContext + Send + Sync + 'static,
    {
        let handlers = self.matching_handlers(hook_name);
        let (pattern, handler) = handlers.into_iter().next()?;

        let started = Instant::now();
        let mut ctx = context.lock().await;
        let outcome = (handler.callback)(&mut *ctx).await;
        drop(ctx);

        if outcome.is_ok() && handler.once {
            self.remove_once_handler(&pattern, &handler.id);
        }

        Some(HookResult {
            handler_id: handler.id,
            plugin_id: handler.plugin_id,
            duration: started.elapsed(),
            error: outcome.err().map(|e| e.to_string()),
            cancelled: false,
        })
    }

    /// Sequential dispatch that stops at the first handler to succeed.
    pub async fn emit_until_success<T>(
        &self,
        hook_name: &str,
        context: Arc<Mutex<T>>,
    ) -> Vec<HookResult>
    where
        T: HookContext + Send + Sync + 'static,
    {
        let handlers = self.matching_handlers(hook_name);
        let mut results = Vec::new();

        for (pattern, handler) in handlers {
            let started = Instant::now();
            let mut ctx = context.lock().await;
            let outcome = (handler.callback)(&mut *ctx).await;
            drop(ctx);

            let succeeded = outcome.is_ok();
            if succeeded && handler.once {
                self.remove_once_handler(&pattern, &handler.id);
            }

            results.push(HookResult {
                handler_id: handler.id,
                plugin_id: handler.plugin_id,
                duration: started.elapsed(),
                error: outcome.err().map(|e| e.to_string()),
                cancelled: false,
            });

            if succeeded {
                break;
            }
        }

        results
    }

    pub async fn register_middleware(&self, middleware: Box<dyn HookMiddleware>) {
        self.middleware.write().await.push(middleware);
    }

    pub fn handler_count(&self, hook_name: &str) -> usize {
        self.matching_handlers(hook_name).len()
    }

    pub fn list_hooks(&self) -> Vec<String> {
        self.hooks.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear_hook(&self, hook_name: &str) {
        self.hooks.remove(hook_name);
    }

    pub fn clear_all(&self) {
        self.hooks.clear();
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Matches a registration pattern against a concrete hook name. A pattern
/// with no `*` must match exactly; `prefix.*` matches anything starting with
/// `prefix.`; `*.suffix` matches anything ending with `.suffix`; a bare `*`
/// matches everything.
fn pattern_matches(pattern: &str, hook_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return hook_name.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return hook_name.ends_with(suffix);
    }
    pattern == hook_name
}

type HookCallback =
    Arc<dyn Fn(&mut dyn HookContext) -> BoxFuture<'static, HostResult<()>> + Send + Sync>;

/// Hook handler registration.
pub struct HookHandler {
    pub id: String,
    pub plugin_id: String,
    pub enabled: bool,
    pub allow_errors: bool,
    pub priority: i32,
    /// If true, the handler is removed from its hook after its first
    /// successful invocation.
    pub once: bool,
    sequence: usize,
    callback: HookCallback,
}

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

impl HookHandler {
    pub fn new<F, Fut>(id: String, plugin_id: String, callback: F) -> Self
    where
        F: Fn(&mut dyn HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HostResult<()>> + Send + 'static,
    {
        Self {
            id,
            plugin_id,
            enabled: true,
            allow_errors: false,
            priority: 0,
            once: false,
            sequence: 0,
            callback: Arc::new(move |ctx| Box::pin(callback(ctx))),
        }
    }

    pub fn allow_errors(mut self, allow: bool) -> Self {
        self.allow_errors = allow;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    fn clone_for_dispatch(&self) -> Self {
        Self {
            id: self.id.clone(),
            plugin_id: self.plugin_id.clone(),
            enabled: self.enabled,
            allow_errors: self.allow_errors,
            priority: self.priority,
            once: self.once,
            sequence: self.sequence,
            callback: self.callback.clone(),
        }
    }
}

/// Hook context trait for passing data to hooks.
pub trait HookContext: Send + Sync {
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
    fn hook_name(&self) -> &str;

    /// Sequential dispatch checks this after every handler; returning true
    /// halts remaining handlers for the current `emit` call. Contexts that
    /// never cancel can rely on the default.
    fn stop_propagation(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait HookMiddleware: Send + Sync {
    async fn before_hook(&self, hook_name: &str, context: &mut dyn HookContext) -> HostResult<()>;
    async fn after_hook(&self, hook_name: &str, context: &mut dyn HookContext) -> HostResult<()>;
}

/// Standard hook types for the platform.
pub mod standard_hooks {
    pub const PLUGIN_LOADED: &str = "plugin.loaded";
    pub const PLUGIN_INITIALIZED: &str = "plugin.initialized";
    pub const PLUGIN_STARTED: &str = "plugin.started";
    pub const PLUGIN_STOPPED: &str = "plugin.stopped";
    pub const PLUGIN_UNLOADED: &str = "plugin.unloaded";
    pub const PLUGIN_RELOADED: &str = "plugin.reloaded";
    pub const PLUGIN_FAILED: &str = "plugin.failed";
    pub const PLUGIN_ERROR: &str = "plugin.error";

    pub const DATA_LOADED: &str = "data.loaded";
    pub const DATA_SAVED: &str = "data.saved";
    pub const DATA_DELETED: &str = "data.deleted";

    pub const UI_RENDER: &str = "ui.render";
    pub const UI_EVENT: &str = "ui.event";

    pub const API_REQUEST: &str = "api.request";
    pub const API_RESPONSE: &str = "api.response";
}

/// Hook context for plugin lifecycle events.
pub struct PluginLifecycleContext {
    pub plugin_id: String,
    pub hook_name: String,
    pub data: std::collections::HashMap<String, serde_json::Value>,
    pub cancelled: bool,
}

impl HookContext for PluginLifecycleContext {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn hook_name(&self) -> &str {
        &self.hook_name
    }

    fn stop_propagation(&self) -> bool {
        self.cancelled
    }
}

/// Hook context for data events.
pub struct DataEventContext {
    pub hook_name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub metadata: std::collections::HashMap<String, String>,
}

impl HookContext for DataEventContext {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn hook_name(&self) -> &str {
        &self.hook_name
    }
}

/// Hook context for API requests.
pub struct ApiRequestContext {
    pub hook_name: String,
    pub method: String,
    pub path: String,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub modified: bool,
}

impl HookContext for ApiRequestContext {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn hook_name(&self) -> &str {
        &self.hook_name
    }
}

/// Builder for creating hook handlers.
pub struct HookHandlerBuilder {
    id: Option<String>,
    plugin_id: Option<String>,
    priority: i32,
    allow_errors: bool,
    once: bool,
}

impl HookHandlerBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            plugin_id: None,
            priority: 0,
            allow_errors: false,
            once: false,
        }
    }

    pub fn id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }

    pub fn plugin_id(mut self, plugin_id: String) -> Self {
        self.plugin_id = Some(plugin_id);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn allow_errors(mut self, allow: bool) -> Self {
        self.allow_errors = allow;
        self
    }

    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn build<F, Fut>(self, callback: F) -> HookHandler
    where
        F: Fn(&mut dyn HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HostResult<()>> + Send + 'static,
    {
        let id = self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let plugin_id = self.plugin_id.unwrap_or_else(|| "unknown".to_string());

        let mut handler = HookHandler::new(id, plugin_id, callback);
        handler.priority = self.priority;
        handler.allow_errors = self.allow_errors;
        handler.once = self.once;
        handler
    }
}

impl Default for HookHandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestContext {
        hook_name: String,
        counter: i32,
        order: Vec<String>,
    }

    impl HookContext for TestContext {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }

        fn hook_name(&self) -> &str {
            &self.hook_name
        }
    }

    #[tokio::test]
    async fn trigger_invokes_registered_handler() {
        let manager = HookManager::new();

        let handler = HookHandler::new(
            "test-handler".to_string(),
            "test-plugin".to_string(),
            |ctx| async move {
                if let Some(test_ctx) = ctx.as_any_mut().downcast_mut::<TestContext>() {
                    test_ctx.counter += 1;
                }
                Ok(())
            },
        );

        manager.register_hook("test.hook", handler).unwrap();

        let context = Arc::new(Mutex::new(TestContext {
            hook_name: "test.hook".to_string(),
            counter: 0,
            order: Vec::new(),
        }));

        manager
            .emit("test.hook", context.clone(), EmitMode::Sequential)
            .await
            .unwrap();

        assert_eq!(context.lock().await.counter, 1);
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let manager = HookManager::new();

        for (id, priority) in [("low", 0), ("high", 10), ("mid", 5)] {
            let id = id.to_string();
            let handler = HookHandlerBuilder::new()
                .id(id.clone())
                .priority(priority)
                .build(move |ctx| {
                    let id = id.clone();
                    async move {
                        if let Some(test_ctx) = ctx.as_any_mut().downcast_mut::<TestContext>() {
                            test_ctx.order.push(id);
                        }
                        Ok(())
                    }
                });
            manager.register_hook("test.hook", handler).unwrap();
        }

        let context = Arc::new(Mutex::new(TestContext {
            hook_name: "test.hook".to_string(),
            counter: 0,
            order: Vec::new(),
        }));

        manager
            .emit("test.hook", context.clone(), EmitMode::Sequential)
            .await
            .unwrap();

        assert_eq!(context.lock().await.order, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn glob_pattern_matches_hook() {
        let manager = HookManager::new();

        let handler = HookHandler::new(
            "glob-handler".to_string(),
            "test-plugin".to_string(),
            |ctx| async move {
                if let Some(test_ctx) = ctx.as_any_mut().downcast_mut::<TestContext>() {
                    test_ctx.counter += 1;
                }
                Ok(())
            },
        );

        manager.register_hook("plugin.*", handler).unwrap();

        let context = Arc::new(Mutex::new(TestContext {
            hook_name: "plugin.loaded".to_string(),
            counter: 0,
            order: Vec::new(),
        }));

        manager
            .emit("plugin.loaded", context.clone(), EmitMode::Sequential)
            .await
            .unwrap();

        assert_eq!(context.lock().await.counter, 1);
    }

    #[tokio::test]
    async fn once_handler_runs_only_once() {
        let manager = HookManager::new();

        let handler = HookHandlerBuilder::new()
            .id("once-handler".to_string())
            .once(true)
            .build(|ctx| async move {
                if let Some(test_ctx) = ctx.as_any_mut().downcast_mut::<TestContext>() {
                    test_ctx.counter += 1;
                }
                Ok(())
            });

        manager.register_hook("test.hook", handler).unwrap();

        let context = Arc::new(Mutex::new(TestContext {
            hook_name: "test.hook".to_string(),
            counter: 0,
            order: Vec::new(),
        }));

        manager
            .emit("test.hook", context.clone(), EmitMode::Sequential)
            .await
            .unwrap();
        manager
            .emit("test.hook", context.clone(), EmitMode::Sequential)
            .await
            .unwrap();

        assert_eq!(context.lock().await.counter, 1);
        assert_eq!(manager.handler_count("test.hook"), 0);
    }

    #[tokio::test]
    async fn emit_until_success_stops_at_first_ok() {
        let manager = HookManager::new();

        let failing = HookHandlerBuilder::new()
            .id("failing".to_string())
            .priority(10)
            .allow_errors(true)
            .build(|_ctx| async move {
                Err(HostError::Other("boom".to_string()))
            });
        let succeeding = HookHandlerBuilder::new()
            .id("succeeding".to_string())
            .priority(5)
            .build(|ctx| async move {
                if let Some(test_ctx) = ctx.as_any_mut().downcast_mut::<TestContext>() {
                    test_ctx.counter += 1;
                }
                Ok(())
            });

        manager.register_hook("test.hook", failing).unwrap();
        manager.register_hook("test.hook", succeeding).unwrap();

        let context = Arc::new(Mutex::new(TestContext {
            hook_name: "test.hook".to_string(),
            counter: 0,
            order: Vec::new(),
        }));

        let results = manager
            .emit_until_success("test.hook", context.clone())
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(context.lock().await.counter, 1);
    }
}
