use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{OrbitError, Result};
use crate::retry::RetryPolicy;

/// Per-invocation activity options.
///
/// Defaults match the short profile: five-minute start-to-close, no
/// heartbeat, standard backoff. [`ActivityOptions::long_running`] is the
/// profile for clones, builds, and image pushes.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    pub start_to_close: Duration,
    pub heartbeat_interval: Option<Duration>,
    pub retry: RetryPolicy,
    /// Run in a detached cancellation scope: the call completes even when
    /// the owning workflow was cancelled. Compensations and final status
    /// writes use this.
    pub detached: bool,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(5 * 60),
            heartbeat_interval: None,
            retry: RetryPolicy::default(),
            detached: false,
        }
    }
}

impl ActivityOptions {
    pub fn long_running() -> Self {
        Self {
            start_to_close: Duration::from_secs(60 * 60),
            heartbeat_interval: Some(Duration::from_secs(30)),
            ..Self::default()
        }
    }
}

/// Sink activities report heartbeats into. Returns `true` when the engine
/// has requested cancellation of the owning run.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn beat(&self, run_id: Uuid, invocation_id: &str) -> bool;
}

/// No-op sink for detached calls and tests.
pub struct NullHeartbeatSink;

#[async_trait]
impl HeartbeatSink for NullHeartbeatSink {
    async fn beat(&self, _run_id: Uuid, _invocation_id: &str) -> bool {
        false
    }
}

/// Execution context handed to every activity handler.
pub struct ActivityContext {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub name: String,
    pub invocation_id: String,
    pub attempt: u32,
    cancellation: CancellationToken,
    heartbeat: Arc<dyn HeartbeatSink>,
}

impl ActivityContext {
    pub fn new(
        workflow_id: String,
        run_id: Uuid,
        name: String,
        invocation_id: String,
        attempt: u32,
        cancellation: CancellationToken,
        heartbeat: Arc<dyn HeartbeatSink>,
    ) -> Self {
        Self {
            workflow_id,
            run_id,
            name,
            invocation_id,
            attempt,
            cancellation,
            heartbeat,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Errors with `Cancelled` when the run was asked to stop. Long-running
    /// activities call this between units of work.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(OrbitError::cancelled(format!(
                "activity {} cancelled",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    /// Report liveness. Errors with `Cancelled` when the engine answered the
    /// heartbeat with a cancellation request; the activity must wind down
    /// within its heartbeat interval.
    pub async fn heartbeat(&self) -> Result<()> {
        if self.heartbeat.beat(self.run_id, &self.invocation_id).await {
            self.cancellation.cancel();
        }
        self.check_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// A single activity invocation as seen by the dispatcher.
pub struct ActivityCall {
    pub name: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
    pub invocation_id: String,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub cancellation: CancellationToken,
}

/// Dispatches activity calls on behalf of workflow code. The runtime
/// implementation applies retries, timeouts, and heartbeat plumbing; test
/// implementations return canned results.
#[async_trait]
pub trait ActivityDispatcher: Send + Sync {
    async fn dispatch(&self, call: ActivityCall) -> Result<serde_json::Value>;
}

type BoxedActivityFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// Type-erased activity handler: JSON in, JSON out.
pub type BoxedActivityHandler =
    Arc<dyn Fn(ActivityContext, serde_json::Value) -> BoxedActivityFuture + Send + Sync>;

/// A registered activity.
pub struct ActivityEntry {
    pub name: &'static str,
    pub handler: BoxedActivityHandler,
}

/// Registry of all activities, keyed by name. The worker walks it at
/// startup; registration happens in the orchestrator's `register_all`.
#[derive(Default)]
pub struct ActivityRegistry {
    activities: HashMap<&'static str, ActivityEntry>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed activity handler. Input decode failures surface as
    /// `Validation`; outputs are serialized back to JSON for recording.
    pub fn register<I, O, F, Fut>(&mut self, name: &'static str, handler: F)
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize,
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let boxed: BoxedActivityHandler = Arc::new(move |ctx, input| {
            let handler = handler.clone();
            Box::pin(async move {
                let typed: I = serde_json::from_value(input).map_err(|e| {
                    OrbitError::validation(format!("invalid input for {}: {e}", ctx.name))
                })?;
                let output = handler(ctx, typed).await?;
                serde_json::to_value(output).map_err(OrbitError::from)
            })
        });
        self.activities.insert(name, ActivityEntry { name, handler: boxed });
    }

    pub fn get(&self, name: &str) -> Option<&ActivityEntry> {
        self.activities.get(name)
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.activities.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize, Serialize)]
    struct EchoInput {
        value: String,
    }

    fn test_ctx(name: &str) -> ActivityContext {
        ActivityContext::new(
            "wf:1".to_string(),
            Uuid::new_v4(),
            name.to_string(),
            format!("{name}#1"),
            1,
            CancellationToken::new(),
            Arc::new(NullHeartbeatSink),
        )
    }

    #[tokio::test]
    async fn registered_handler_round_trips_json() {
        let mut registry = ActivityRegistry::new();
        registry.register("echo", |_ctx, input: EchoInput| async move {
            Ok(format!("saw {}", input.value))
        });

        let entry = registry.get("echo").unwrap();
        let out = (entry.handler)(test_ctx("echo"), serde_json::json!({"value": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("saw hi"));
    }

    #[tokio::test]
    async fn bad_input_is_validation() {
        let mut registry = ActivityRegistry::new();
        registry.register("echo", |_ctx, input: EchoInput| async move { Ok(input.value) });

        let entry = registry.get("echo").unwrap();
        let err = (entry.handler)(test_ctx("echo"), serde_json::json!({"wrong": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn cancelled_context_reports() {
        let token = CancellationToken::new();
        let ctx = ActivityContext::new(
            "wf:1".into(),
            Uuid::new_v4(),
            "probe".into(),
            "probe#1".into(),
            1,
            token.clone(),
            Arc::new(NullHeartbeatSink),
        );
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert_eq!(
            ctx.check_cancelled().unwrap_err().kind,
            crate::ErrorKind::Cancelled
        );
    }

    #[test]
    fn long_running_profile() {
        let options = ActivityOptions::long_running();
        assert_eq!(options.start_to_close, Duration::from_secs(3600));
        assert_eq!(options.heartbeat_interval, Some(Duration::from_secs(30)));
        assert!(!options.detached);
    }
}
