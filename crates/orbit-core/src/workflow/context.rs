use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::id::WorkflowId;
use super::progress::{Progress, PROGRESS_QUERY};
use super::signal::SignalHub;
use super::traits::OrbitWorkflow;
use crate::activity::{ActivityCall, ActivityDispatcher, ActivityOptions};
use crate::error::{OrbitError, Result};
use crate::retry::RetryPolicy;

/// Query snapshots published by a run, readable through the engine while
/// the run is active and retained after it closes.
#[derive(Default)]
pub struct QueryState {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: &str, value: serde_json::Value) {
        self.values
            .write()
            .unwrap()
            .insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<serde_json::Value> {
        self.values.read().unwrap().get(name).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.values.read().unwrap().clone()
    }
}

/// A child workflow (or detached start) request.
pub struct ChildSpec {
    pub family: &'static str,
    pub workflow_id: WorkflowId,
    pub input: serde_json::Value,
    pub parent_cancellation: CancellationToken,
}

/// Starts workflows on behalf of workflow code. The runtime implementation
/// routes through the engine so id-reuse policies hold.
#[async_trait]
pub trait ChildLauncher: Send + Sync {
    /// Start a child run and await its output. Parent cancellation
    /// propagates through `parent_cancellation`.
    async fn launch(&self, spec: ChildSpec) -> Result<serde_json::Value>;

    /// Start an independent run without awaiting it (e.g. kicking off the
    /// token-refresh loop).
    async fn start_detached(&self, spec: ChildSpec) -> Result<()>;
}

/// A deferred activity call: compensation or finalizer.
#[derive(Debug, Clone)]
pub struct DeferredCall {
    pub activity: String,
    pub input: serde_json::Value,
}

/// Everything the runtime supplies when materializing a context.
pub struct ContextSeed {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub family: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub dispatcher: Arc<dyn ActivityDispatcher>,
    pub children: Arc<dyn ChildLauncher>,
    pub signals: Arc<SignalHub>,
    pub queries: Arc<QueryState>,
    pub cancellation: CancellationToken,
    /// Results recorded by a previous execution of this run; replayed
    /// invocations return these without re-running side effects.
    pub prior_results: HashMap<String, serde_json::Value>,
}

/// The only capability surface workflow code sees.
///
/// No wall clock, filesystem, or environment access: time comes from
/// [`WorkflowContext::start_time`], randomness from
/// [`WorkflowContext::deterministic_seed`], side effects from activities.
pub struct WorkflowContext {
    run_id: Uuid,
    workflow_id: String,
    family: String,
    attempt: u32,
    started_at: DateTime<Utc>,
    dispatcher: Arc<dyn ActivityDispatcher>,
    children: Arc<dyn ChildLauncher>,
    signals: Arc<SignalHub>,
    queries: Arc<QueryState>,
    cancellation: CancellationToken,
    recorded: RwLock<HashMap<String, serde_json::Value>>,
    sequence: AtomicU32,
    compensations: Mutex<Vec<DeferredCall>>,
    finalizers: Mutex<Vec<DeferredCall>>,
}

impl WorkflowContext {
    pub fn new(seed: ContextSeed) -> Self {
        Self {
            run_id: seed.run_id,
            workflow_id: seed.workflow_id,
            family: seed.family,
            attempt: seed.attempt,
            started_at: seed.started_at,
            dispatcher: seed.dispatcher,
            children: seed.children,
            signals: seed.signals,
            queries: seed.queries,
            cancellation: seed.cancellation,
            recorded: RwLock::new(seed.prior_results),
            sequence: AtomicU32::new(0),
            compensations: Mutex::new(Vec::new()),
            finalizers: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Deterministic run start time. Anything time-derived (commit dates,
    /// archive keys) uses this, never the wall clock.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Deterministic seed derived from the workflow id; identical across
    /// replays of the same run.
    pub fn deterministic_seed(&self) -> u64 {
        let digest = Sha256::digest(self.workflow_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Begin an activity invocation. Options are set on the returned
    /// builder; `run` awaits the (possibly replayed) result.
    pub fn activity<I: Serialize>(&self, name: &str, input: I) -> ActivityInvocation<'_> {
        ActivityInvocation {
            ctx: self,
            name: name.to_string(),
            input: serde_json::to_value(input).map_err(OrbitError::from),
            options: ActivityOptions::default(),
        }
    }

    /// Register a compensation: an activity scheduled in a detached scope,
    /// in reverse registration order, when the run fails or is cancelled.
    pub fn compensate<I: Serialize>(&self, activity: &str, input: I) -> Result<()> {
        let call = DeferredCall {
            activity: activity.to_string(),
            input: serde_json::to_value(input)?,
        };
        self.compensations.lock().unwrap().push(call);
        Ok(())
    }

    /// Register a finalizer: like a compensation, but scheduled regardless
    /// of outcome (work-dir cleanup is the canonical case).
    pub fn finally<I: Serialize>(&self, activity: &str, input: I) -> Result<()> {
        let call = DeferredCall {
            activity: activity.to_string(),
            input: serde_json::to_value(input)?,
        };
        self.finalizers.lock().unwrap().push(call);
        Ok(())
    }

    /// Drain registered compensations, most recent first.
    pub fn take_compensations(&self) -> Vec<DeferredCall> {
        let mut calls = std::mem::take(&mut *self.compensations.lock().unwrap());
        calls.reverse();
        calls
    }

    /// Drain registered finalizers, most recent first.
    pub fn take_finalizers(&self) -> Vec<DeferredCall> {
        let mut calls = std::mem::take(&mut *self.finalizers.lock().unwrap());
        calls.reverse();
        calls
    }

    /// Durable timer. Errors with `Cancelled` when the run is cancelled
    /// mid-sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(OrbitError::cancelled(format!(
                "workflow {} cancelled during timer",
                self.workflow_id
            ))),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Await a named signal. `Ok(None)` on timeout; `Cancelled` when the
    /// run is cancelled while waiting.
    pub async fn wait_signal<T: DeserializeOwned>(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<T>> {
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(OrbitError::cancelled(format!(
                "workflow {} cancelled while waiting for signal {name}",
                self.workflow_id
            ))),
            _ = tokio::time::sleep(timeout) => Ok(None),
            payload = self.signals.wait(name) => {
                let typed = serde_json::from_value(payload).map_err(|e| {
                    OrbitError::validation(format!("signal {name} payload invalid: {e}"))
                })?;
                Ok(Some(typed))
            }
        }
    }

    /// Publish a named query snapshot.
    pub fn publish_query<T: Serialize>(&self, name: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.queries.publish(name, v),
            Err(e) => tracing::warn!(
                workflow_id = %self.workflow_id,
                query = name,
                error = %e,
                "failed to serialize query snapshot"
            ),
        }
    }

    /// Publish the standard progress query.
    pub fn publish_progress(&self, progress: &Progress) {
        self.publish_query(PROGRESS_QUERY, progress);
    }

    /// Start a child workflow and await its output. The child shares
    /// cancellation with this run.
    pub async fn child<W: OrbitWorkflow>(
        &self,
        workflow_id: WorkflowId,
        input: W::Input,
    ) -> Result<W::Output> {
        let cache_key = format!("child:{workflow_id}");
        if let Some(prior) = self.recorded_result(&cache_key) {
            return decode(prior, &cache_key);
        }
        let spec = ChildSpec {
            family: W::info().family,
            workflow_id,
            input: serde_json::to_value(input)?,
            parent_cancellation: self.cancellation.clone(),
        };
        let output = self.children.launch(spec).await?;
        self.record(cache_key.clone(), output.clone());
        decode(output, &cache_key)
    }

    /// Start an independent workflow without awaiting it.
    pub async fn start_workflow<W: OrbitWorkflow>(
        &self,
        workflow_id: WorkflowId,
        input: W::Input,
    ) -> Result<()> {
        let cache_key = format!("start:{workflow_id}");
        if self.recorded_result(&cache_key).is_some() {
            return Ok(());
        }
        let spec = ChildSpec {
            family: W::info().family,
            workflow_id,
            input: serde_json::to_value(input)?,
            parent_cancellation: CancellationToken::new(),
        };
        self.children.start_detached(spec).await?;
        self.record(cache_key, serde_json::Value::Bool(true));
        Ok(())
    }

    fn next_invocation_id(&self, name: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{name}#{seq}")
    }

    fn recorded_result(&self, invocation_id: &str) -> Option<serde_json::Value> {
        self.recorded.read().unwrap().get(invocation_id).cloned()
    }

    fn record(&self, invocation_id: String, value: serde_json::Value) {
        self.recorded.write().unwrap().insert(invocation_id, value);
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| OrbitError::internal(format!("recorded result for {what} undecodable: {e}")))
}

/// Fluent builder for a single activity invocation.
pub struct ActivityInvocation<'a> {
    ctx: &'a WorkflowContext,
    name: String,
    input: Result<serde_json::Value>,
    options: ActivityOptions,
}

impl<'a> ActivityInvocation<'a> {
    pub fn start_to_close(mut self, timeout: Duration) -> Self {
        self.options.start_to_close = timeout;
        self
    }

    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.options.heartbeat_interval = Some(interval);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry = policy;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.options.retry = RetryPolicy::none();
        self
    }

    /// The 60-minute / 30-second-heartbeat profile for clones, builds, and
    /// image pushes.
    pub fn long_running(mut self) -> Self {
        let retry = self.options.retry.clone();
        self.options = ActivityOptions {
            retry,
            ..ActivityOptions::long_running()
        };
        self
    }

    /// Run in a detached cancellation scope: the call proceeds even when
    /// the workflow was cancelled.
    pub fn detached(mut self) -> Self {
        self.options.detached = true;
        self
    }

    pub async fn run<T: DeserializeOwned>(self) -> Result<T> {
        let input = self.input?;
        let invocation_id = self.ctx.next_invocation_id(&self.name);

        if let Some(prior) = self.ctx.recorded_result(&invocation_id) {
            return decode(prior, &invocation_id);
        }

        let cancellation = if self.options.detached {
            CancellationToken::new()
        } else {
            if self.ctx.is_cancelled() {
                return Err(OrbitError::cancelled(format!(
                    "workflow {} cancelled before scheduling {}",
                    self.ctx.workflow_id, self.name
                )));
            }
            self.ctx.cancellation.child_token()
        };

        let call = ActivityCall {
            name: self.name,
            input,
            options: self.options,
            invocation_id: invocation_id.clone(),
            workflow_id: self.ctx.workflow_id.clone(),
            run_id: self.ctx.run_id,
            cancellation,
        };

        let output = self.ctx.dispatcher.dispatch(call).await?;
        self.ctx.record(invocation_id.clone(), output.clone());
        decode(output, &invocation_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingDispatcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActivityDispatcher for CountingDispatcher {
        async fn dispatch(&self, call: ActivityCall) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "echo": call.input }))
        }
    }

    struct NoChildren;

    #[async_trait]
    impl ChildLauncher for NoChildren {
        async fn launch(&self, _spec: ChildSpec) -> Result<serde_json::Value> {
            Err(OrbitError::internal("no children in this test"))
        }

        async fn start_detached(&self, _spec: ChildSpec) -> Result<()> {
            Ok(())
        }
    }

    fn seeded(prior: HashMap<String, serde_json::Value>) -> (WorkflowContext, Arc<CountingDispatcher>) {
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
        });
        let ctx = WorkflowContext::new(ContextSeed {
            run_id: Uuid::new_v4(),
            workflow_id: "build:app-1:1".to_string(),
            family: "build".to_string(),
            attempt: 1,
            started_at: Utc::now(),
            dispatcher: dispatcher.clone(),
            children: Arc::new(NoChildren),
            signals: Arc::new(SignalHub::new()),
            queries: Arc::new(QueryState::new()),
            cancellation: CancellationToken::new(),
            prior_results: prior,
        });
        (ctx, dispatcher)
    }

    #[tokio::test]
    async fn invocation_ids_are_sequential() {
        let (ctx, dispatcher) = seeded(HashMap::new());
        let _: serde_json::Value = ctx.activity("a", 1).run().await.unwrap();
        let _: serde_json::Value = ctx.activity("a", 2).run().await.unwrap();
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn replay_returns_recorded_result_without_dispatch() {
        let mut prior = HashMap::new();
        prior.insert("fetch#0".to_string(), serde_json::json!({"cached": true}));
        let (ctx, dispatcher) = seeded(prior);

        let out: serde_json::Value = ctx.activity("fetch", ()).run().await.unwrap();
        assert_eq!(out, serde_json::json!({"cached": true}));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_workflow_refuses_new_activities() {
        let (ctx, _) = seeded(HashMap::new());
        ctx.cancellation().cancel();
        let err = ctx
            .activity("late", ())
            .run::<serde_json::Value>()
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn detached_activity_runs_after_cancellation() {
        let (ctx, dispatcher) = seeded(HashMap::new());
        ctx.cancellation().cancel();
        let out: serde_json::Value = ctx
            .activity("final_status", ())
            .detached()
            .run()
            .await
            .unwrap();
        assert_eq!(out["echo"], serde_json::Value::Null);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compensations_drain_in_reverse() {
        let (ctx, _) = seeded(HashMap::new());
        ctx.compensate("undo_a", serde_json::json!({"a": 1})).unwrap();
        ctx.compensate("undo_b", serde_json::json!({"b": 2})).unwrap();

        let calls = ctx.take_compensations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].activity, "undo_b");
        assert_eq!(calls[1].activity, "undo_a");
        assert!(ctx.take_compensations().is_empty());
    }

    #[tokio::test]
    async fn sleep_observes_cancellation() {
        let (ctx, _) = seeded(HashMap::new());
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = ctx.sleep(Duration::from_secs(3600)).await.unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn signal_timeout_is_none() {
        let (ctx, _) = seeded(HashMap::new());
        let got: Option<String> = ctx
            .wait_signal("user_choice", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn seed_is_stable_per_workflow_id() {
        let (ctx, _) = seeded(HashMap::new());
        assert_eq!(ctx.deterministic_seed(), ctx.deterministic_seed());
    }

    #[tokio::test]
    async fn progress_query_is_published() {
        let (ctx, _) = seeded(HashMap::new());
        let progress = Progress::at_step("validating", 1, 3, "checking input", ctx.start_time());
        ctx.publish_progress(&progress);

        let snapshot = ctx.queries.get(PROGRESS_QUERY).unwrap();
        assert_eq!(snapshot["current_step"], "validating");
    }
}
