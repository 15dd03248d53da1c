use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use orbit_core::activity::{
    ActivityCall, ActivityContext, ActivityDispatcher, ActivityRegistry, HeartbeatSink,
};
use orbit_core::{ErrorKind, OrbitError, Result};

use crate::engine::WorkerGateway;

/// Heartbeat sink backed by the worker gateway. A `true` answer means the
/// engine asked the run to cancel.
struct GatewaySink {
    gateway: Arc<dyn WorkerGateway>,
}

#[async_trait]
impl HeartbeatSink for GatewaySink {
    async fn beat(&self, run_id: Uuid, invocation_id: &str) -> bool {
        match self
            .gateway
            .record_activity_heartbeat(run_id, invocation_id)
            .await
        {
            Ok(cancel_requested) => cancel_requested,
            Err(e) => {
                tracing::warn!(%run_id, invocation_id, error = %e, "heartbeat failed");
                false
            }
        }
    }
}

/// Runs registered activities with retry, timeout, heartbeat, and
/// cancellation semantics. A worker-wide semaphore bounds in-flight
/// activities across all runs.
pub struct LocalActivityDispatcher {
    activities: Arc<ActivityRegistry>,
    gateway: Arc<dyn WorkerGateway>,
    permits: Arc<Semaphore>,
}

impl LocalActivityDispatcher {
    pub fn new(
        activities: Arc<ActivityRegistry>,
        gateway: Arc<dyn WorkerGateway>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            activities,
            gateway,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Automatic liveness pump for activities declaring a heartbeat
    /// interval; cancels the call token when the engine requests it.
    fn spawn_heartbeat_pump(
        &self,
        call: &ActivityCall,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let gateway = self.gateway.clone();
        let run_id = call.run_id;
        let invocation_id = call.invocation_id.clone();
        let token = call.cancellation.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match gateway
                    .record_activity_heartbeat(run_id, &invocation_id)
                    .await
                {
                    Ok(true) => {
                        token.cancel();
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(%run_id, invocation_id = %invocation_id, error = %e, "heartbeat pump failed");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ActivityDispatcher for LocalActivityDispatcher {
    async fn dispatch(&self, call: ActivityCall) -> Result<serde_json::Value> {
        let entry = self.activities.get(&call.name).ok_or_else(|| {
            OrbitError::internal(format!("activity {} is not registered", call.name))
        })?;
        let handler = entry.handler.clone();

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrbitError::internal("activity permits closed"))?;

        let sink: Arc<dyn HeartbeatSink> = Arc::new(GatewaySink {
            gateway: self.gateway.clone(),
        });

        let mut attempt: u32 = 1;
        loop {
            if call.cancellation.is_cancelled() {
                return Err(OrbitError::cancelled(format!(
                    "activity {} cancelled",
                    call.name
                )));
            }

            let ctx = ActivityContext::new(
                call.workflow_id.clone(),
                call.run_id,
                call.name.clone(),
                call.invocation_id.clone(),
                attempt,
                call.cancellation.clone(),
                sink.clone(),
            );

            let pump = call
                .options
                .heartbeat_interval
                .map(|interval| self.spawn_heartbeat_pump(&call, interval));

            let attempt_future = handler(ctx, call.input.clone());
            let outcome = tokio::select! {
                _ = call.cancellation.cancelled() => Err(OrbitError::cancelled(format!(
                    "activity {} cancelled",
                    call.name
                ))),
                timed = tokio::time::timeout(call.options.start_to_close, attempt_future) => {
                    match timed {
                        Ok(result) => result,
                        Err(_) => Err(OrbitError::timeout(format!(
                            "activity {} exceeded start-to-close of {:?}",
                            call.name, call.options.start_to_close
                        ))),
                    }
                }
            };

            if let Some(pump) = pump {
                pump.abort();
            }

            match outcome {
                Ok(value) => {
                    if let Err(e) = self
                        .gateway
                        .record_activity_result(call.run_id, &call.invocation_id, value.clone())
                        .await
                    {
                        tracing::warn!(
                            invocation_id = %call.invocation_id,
                            error = %e,
                            "failed to record activity result"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.kind == ErrorKind::Cancelled => return Err(e),
                Err(e) => match call.options.retry.next_delay(attempt, &e) {
                    Some(delay) => {
                        tracing::warn!(
                            activity = %call.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            kind = e.kind.as_str(),
                            error = %e,
                            "activity attempt failed, retrying"
                        );
                        tokio::select! {
                            _ = call.cancellation.cancelled() => {
                                return Err(OrbitError::cancelled(format!(
                                    "activity {} cancelled during backoff",
                                    call.name
                                )));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use orbit_core::activity::ActivityOptions;
    use orbit_core::workflow::WorkflowStatus;
    use orbit_core::{RetryPolicy, UserFacingError};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::engine::PolledTask;

    struct NullGateway;

    #[async_trait]
    impl WorkerGateway for NullGateway {
        async fn poll_task(&self, _task_queue: &str) -> Result<Option<PolledTask>> {
            Ok(None)
        }

        async fn complete_task(
            &self,
            _run_id: Uuid,
            _status: WorkflowStatus,
            _output: Option<serde_json::Value>,
            _error: Option<UserFacingError>,
        ) -> Result<()> {
            Ok(())
        }

        async fn record_activity_result(
            &self,
            _run_id: Uuid,
            _invocation_id: &str,
            _result: serde_json::Value,
        ) -> Result<()> {
            Ok(())
        }

        async fn record_activity_heartbeat(
            &self,
            _run_id: Uuid,
            _invocation_id: &str,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    fn call(name: &str, options: ActivityOptions) -> ActivityCall {
        ActivityCall {
            name: name.to_string(),
            input: serde_json::json!({}),
            options,
            invocation_id: format!("{name}#0"),
            workflow_id: "wf:1".to_string(),
            run_id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
        }
    }

    fn dispatcher_with(registry: ActivityRegistry) -> LocalActivityDispatcher {
        LocalActivityDispatcher::new(Arc::new(registry), Arc::new(NullGateway), 10)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut registry = ActivityRegistry::new();
        let counter = attempts.clone();
        registry.register("flaky", move |_ctx, _input: serde_json::Value| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OrbitError::transient("network blip"))
                } else {
                    Ok(serde_json::json!("ok"))
                }
            }
        });

        let dispatcher = dispatcher_with(registry);
        let out = dispatcher.dispatch(call("flaky", ActivityOptions::default())).await.unwrap();
        assert_eq!(out, serde_json::json!("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut registry = ActivityRegistry::new();
        let counter = attempts.clone();
        registry.register("strict", move |_ctx, _input: serde_json::Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<serde_json::Value, _>(OrbitError::validation("bad"))
            }
        });

        let dispatcher = dispatcher_with(registry);
        let err = dispatcher
            .dispatch(call("strict", ActivityOptions::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_to_close_times_out() {
        let mut registry = ActivityRegistry::new();
        registry.register("slow", |_ctx, _input: serde_json::Value| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::json!("never"))
        });

        let dispatcher = dispatcher_with(registry);
        let options = ActivityOptions {
            start_to_close: Duration::from_millis(50),
            retry: RetryPolicy::none(),
            ..ActivityOptions::default()
        };
        let err = dispatcher.dispatch(call("slow", options)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn cancellation_interrupts_inflight_attempt() {
        let mut registry = ActivityRegistry::new();
        registry.register("hang", |_ctx, _input: serde_json::Value| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::json!("never"))
        });

        let dispatcher = dispatcher_with(registry);
        let mut c = call("hang", ActivityOptions::default());
        let token = CancellationToken::new();
        c.cancellation = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = dispatcher.dispatch(c).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn unregistered_activity_is_internal() {
        let dispatcher = dispatcher_with(ActivityRegistry::new());
        let err = dispatcher
            .dispatch(call("ghost", ActivityOptions::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
