use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use orbit_core::Result;

use crate::engine::{PolledTask, WorkerGateway};
use crate::executor::ExecutionHost;
use crate::run_store::RunStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub task_queue: String,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// Backoff after a failed poll.
    pub poll_error_backoff: Duration,
    pub identity: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_queue: "orbit-workflows".to_string(),
            poll_interval: Duration::from_millis(500),
            poll_error_backoff: Duration::from_secs(2),
            identity: "orbit-worker".to_string(),
        }
    }
}

/// Polls the engine task queue and drives runs through the execution host.
/// Signals and cancellation requests arriving from the engine are routed to
/// the owning run's hub or token.
pub struct Worker {
    config: WorkerConfig,
    gateway: Arc<dyn WorkerGateway>,
    host: Arc<ExecutionHost>,
    store: Arc<RunStore>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        gateway: Arc<dyn WorkerGateway>,
        host: Arc<ExecutionHost>,
    ) -> Self {
        let store = host.store().clone();
        Self {
            config,
            gateway,
            host,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Poll loop. Returns after a graceful shutdown: polling stops, then
    /// in-flight runs drain.
    pub async fn run(&self) -> Result<()> {
        let mut inflight: JoinSet<()> = JoinSet::new();
        tracing::info!(
            task_queue = %self.config.task_queue,
            identity = %self.config.identity,
            "worker polling"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = self.gateway.poll_task(&self.config.task_queue) => match polled {
                    Ok(Some(PolledTask::Workflow(task))) => {
                        let host = self.host.clone();
                        let gateway = self.gateway.clone();
                        inflight.spawn(async move {
                            let run_id = task.run_id;
                            match host.execute_polled(task).await {
                                Ok(record) => {
                                    if let Err(e) = gateway
                                        .complete_task(
                                            record.run_id,
                                            record.status,
                                            record.output,
                                            record.error,
                                        )
                                        .await
                                    {
                                        tracing::error!(%run_id, error = %e, "failed to report completion");
                                    }
                                }
                                Err(e) => {
                                    tracing::error!(%run_id, error = %e, "task execution failed");
                                }
                            }
                        });
                    }
                    Ok(Some(PolledTask::Signal { workflow_id, name, payload })) => {
                        if let Err(e) = self.store.deliver_signal(&workflow_id, &name, payload) {
                            tracing::warn!(%workflow_id, signal = %name, error = %e, "signal dropped");
                        }
                    }
                    Ok(Some(PolledTask::Cancellation { workflow_id })) => {
                        if let Err(e) = self.store.request_cancel(&workflow_id) {
                            tracing::warn!(%workflow_id, error = %e, "cancellation dropped");
                        }
                    }
                    Ok(None) => {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "poll failed");
                        tokio::time::sleep(self.config.poll_error_backoff).await;
                    }
                }
            }
        }

        tracing::info!(inflight = inflight.len(), "worker draining");
        while inflight.join_next().await.is_some() {}
        tracing::info!("worker stopped");
        Ok(())
    }
}
