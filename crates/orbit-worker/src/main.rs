//! The orbit worker: loads settings from the environment, connects to the
//! workflow engine, walks the workflow/activity/schedule tables, and polls
//! the task queue until shutdown.
//!
//! Exit codes: 0 clean shutdown, 1 misconfiguration, 2 engine connect
//! failure.

mod health;

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use orbit_clients::{
    CliGit, GithubClient, GrpcBifrostClient, GrpcBuildClient, PayloadClient, S3ObjectStore,
};
use orbit_core::activity::ActivityRegistry;
use orbit_core::{OrbitError, WorkerSettings};
use orbit_orchestrator::activities::register_all;
use orbit_orchestrator::services::{TokenCipher, TokenService};
use orbit_orchestrator::{static_schedules, WorkerDeps};
use orbit_runtime::{
    ExecutionHost, GrpcEngine, LocalActivityDispatcher, RunStore, ScheduleRegistry, Worker,
    WorkerConfig,
};

enum StartupFailure {
    Misconfigured(OrbitError),
    EngineUnreachable(OrbitError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(StartupFailure::Misconfigured(e)) => {
            tracing::error!(error = %e, "worker misconfigured");
            ExitCode::from(1)
        }
        Err(StartupFailure::EngineUnreachable(e)) => {
            tracing::error!(error = %e, "workflow engine unreachable");
            ExitCode::from(2)
        }
    }
}

async fn run() -> Result<(), StartupFailure> {
    let settings =
        Arc::new(WorkerSettings::from_env().map_err(StartupFailure::Misconfigured)?);

    let identity = format!(
        "orbit-worker@{}",
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    );

    let health_state = health::HealthState::new();
    health::spawn(settings.health_port, health_state.clone())
        .await
        .map_err(|e| StartupFailure::Misconfigured(OrbitError::config(e.to_string())))?;

    // The engine is the one dependency the worker refuses to start
    // without.
    let engine = Arc::new(
        GrpcEngine::connect(
            &settings.engine.address,
            &settings.engine.namespace,
            &settings.engine.task_queue,
            &identity,
        )
        .await
        .map_err(StartupFailure::EngineUnreachable)?,
    );
    tracing::info!(
        address = %settings.engine.address,
        namespace = %settings.engine.namespace,
        "connected to workflow engine"
    );

    let deps = build_deps(&settings).map_err(StartupFailure::Misconfigured)?;

    let mut activities = ActivityRegistry::new();
    register_all(&mut activities, &deps);
    let workflows = orbit_orchestrator::table();
    tracing::info!(
        workflows = workflows.len(),
        activities = activities.len(),
        "registries walked"
    );

    let store = Arc::new(RunStore::new());
    let dispatcher = Arc::new(LocalActivityDispatcher::new(
        Arc::new(activities),
        engine.clone(),
        settings.max_concurrent_activities,
    ));
    let host = ExecutionHost::new(Arc::new(workflows), dispatcher, store);

    let mut schedules = ScheduleRegistry::new();
    for spec in static_schedules() {
        schedules.add(spec);
    }
    schedules
        .register_all(engine.as_ref())
        .await
        .map_err(StartupFailure::EngineUnreachable)?;

    let worker = Worker::new(
        WorkerConfig {
            task_queue: settings.engine.task_queue.clone(),
            identity,
            ..WorkerConfig::default()
        },
        engine.clone(),
        host,
    );

    health_state.mark_ready();

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });

    if let Err(e) = worker.run().await {
        tracing::error!(error = %e, "worker loop failed");
    }
    Ok(())
}

fn build_deps(settings: &Arc<WorkerSettings>) -> Result<Arc<WorkerDeps>, OrbitError> {
    let payload = Arc::new(PayloadClient::new(
        settings.api.base_url.clone(),
        settings.api.api_key.clone(),
    )?);
    let github = Arc::new(GithubClient::new(&settings.github_app)?);
    let bifrost = Arc::new(GrpcBifrostClient::new(&settings.bifrost.admin_url)?);
    let builds = Arc::new(GrpcBuildClient::new(&settings.build.service_address)?);
    let store = Arc::new(S3ObjectStore::from_settings(&settings.object_store));
    let cipher = Arc::new(TokenCipher::new(&settings.encryption_key)?);
    let tokens = Arc::new(TokenService::new(
        payload.clone(),
        github.clone(),
        cipher,
    ));
    let probe = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .map_err(|e| OrbitError::config(format!("probe client: {e}")))?;

    Ok(Arc::new(WorkerDeps {
        cms: payload,
        github,
        bifrost,
        store,
        builds,
        git: Arc::new(CliGit),
        tokens,
        settings: settings.clone(),
        probe,
    }))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
