//! Health-probe activities for the per-app scheduled check.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_core::activity::ActivityRegistry;

use crate::deps::WorkerDeps;
use crate::records::ApplicationRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeInput {
    pub app_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointCheck {
    pub url: String,
    pub ok: bool,
    #[serde(default)]
    pub status: Option<u16>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub app_id: String,
    pub healthy: bool,
    pub checks: Vec<EndpointCheck>,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("health.probe", move |_ctx, input: ProbeInput| {
        let d = d.clone();
        async move {
            let app: ApplicationRecord =
                get_as(d.cms.as_ref(), collections::APPLICATIONS, &input.app_id).await?;

            let mut checks = Vec::with_capacity(app.health_endpoints.len());
            for url in &app.health_endpoints {
                let started = Instant::now();
                let outcome = d
                    .probe
                    .get(url)
                    .timeout(std::time::Duration::from_secs(10))
                    .send()
                    .await;
                let latency_ms = started.elapsed().as_millis() as u64;
                match outcome {
                    Ok(response) => checks.push(EndpointCheck {
                        url: url.clone(),
                        ok: response.status().is_success(),
                        status: Some(response.status().as_u16()),
                        latency_ms,
                    }),
                    Err(_) => checks.push(EndpointCheck {
                        url: url.clone(),
                        ok: false,
                        status: None,
                        latency_ms,
                    }),
                }
            }

            // An app with no endpoints counts as healthy; nothing to probe.
            let healthy = checks.iter().all(|c| c.ok);
            Ok(HealthReport {
                app_id: input.app_id,
                healthy,
                checks,
            })
        }
    });

    let d = deps.clone();
    reg.register("health.record", move |_ctx, report: HealthReport| {
        let d = d.clone();
        async move {
            d.cms
                .record_health_check(serde_json::to_value(&report)?)
                .await
        }
    });
}
