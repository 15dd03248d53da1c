//! Lineage aggregation activities. Edges are flat
//! `(producer, topic, consumer)` tuples in the CMS; traversal happens by
//! query, never by pointer chasing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, find_as, Filter};
use orbit_core::activity::ActivityRegistry;

use crate::deps::WorkerDeps;
use crate::records::LineageEdgeRecord;

/// No activity for this long marks an edge inactive.
const INACTIVE_AFTER_HOURS: i64 = 24;
/// No activity for this long archives it.
const ARCHIVE_AFTER_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub producer_app: String,
    pub topic: String,
    pub consumer_app: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default = "one")]
    pub count: u64,
}

fn one() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessBatchInput {
    pub events: Vec<ActivityEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub created: u32,
    pub updated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceInput {
    /// Test hook; defaults to the activity's wall clock.
    #[serde(default)]
    pub reference_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaleResetStats {
    pub reset: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkStats {
    pub inactive: u32,
    pub archived: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub edges: u32,
    pub object_key: String,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("lineage.process_batch", move |_ctx, input: ProcessBatchInput| {
        let d = d.clone();
        async move {
            let mut stats = BatchStats::default();
            for event in input.events {
                let existing: Vec<LineageEdgeRecord> = find_as(
                    d.cms.as_ref(),
                    collections::LINEAGE_EDGES,
                    &Filter::new()
                        .eq("producerApp", &event.producer_app)
                        .eq("topic", &event.topic)
                        .eq("consumerApp", &event.consumer_app),
                )
                .await?;

                match existing.into_iter().next() {
                    Some(edge) => {
                        let last_seen = edge.last_seen.max(event.observed_at);
                        d.cms
                            .patch(
                                collections::LINEAGE_EDGES,
                                &edge.id,
                                serde_json::json!({
                                    "lastSeen": last_seen,
                                    "activity24h": edge.activity_24h + event.count,
                                    "status": "active",
                                }),
                            )
                            .await?;
                        stats.updated += 1;
                    }
                    None => {
                        d.cms
                            .create(
                                collections::LINEAGE_EDGES,
                                serde_json::json!({
                                    "producerApp": event.producer_app,
                                    "topic": event.topic,
                                    "consumerApp": event.consumer_app,
                                    "lastSeen": event.observed_at,
                                    "activity24h": event.count,
                                    "status": "active",
                                }),
                            )
                            .await?;
                        stats.created += 1;
                    }
                }
            }
            Ok(stats)
        }
    });

    let d = deps.clone();
    reg.register("lineage.reset_stale", move |_ctx, input: MaintenanceInput| {
        let d = d.clone();
        async move {
            let now = input.reference_time.unwrap_or_else(Utc::now);
            let cutoff = now - Duration::hours(INACTIVE_AFTER_HOURS);
            let edges: Vec<LineageEdgeRecord> =
                find_as(d.cms.as_ref(), collections::LINEAGE_EDGES, &Filter::new()).await?;

            let mut stats = StaleResetStats::default();
            for edge in edges {
                if edge.last_seen < cutoff && edge.activity_24h > 0 {
                    d.cms
                        .patch(
                            collections::LINEAGE_EDGES,
                            &edge.id,
                            serde_json::json!({ "activity24h": 0 }),
                        )
                        .await?;
                    stats.reset += 1;
                }
            }
            Ok(stats)
        }
    });

    let d = deps.clone();
    reg.register("lineage.mark_inactive", move |_ctx, input: MaintenanceInput| {
        let d = d.clone();
        async move {
            let now = input.reference_time.unwrap_or_else(Utc::now);
            let inactive_cutoff = now - Duration::hours(INACTIVE_AFTER_HOURS);
            let archive_cutoff = now - Duration::days(ARCHIVE_AFTER_DAYS);
            let edges: Vec<LineageEdgeRecord> =
                find_as(d.cms.as_ref(), collections::LINEAGE_EDGES, &Filter::new()).await?;

            let mut stats = MarkStats::default();
            for edge in edges {
                let next_status = if edge.last_seen < archive_cutoff {
                    "archived"
                } else if edge.last_seen < inactive_cutoff {
                    "inactive"
                } else {
                    continue;
                };
                if edge.status != next_status {
                    d.cms
                        .patch(
                            collections::LINEAGE_EDGES,
                            &edge.id,
                            serde_json::json!({ "status": next_status }),
                        )
                        .await?;
                    match next_status {
                        "archived" => stats.archived += 1,
                        _ => stats.inactive += 1,
                    }
                }
            }
            Ok(stats)
        }
    });

    let d = deps.clone();
    reg.register("lineage.create_snapshots", move |_ctx, input: MaintenanceInput| {
        let d = d.clone();
        async move {
            let now = input.reference_time.unwrap_or_else(Utc::now);
            let edges: Vec<LineageEdgeRecord> =
                find_as(d.cms.as_ref(), collections::LINEAGE_EDGES, &Filter::new()).await?;

            let day = now.format("%Y-%m-%d").to_string();
            let object_key = format!("lineage-snapshots/{day}.json");
            let body = serde_json::to_vec(&edges)?;
            d.store
                .put_object(&object_key, body, "application/json")
                .await?;

            d.cms
                .create(
                    collections::LINEAGE_SNAPSHOTS,
                    serde_json::json!({
                        "day": day,
                        "objectKey": object_key,
                        "edgeCount": edges.len(),
                    }),
                )
                .await?;
            Ok(SnapshotStats {
                edges: edges.len() as u32,
                object_key,
            })
        }
    });
}
