//! CMS document shapes the activities read and write. Field names follow
//! the Payload collections (camelCase).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationRecord {
    pub id: String,
    pub installation_id: i64,
    pub account_login: String,
    pub workspace: String,
    pub status: String,
    #[serde(default)]
    pub encrypted_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl InstallationRecord {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub workspace: String,
    pub workspace_slug: String,
    pub status: String,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub health_endpoints: Vec<String>,
    #[serde(default)]
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    pub source_owner: String,
    pub source_repo: String,
    pub is_github_template: bool,
    #[serde(default)]
    pub clone_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualClusterRecord {
    pub id: String,
    pub app: String,
    pub environment: String,
    pub logical_name: String,
    pub status: String,
    #[serde(default)]
    pub bifrost_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub app: String,
    pub principal: String,
    pub cluster: String,
    pub scopes: Vec<String>,
    pub hashed_secret: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    pub id: String,
    pub virtual_cluster: String,
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub schema_definition: Option<String>,
    #[serde(default)]
    pub schema_id: Option<String>,
    pub status: String,
}

fn default_partitions() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub id: String,
    pub source_cluster: String,
    pub target_principal: String,
    pub scopes: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEdgeRecord {
    pub id: String,
    pub producer_app: String,
    pub topic: String,
    pub consumer_app: String,
    pub last_seen: DateTime<Utc>,
    pub activity_24h: u64,
    pub status: String,
}
