use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tonic::transport::Channel;

use orbit_core::{ErrorKind, Result};

use crate::rpc;

/// Idempotency key every Bifrost call carries, derived from
/// `(operation, entity_id, workflow_id)` so retries and replays collapse
/// server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(operation: &str, entity_id: &str, workflow_id: &str) -> Self {
        let digest = Sha256::digest(format!("{operation}\n{entity_id}\n{workflow_id}").as_bytes());
        let mut hex = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualClusterSpec {
    pub logical_name: String,
    pub environment: String,
    pub app_id: String,
    pub workspace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualClusterInfo {
    pub logical_name: String,
    pub bifrost_ref: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub virtual_cluster: String,
    pub name: String,
    pub partitions: u32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub schema_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub virtual_cluster: String,
    pub name: String,
    pub bifrost_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSpec {
    pub principal: String,
    pub cluster: String,
    pub scopes: Vec<String>,
    pub hashed_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialInfo {
    pub principal: String,
    pub cluster: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessShareSpec {
    pub share_id: String,
    pub source_cluster: String,
    pub target_principal: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub subject: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub id: String,
}

/// The Kafka control-plane admin surface. Deletes are idempotent: removing
/// an absent resource is success.
#[async_trait]
pub trait BifrostAdmin: Send + Sync {
    async fn create_virtual_cluster(
        &self,
        spec: VirtualClusterSpec,
        key: IdempotencyKey,
    ) -> Result<VirtualClusterInfo>;
    async fn get_virtual_cluster(&self, logical_name: &str) -> Result<Option<VirtualClusterInfo>>;
    async fn set_virtual_cluster_read_only(
        &self,
        logical_name: &str,
        read_only: bool,
        key: IdempotencyKey,
    ) -> Result<()>;
    async fn delete_virtual_cluster(&self, logical_name: &str, key: IdempotencyKey) -> Result<()>;

    async fn create_topic(&self, spec: TopicSpec, key: IdempotencyKey) -> Result<TopicInfo>;
    async fn delete_topic(
        &self,
        virtual_cluster: &str,
        name: &str,
        key: IdempotencyKey,
    ) -> Result<()>;

    async fn upsert_credential(&self, spec: CredentialSpec, key: IdempotencyKey) -> Result<()>;
    async fn revoke_credential(
        &self,
        cluster: &str,
        principal: &str,
        key: IdempotencyKey,
    ) -> Result<()>;
    async fn list_credentials(&self, cluster: &str) -> Result<Vec<CredentialInfo>>;

    async fn upsert_access_share(&self, spec: AccessShareSpec, key: IdempotencyKey) -> Result<()>;
    async fn revoke_access_share(&self, share_id: &str, key: IdempotencyKey) -> Result<()>;

    async fn register_schema(&self, spec: SchemaSpec, key: IdempotencyKey) -> Result<SchemaRef>;
    async fn unregister_schema(&self, id: &str, key: IdempotencyKey) -> Result<()>;
}

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Empty {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VirtualClusterRequest {
        #[prost(string, tag = "1")]
        pub logical_name: String,
        #[prost(string, tag = "2")]
        pub environment: String,
        #[prost(string, tag = "3")]
        pub app_id: String,
        #[prost(string, tag = "4")]
        pub workspace: String,
        #[prost(string, tag = "5")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VirtualClusterReply {
        #[prost(string, tag = "1")]
        pub logical_name: String,
        #[prost(string, tag = "2")]
        pub bifrost_ref: String,
        #[prost(bool, tag = "3")]
        pub read_only: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetVirtualClusterRequest {
        #[prost(string, tag = "1")]
        pub logical_name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetVirtualClusterReply {
        #[prost(message, optional, tag = "1")]
        pub cluster: Option<VirtualClusterReply>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SetReadOnlyRequest {
        #[prost(string, tag = "1")]
        pub logical_name: String,
        #[prost(bool, tag = "2")]
        pub read_only: bool,
        #[prost(string, tag = "3")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeleteVirtualClusterRequest {
        #[prost(string, tag = "1")]
        pub logical_name: String,
        #[prost(string, tag = "2")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TopicRequest {
        #[prost(string, tag = "1")]
        pub virtual_cluster: String,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(uint32, tag = "3")]
        pub partitions: u32,
        #[prost(string, tag = "4")]
        pub config_json: String,
        #[prost(string, tag = "5")]
        pub schema_id: String,
        #[prost(string, tag = "6")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TopicReply {
        #[prost(string, tag = "1")]
        pub virtual_cluster: String,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(string, tag = "3")]
        pub bifrost_ref: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeleteTopicRequest {
        #[prost(string, tag = "1")]
        pub virtual_cluster: String,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(string, tag = "3")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CredentialRequest {
        #[prost(string, tag = "1")]
        pub principal: String,
        #[prost(string, tag = "2")]
        pub cluster: String,
        #[prost(string, repeated, tag = "3")]
        pub scopes: Vec<String>,
        #[prost(string, tag = "4")]
        pub hashed_secret: String,
        #[prost(string, tag = "5")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RevokeCredentialRequest {
        #[prost(string, tag = "1")]
        pub cluster: String,
        #[prost(string, tag = "2")]
        pub principal: String,
        #[prost(string, tag = "3")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListCredentialsRequest {
        #[prost(string, tag = "1")]
        pub cluster: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CredentialReply {
        #[prost(string, tag = "1")]
        pub principal: String,
        #[prost(string, tag = "2")]
        pub cluster: String,
        #[prost(string, repeated, tag = "3")]
        pub scopes: Vec<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListCredentialsReply {
        #[prost(message, repeated, tag = "1")]
        pub credentials: Vec<CredentialReply>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AccessShareRequest {
        #[prost(string, tag = "1")]
        pub share_id: String,
        #[prost(string, tag = "2")]
        pub source_cluster: String,
        #[prost(string, tag = "3")]
        pub target_principal: String,
        #[prost(string, repeated, tag = "4")]
        pub scopes: Vec<String>,
        #[prost(string, tag = "5")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RevokeAccessShareRequest {
        #[prost(string, tag = "1")]
        pub share_id: String,
        #[prost(string, tag = "2")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SchemaRequest {
        #[prost(string, tag = "1")]
        pub subject: String,
        #[prost(string, tag = "2")]
        pub definition: String,
        #[prost(string, tag = "3")]
        pub idempotency_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SchemaReply {
        #[prost(string, tag = "1")]
        pub id: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UnregisterSchemaRequest {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub idempotency_key: String,
    }
}

const SERVICE: &str = "bifrost";

/// Bifrost admin client over tonic.
pub struct GrpcBifrostClient {
    channel: Channel,
}

impl GrpcBifrostClient {
    /// Dials on first use; worker startup does not depend on Bifrost
    /// being reachable.
    pub fn new(address: &str) -> Result<Self> {
        let channel = rpc::connect_lazy(SERVICE, address)?;
        Ok(Self { channel })
    }

    pub async fn connect(address: &str) -> Result<Self> {
        let channel = rpc::connect(SERVICE, address).await?;
        Ok(Self { channel })
    }
}

/// Deleting something already gone is success.
fn absorb_not_found(result: Result<proto::Empty>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.kind == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl BifrostAdmin for GrpcBifrostClient {
    async fn create_virtual_cluster(
        &self,
        spec: VirtualClusterSpec,
        key: IdempotencyKey,
    ) -> Result<VirtualClusterInfo> {
        let reply: proto::VirtualClusterReply = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/CreateVirtualCluster",
            proto::VirtualClusterRequest {
                logical_name: spec.logical_name,
                environment: spec.environment,
                app_id: spec.app_id,
                workspace: spec.workspace,
                idempotency_key: key.as_str().to_string(),
            },
        )
        .await?;
        Ok(VirtualClusterInfo {
            logical_name: reply.logical_name,
            bifrost_ref: reply.bifrost_ref,
            read_only: reply.read_only,
        })
    }

    async fn get_virtual_cluster(&self, logical_name: &str) -> Result<Option<VirtualClusterInfo>> {
        let reply: proto::GetVirtualClusterReply = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/GetVirtualCluster",
            proto::GetVirtualClusterRequest {
                logical_name: logical_name.to_string(),
            },
        )
        .await?;
        Ok(reply.cluster.map(|c| VirtualClusterInfo {
            logical_name: c.logical_name,
            bifrost_ref: c.bifrost_ref,
            read_only: c.read_only,
        }))
    }

    async fn set_virtual_cluster_read_only(
        &self,
        logical_name: &str,
        read_only: bool,
        key: IdempotencyKey,
    ) -> Result<()> {
        let _: proto::Empty = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/SetVirtualClusterReadOnly",
            proto::SetReadOnlyRequest {
                logical_name: logical_name.to_string(),
                read_only,
                idempotency_key: key.as_str().to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn delete_virtual_cluster(&self, logical_name: &str, key: IdempotencyKey) -> Result<()> {
        absorb_not_found(
            rpc::unary(
                &self.channel,
                SERVICE,
                "/bifrost.admin.v1.AdminService/DeleteVirtualCluster",
                proto::DeleteVirtualClusterRequest {
                    logical_name: logical_name.to_string(),
                    idempotency_key: key.as_str().to_string(),
                },
            )
            .await,
        )
    }

    async fn create_topic(&self, spec: TopicSpec, key: IdempotencyKey) -> Result<TopicInfo> {
        let config_json = serde_json::to_string(&spec.config)?;
        let reply: proto::TopicReply = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/CreateTopic",
            proto::TopicRequest {
                virtual_cluster: spec.virtual_cluster,
                name: spec.name,
                partitions: spec.partitions,
                config_json,
                schema_id: spec.schema_id.unwrap_or_default(),
                idempotency_key: key.as_str().to_string(),
            },
        )
        .await?;
        Ok(TopicInfo {
            virtual_cluster: reply.virtual_cluster,
            name: reply.name,
            bifrost_ref: reply.bifrost_ref,
        })
    }

    async fn delete_topic(
        &self,
        virtual_cluster: &str,
        name: &str,
        key: IdempotencyKey,
    ) -> Result<()> {
        absorb_not_found(
            rpc::unary(
                &self.channel,
                SERVICE,
                "/bifrost.admin.v1.AdminService/DeleteTopic",
                proto::DeleteTopicRequest {
                    virtual_cluster: virtual_cluster.to_string(),
                    name: name.to_string(),
                    idempotency_key: key.as_str().to_string(),
                },
            )
            .await,
        )
    }

    async fn upsert_credential(&self, spec: CredentialSpec, key: IdempotencyKey) -> Result<()> {
        let _: proto::Empty = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/UpsertCredential",
            proto::CredentialRequest {
                principal: spec.principal,
                cluster: spec.cluster,
                scopes: spec.scopes,
                hashed_secret: spec.hashed_secret,
                idempotency_key: key.as_str().to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn revoke_credential(
        &self,
        cluster: &str,
        principal: &str,
        key: IdempotencyKey,
    ) -> Result<()> {
        absorb_not_found(
            rpc::unary(
                &self.channel,
                SERVICE,
                "/bifrost.admin.v1.AdminService/RevokeCredential",
                proto::RevokeCredentialRequest {
                    cluster: cluster.to_string(),
                    principal: principal.to_string(),
                    idempotency_key: key.as_str().to_string(),
                },
            )
            .await,
        )
    }

    async fn list_credentials(&self, cluster: &str) -> Result<Vec<CredentialInfo>> {
        let reply: proto::ListCredentialsReply = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/ListCredentials",
            proto::ListCredentialsRequest {
                cluster: cluster.to_string(),
            },
        )
        .await?;
        Ok(reply
            .credentials
            .into_iter()
            .map(|c| CredentialInfo {
                principal: c.principal,
                cluster: c.cluster,
                scopes: c.scopes,
            })
            .collect())
    }

    async fn upsert_access_share(&self, spec: AccessShareSpec, key: IdempotencyKey) -> Result<()> {
        let _: proto::Empty = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/UpsertAccessShare",
            proto::AccessShareRequest {
                share_id: spec.share_id,
                source_cluster: spec.source_cluster,
                target_principal: spec.target_principal,
                scopes: spec.scopes,
                idempotency_key: key.as_str().to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn revoke_access_share(&self, share_id: &str, key: IdempotencyKey) -> Result<()> {
        absorb_not_found(
            rpc::unary(
                &self.channel,
                SERVICE,
                "/bifrost.admin.v1.AdminService/RevokeAccessShare",
                proto::RevokeAccessShareRequest {
                    share_id: share_id.to_string(),
                    idempotency_key: key.as_str().to_string(),
                },
            )
            .await,
        )
    }

    async fn register_schema(&self, spec: SchemaSpec, key: IdempotencyKey) -> Result<SchemaRef> {
        let reply: proto::SchemaReply = rpc::unary(
            &self.channel,
            SERVICE,
            "/bifrost.admin.v1.AdminService/RegisterSchema",
            proto::SchemaRequest {
                subject: spec.subject,
                definition: spec.definition,
                idempotency_key: key.as_str().to_string(),
            },
        )
        .await?;
        Ok(SchemaRef { id: reply.id })
    }

    async fn unregister_schema(&self, id: &str, key: IdempotencyKey) -> Result<()> {
        absorb_not_found(
            rpc::unary(
                &self.channel,
                SERVICE,
                "/bifrost.admin.v1.AdminService/UnregisterSchema",
                proto::UnregisterSchemaRequest {
                    id: id.to_string(),
                    idempotency_key: key.as_str().to_string(),
                },
            )
            .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_and_keyed() {
        let a = IdempotencyKey::derive("create_topic", "t1", "topic-provisioning:t1");
        let b = IdempotencyKey::derive("create_topic", "t1", "topic-provisioning:t1");
        let c = IdempotencyKey::derive("delete_topic", "t1", "topic-provisioning:t1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn absorb_not_found_keeps_other_errors() {
        use orbit_core::OrbitError;

        assert!(absorb_not_found(Ok(proto::Empty {})).is_ok());
        assert!(absorb_not_found(Err(OrbitError::not_found("gone"))).is_ok());
        assert!(absorb_not_found(Err(OrbitError::transient("down"))).is_err());
    }
}
