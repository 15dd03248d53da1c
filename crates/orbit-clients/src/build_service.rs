use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tonic::transport::Channel;

use orbit_core::{OrbitError, Result};

use crate::rpc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub app_id: String,
    pub git_url: String,
    pub token: String,
    pub registry_ref: String,
    pub config: serde_json::Value,
}

/// Events on the build stream: heartbeats while the remote builder works,
/// then exactly one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Heartbeat { message: String },
    Completed { image_ref: String, digest: String },
}

/// Boxed stream of build events.
pub struct BuildStream {
    inner: Pin<Box<dyn Stream<Item = Result<BuildEvent>> + Send>>,
}

impl BuildStream {
    pub fn new(stream: impl Stream<Item = Result<BuildEvent>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub async fn next(&mut self) -> Option<Result<BuildEvent>> {
        self.inner.next().await
    }
}

/// The external build service. The single call streams heartbeats so the
/// invoking activity can prove liveness past its heartbeat timeout.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn build(&self, request: BuildRequest) -> Result<BuildStream>;
}

mod proto {
    pub const TICK_HEARTBEAT: i32 = 1;
    pub const TICK_COMPLETED: i32 = 2;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BuildTaskRequest {
        #[prost(string, tag = "1")]
        pub app_id: String,
        #[prost(string, tag = "2")]
        pub git_url: String,
        #[prost(string, tag = "3")]
        pub token: String,
        #[prost(string, tag = "4")]
        pub registry_ref: String,
        #[prost(string, tag = "5")]
        pub config_json: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BuildTick {
        #[prost(int32, tag = "1")]
        pub kind: i32,
        #[prost(string, tag = "2")]
        pub message: String,
        #[prost(string, tag = "3")]
        pub image_ref: String,
        #[prost(string, tag = "4")]
        pub digest: String,
    }
}

const SERVICE: &str = "build-service";

pub struct GrpcBuildClient {
    channel: Channel,
}

impl GrpcBuildClient {
    /// Dials on first use; worker startup does not depend on the build
    /// service being reachable.
    pub fn new(address: &str) -> Result<Self> {
        let channel = rpc::connect_lazy(SERVICE, address)?;
        Ok(Self { channel })
    }

    pub async fn connect(address: &str) -> Result<Self> {
        let channel = rpc::connect(SERVICE, address).await?;
        Ok(Self { channel })
    }
}

#[async_trait]
impl BuildService for GrpcBuildClient {
    async fn build(&self, request: BuildRequest) -> Result<BuildStream> {
        let config_json = request.config.to_string();
        let streaming = rpc::server_streaming::<proto::BuildTaskRequest, proto::BuildTick>(
            &self.channel,
            SERVICE,
            "/orbit.build.v1.BuildService/Build",
            proto::BuildTaskRequest {
                app_id: request.app_id,
                git_url: request.git_url,
                token: request.token,
                registry_ref: request.registry_ref,
                config_json,
            },
        )
        .await?;

        let events = streaming.map(|item| match item {
            Ok(tick) => match tick.kind {
                proto::TICK_HEARTBEAT => Ok(BuildEvent::Heartbeat {
                    message: tick.message,
                }),
                proto::TICK_COMPLETED => Ok(BuildEvent::Completed {
                    image_ref: tick.image_ref,
                    digest: tick.digest,
                }),
                other => Err(OrbitError::internal(format!(
                    "build service sent unknown tick kind {other}"
                ))),
            },
            Err(status) => Err(rpc::map_status(SERVICE, status)),
        });
        Ok(BuildStream::new(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_stream_yields_in_order() {
        let mut stream = BuildStream::new(futures::stream::iter(vec![
            Ok(BuildEvent::Heartbeat {
                message: "cloning".into(),
            }),
            Ok(BuildEvent::Completed {
                image_ref: "registry/acme/app:1".into(),
                digest: "sha256:abc".into(),
            }),
        ]));

        assert!(matches!(
            stream.next().await,
            Some(Ok(BuildEvent::Heartbeat { .. }))
        ));
        match stream.next().await {
            Some(Ok(BuildEvent::Completed { image_ref, digest })) => {
                assert_eq!(image_ref, "registry/acme/app:1");
                assert_eq!(digest, "sha256:abc");
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }
}
