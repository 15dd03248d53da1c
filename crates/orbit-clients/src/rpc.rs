//! Shared tonic plumbing for the Bifrost and build-service clients.

use std::time::Duration;

use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

use orbit_core::{OrbitError, Result};

fn endpoint(context: &str, address: &str) -> Result<Endpoint> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    Ok(Endpoint::from_shared(uri)
        .map_err(|e| OrbitError::config(format!("{context}: bad address {address:?}: {e}")))?
        .connect_timeout(Duration::from_secs(10))
        .tcp_keepalive(Some(Duration::from_secs(30))))
}

pub(crate) async fn connect(context: &str, address: &str) -> Result<Channel> {
    endpoint(context, address)?
        .connect()
        .await
        .map_err(|e| OrbitError::transient(format!("{context}: connect failed: {e}")))
}

/// Channel that dials on first use; a down peer surfaces as a retryable
/// call error instead of blocking startup.
pub(crate) fn connect_lazy(context: &str, address: &str) -> Result<Channel> {
    Ok(endpoint(context, address)?.connect_lazy())
}

pub(crate) async fn unary<Req, Resp>(
    channel: &Channel,
    context: &str,
    path: &'static str,
    request: Req,
) -> Result<Resp>
where
    Req: prost::Message + 'static,
    Resp: prost::Message + Default + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel.clone());
    grpc.ready()
        .await
        .map_err(|e| OrbitError::transient(format!("{context}: unavailable: {e}")))?;
    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    let response = grpc
        .unary(
            tonic::Request::new(request),
            PathAndQuery::from_static(path),
            codec,
        )
        .await
        .map_err(|status| map_status(context, status))?;
    Ok(response.into_inner())
}

pub(crate) async fn server_streaming<Req, Resp>(
    channel: &Channel,
    context: &str,
    path: &'static str,
    request: Req,
) -> Result<tonic::Streaming<Resp>>
where
    Req: prost::Message + 'static,
    Resp: prost::Message + Default + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel.clone());
    grpc.ready()
        .await
        .map_err(|e| OrbitError::transient(format!("{context}: unavailable: {e}")))?;
    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    let response = grpc
        .server_streaming(
            tonic::Request::new(request),
            PathAndQuery::from_static(path),
            codec,
        )
        .await
        .map_err(|status| map_status(context, status))?;
    Ok(response.into_inner())
}

pub(crate) fn map_status(context: &str, status: tonic::Status) -> OrbitError {
    use tonic::Code;
    let message = format!("{context}: {}", status.message());
    match status.code() {
        Code::NotFound => OrbitError::not_found(message),
        Code::AlreadyExists => OrbitError::conflict(message),
        Code::PermissionDenied | Code::Unauthenticated => OrbitError::permission_denied(message),
        Code::InvalidArgument | Code::FailedPrecondition => OrbitError::validation(message),
        Code::ResourceExhausted => OrbitError::rate_limited(None, message),
        Code::DeadlineExceeded => OrbitError::timeout(message),
        Code::Cancelled => OrbitError::cancelled(message),
        _ => OrbitError::transient(message),
    }
}
