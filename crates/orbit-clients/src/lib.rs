//! Typed adapters for every external system the orchestrator touches:
//! Payload CMS, GitHub REST, the Bifrost Kafka control plane, the
//! S3-compatible object store, the build service, and the git CLI. Each
//! adapter is the single boundary translating its transport errors into
//! the closed error set.

pub mod bifrost;
pub mod build_service;
pub mod git;
pub mod github;
mod http;
pub mod object_store;
pub mod payload;
mod rpc;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bifrost::{
    AccessShareSpec, BifrostAdmin, CredentialInfo, CredentialSpec, GrpcBifrostClient,
    IdempotencyKey, SchemaRef, SchemaSpec, TopicInfo, TopicSpec, VirtualClusterInfo,
    VirtualClusterSpec,
};
pub use build_service::{BuildEvent, BuildRequest, BuildService, BuildStream, GrpcBuildClient};
pub use git::{CliGit, Git, GitIdentity, PushOutcome};
pub use github::{
    authenticated_clone_url, GenerateRequest, GithubApi, GithubClient, InstallationAccessToken,
    RepoRef,
};
pub use object_store::{put_archive, ArchiveRef, ObjectMeta, ObjectStore, S3ObjectStore};
pub use payload::{collections, find_as, get_as, Cms, Filter, PayloadClient};
