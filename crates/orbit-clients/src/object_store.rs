use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use orbit_core::settings::ObjectStoreSettings;
use orbit_core::{OrbitError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub size: u64,
    pub etag: Option<String>,
}

/// Pointer to a content-addressed archive blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub object_key: String,
    pub content_hash: String,
    pub size: u64,
}

/// The object-store surface the orchestrator needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Write a content-addressed archive blob. Archives are immutable: when a
/// blob with the same hash already exists the existing object is reused
/// untouched.
pub async fn put_archive(
    store: &dyn ObjectStore,
    app_id: &str,
    bytes: Vec<u8>,
) -> Result<ArchiveRef> {
    let hash = content_hash_hex(&bytes);
    let object_key = format!("archives/{app_id}/{hash}");
    let size = bytes.len() as u64;

    if store.head_object(&object_key).await?.is_some() {
        return Ok(ArchiveRef {
            object_key,
            content_hash: hash,
            size,
        });
    }

    store
        .put_object(&object_key, bytes, "application/octet-stream")
        .await?;
    Ok(ArchiveRef {
        object_key,
        content_hash: hash,
        size,
    })
}

fn content_hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// S3-compatible store (MinIO in every deployed environment): path-style
/// addressing, static credentials.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn from_settings(settings: &ObjectStoreSettings) -> Self {
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "orbit-static",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(settings.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| OrbitError::transient(format!("object store put {key}: {e}")))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.as_service_error();
                if service.map(|s| s.is_no_such_key()).unwrap_or(false) {
                    OrbitError::not_found(format!("object {key} not found"))
                } else {
                    OrbitError::transient(format!("object store get {key}: {e}"))
                }
            })?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| OrbitError::transient(format!("object store read {key}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(ObjectMeta {
                size: head.content_length().unwrap_or(0).max(0) as u64,
                etag: head.e_tag().map(String::from),
            })),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|s| s.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(None)
                } else {
                    Err(OrbitError::transient(format!(
                        "object store head {key}: {e}"
                    )))
                }
            }
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| OrbitError::transient(format!("object store list {prefix}: {e}")))?;
        Ok(response
            .contents()
            .iter()
            .filter_map(|o| o.key().map(String::from))
            .collect())
    }
}
