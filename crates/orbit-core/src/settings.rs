use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{OrbitError, Result};

/// Worker configuration, loaded from the environment only.
///
/// Required keys missing at startup are a [`crate::ErrorKind::Config`] error;
/// the worker binary maps that to exit code 1.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub engine: EngineSettings,
    pub api: ApiSettings,
    pub github_app: GithubAppSettings,
    pub work_dirs: WorkDirSettings,
    pub object_store: ObjectStoreSettings,
    pub bifrost: BifrostSettings,
    pub build: BuildSettings,
    pub encryption_key: EncryptionKey,
    pub max_concurrent_activities: usize,
    pub health_port: u16,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub address: String,
    pub namespace: String,
    pub task_queue: String,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct GithubAppSettings {
    pub app_id: String,
    pub private_key_pem: String,
}

#[derive(Debug, Clone)]
pub struct WorkDirSettings {
    pub git: PathBuf,
    pub template: PathBuf,
    pub deployment: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

impl ObjectStoreSettings {
    /// Endpoint URL including scheme.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.use_ssl {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

#[derive(Debug, Clone)]
pub struct BifrostSettings {
    pub admin_url: String,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub service_address: String,
    pub quota: u32,
}

/// 32-byte AES-256-GCM key. Never printed.
#[derive(Clone)]
pub struct EncryptionKey(pub [u8; 32]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

const DEFAULT_TASK_QUEUE: &str = "orbit-workflows";

impl WorkerSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| OrbitError::config(format!("required setting {key} is not set")))
        };
        let optional = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let use_ssl = match optional("MINIO_USE_SSL", "false").as_str() {
            "1" | "true" | "TRUE" | "True" => true,
            "0" | "false" | "FALSE" | "False" => false,
            other => {
                return Err(OrbitError::config(format!(
                    "MINIO_USE_SSL must be a boolean, got {other:?}"
                )))
            }
        };

        let key_b64 = required("ORBIT_ENCRYPTION_KEY")?;
        let key_bytes = BASE64
            .decode(key_b64.trim())
            .map_err(|e| OrbitError::config(format!("ORBIT_ENCRYPTION_KEY is not base64: {e}")))?;
        let encryption_key: [u8; 32] = key_bytes.try_into().map_err(|v: Vec<u8>| {
            OrbitError::config(format!(
                "ORBIT_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                v.len()
            ))
        })?;

        Ok(Self {
            engine: EngineSettings {
                address: required("TEMPORAL_ADDRESS")?,
                namespace: required("TEMPORAL_NAMESPACE")?,
                task_queue: optional("ORBIT_TASK_QUEUE", DEFAULT_TASK_QUEUE),
            },
            api: ApiSettings {
                base_url: required("ORBIT_API_URL")?,
                api_key: required("ORBIT_INTERNAL_API_KEY")?,
            },
            github_app: GithubAppSettings {
                app_id: required("GITHUB_APP_ID")?,
                private_key_pem: required("GITHUB_APP_PRIVATE_KEY")?,
            },
            work_dirs: WorkDirSettings {
                git: PathBuf::from(required("GIT_WORK_DIR")?),
                template: PathBuf::from(required("TEMPLATE_WORK_DIR")?),
                deployment: PathBuf::from(required("DEPLOYMENT_WORK_DIR")?),
            },
            object_store: ObjectStoreSettings {
                endpoint: required("MINIO_ENDPOINT")?,
                access_key: required("MINIO_ACCESS_KEY")?,
                secret_key: required("MINIO_SECRET_KEY")?,
                bucket: required("MINIO_BUCKET")?,
                use_ssl,
            },
            bifrost: BifrostSettings {
                admin_url: required("BIFROST_ADMIN_URL")?,
            },
            build: BuildSettings {
                service_address: required("BUILD_SERVICE_ADDRESS")?,
                quota: parse_number(&optional("ORBIT_BUILD_QUOTA", "25"), "ORBIT_BUILD_QUOTA")?,
            },
            encryption_key: EncryptionKey(encryption_key),
            max_concurrent_activities: parse_number(
                &optional("ORBIT_MAX_CONCURRENT_ACTIVITIES", "100"),
                "ORBIT_MAX_CONCURRENT_ACTIVITIES",
            )?,
            health_port: parse_number(&optional("ORBIT_HEALTH_PORT", "8701"), "ORBIT_HEALTH_PORT")?,
        })
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| OrbitError::config(format!("{key} must be a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn full_env() -> HashMap<&'static str, String> {
        let mut env = HashMap::new();
        env.insert("TEMPORAL_ADDRESS", "engine.internal:7233".to_string());
        env.insert("TEMPORAL_NAMESPACE", "orbit".to_string());
        env.insert("ORBIT_API_URL", "http://cms.internal:3000".to_string());
        env.insert("ORBIT_INTERNAL_API_KEY", "secret".to_string());
        env.insert("GITHUB_APP_ID", "12345".to_string());
        env.insert("GITHUB_APP_PRIVATE_KEY", "-----BEGIN RSA-----".to_string());
        env.insert("GIT_WORK_DIR", "/var/orbit/git".to_string());
        env.insert("TEMPLATE_WORK_DIR", "/var/orbit/template".to_string());
        env.insert("DEPLOYMENT_WORK_DIR", "/var/orbit/deploy".to_string());
        env.insert("MINIO_ENDPOINT", "minio.internal:9000".to_string());
        env.insert("MINIO_ACCESS_KEY", "orbit".to_string());
        env.insert("MINIO_SECRET_KEY", "orbit-secret".to_string());
        env.insert("MINIO_BUCKET", "orbit-archives".to_string());
        env.insert("BIFROST_ADMIN_URL", "http://bifrost.internal:9090".to_string());
        env.insert("BUILD_SERVICE_ADDRESS", "http://builds.internal:9443".to_string());
        env.insert("ORBIT_ENCRYPTION_KEY", BASE64.encode([7u8; 32]));
        env
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<WorkerSettings> {
        WorkerSettings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn loads_full_settings_with_defaults() {
        let settings = load(&full_env()).unwrap();
        assert_eq!(settings.engine.task_queue, "orbit-workflows");
        assert_eq!(settings.max_concurrent_activities, 100);
        assert_eq!(settings.health_port, 8701);
        assert_eq!(settings.build.quota, 25);
        assert!(!settings.object_store.use_ssl);
        assert_eq!(settings.encryption_key.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn missing_required_key_refuses() {
        let mut env = full_env();
        env.remove("BIFROST_ADMIN_URL");
        let err = load(&env).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Config);
        assert!(err.message.contains("BIFROST_ADMIN_URL"));
    }

    #[test]
    fn empty_value_counts_as_unset() {
        let mut env = full_env();
        env.insert("ORBIT_API_URL", String::new());
        assert!(load(&env).is_err());
    }

    #[test]
    fn bad_encryption_key_length() {
        let mut env = full_env();
        env.insert("ORBIT_ENCRYPTION_KEY", BASE64.encode([1u8; 16]));
        let err = load(&env).unwrap_err();
        assert!(err.message.contains("32 bytes"));
    }

    #[test]
    fn object_store_endpoint_url_scheme() {
        let mut env = full_env();
        env.insert("MINIO_USE_SSL", "true".to_string());
        let settings = load(&env).unwrap();
        assert_eq!(
            settings.object_store.endpoint_url(),
            "https://minio.internal:9000"
        );
    }

    #[test]
    fn key_never_debug_prints() {
        let settings = load(&full_env()).unwrap();
        let rendered = format!("{:?}", settings.encryption_key);
        assert_eq!(rendered, "EncryptionKey(..)");
    }
}
