//! In-memory implementations of the adapter traits, used by workflow and
//! activity tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use orbit_core::{OrbitError, Result};

use crate::bifrost::{
    AccessShareSpec, BifrostAdmin, CredentialInfo, CredentialSpec, IdempotencyKey, SchemaRef,
    SchemaSpec, TopicInfo, TopicSpec, VirtualClusterInfo, VirtualClusterSpec,
};
use crate::build_service::{BuildEvent, BuildRequest, BuildService, BuildStream};
use crate::git::{Git, GitIdentity, PushOutcome};
use crate::github::{GenerateRequest, GithubApi, InstallationAccessToken, RepoRef};
use crate::object_store::{ObjectMeta, ObjectStore};
use crate::payload::{Cms, Filter};

// ---------------------------------------------------------------------------
// CMS
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CmsState {
    collections: HashMap<String, Vec<serde_json::Value>>,
    next_id: u64,
    build_status: Vec<(String, serde_json::Value)>,
    health_checks: Vec<serde_json::Value>,
    rotated_tokens: Vec<serde_json::Value>,
}

/// In-memory Payload stand-in with the same find/patch semantics the
/// activities rely on.
#[derive(Default)]
pub struct InMemoryCms {
    state: Mutex<CmsState>,
}

impl InMemoryCms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document; assigns an id when missing. Returns the id.
    pub fn insert(&self, collection: &str, mut doc: serde_json::Value) -> String {
        let mut state = self.state.lock().unwrap();
        let id = match doc.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                let id = format!("doc-{}", state.next_id);
                doc["id"] = serde_json::Value::String(id.clone());
                id
            }
        };
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        id
    }

    pub fn all(&self, collection: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        self.all(collection)
            .into_iter()
            .find(|doc| doc.get("id").and_then(|v| v.as_str()) == Some(id))
    }

    pub fn build_status_events(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().unwrap().build_status.clone()
    }

    pub fn health_checks(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().health_checks.clone()
    }

    pub fn rotated_tokens(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().rotated_tokens.clone()
    }
}

#[async_trait]
impl Cms for InMemoryCms {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<serde_json::Value>> {
        let mut docs: Vec<serde_json::Value> = self
            .all(collection)
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect();
        if let Some(field) = filter.sort_field() {
            docs.sort_by(|a, b| {
                let left = a.get(field).map(stringify).unwrap_or_default();
                let right = b.get(field).map(stringify).unwrap_or_default();
                left.cmp(&right)
            });
        }
        if let Some(limit) = filter.limit_value() {
            docs.truncate(limit as usize);
        }
        Ok(docs)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<serde_json::Value> {
        self.document(collection, id)
            .ok_or_else(|| OrbitError::not_found(format!("{collection}/{id} not found")))
    }

    async fn create(&self, collection: &str, doc: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.insert(collection, doc);
        self.get(collection, &id).await
    }

    async fn patch(
        &self,
        collection: &str,
        id: &str,
        changes: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut state = self.state.lock().unwrap();
        let docs = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| OrbitError::not_found(format!("{collection}/{id} not found")))?;
        let doc = docs
            .iter_mut()
            .find(|doc| doc.get("id").and_then(|v| v.as_str()) == Some(id))
            .ok_or_else(|| OrbitError::not_found(format!("{collection}/{id} not found")))?;
        if let (Some(target), Some(source)) = (doc.as_object_mut(), changes.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(doc.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let docs = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| OrbitError::not_found(format!("{collection}/{id} not found")))?;
        let before = docs.len();
        docs.retain(|doc| doc.get("id").and_then(|v| v.as_str()) != Some(id));
        if docs.len() == before {
            return Err(OrbitError::not_found(format!("{collection}/{id} not found")));
        }
        Ok(())
    }

    async fn update_build_status(&self, app_id: &str, body: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.build_status.push((app_id.to_string(), body.clone()));
        if let Some(apps) = state.collections.get_mut("applications") {
            if let Some(app) = apps
                .iter_mut()
                .find(|doc| doc.get("id").and_then(|v| v.as_str()) == Some(app_id))
            {
                app["buildStatus"] = body;
            }
        }
        Ok(())
    }

    async fn record_health_check(&self, body: serde_json::Value) -> Result<()> {
        self.state.lock().unwrap().health_checks.push(body);
        Ok(())
    }

    async fn store_rotated_token(&self, body: serde_json::Value) -> Result<()> {
        self.state.lock().unwrap().rotated_tokens.push(body);
        Ok(())
    }
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

struct GithubState {
    existing_repos: HashSet<(String, String)>,
    created: Vec<RepoRef>,
    rate_limit_failures: u32,
    token_mints: u32,
    token_ttl: chrono::Duration,
}

pub struct MockGithub {
    state: Mutex<GithubState>,
}

impl Default for MockGithub {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGithub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GithubState {
                existing_repos: HashSet::new(),
                created: Vec::new(),
                rate_limit_failures: 0,
                token_mints: 0,
                token_ttl: chrono::Duration::hours(1),
            }),
        }
    }

    /// Pretend the remote already has `org/name`.
    pub fn add_existing_repo(&self, org: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .existing_repos
            .insert((org.to_string(), name.to_string()));
    }

    /// The next `n` token mints answer 429 with `Retry-After: 30`.
    pub fn fail_token_mints_with_rate_limit(&self, n: u32) {
        self.state.lock().unwrap().rate_limit_failures = n;
    }

    pub fn token_mint_count(&self) -> u32 {
        self.state.lock().unwrap().token_mints
    }

    pub fn created_repos(&self) -> Vec<RepoRef> {
        self.state.lock().unwrap().created.clone()
    }

    fn create(&self, owner: &str, name: &str) -> Result<RepoRef> {
        let mut state = self.state.lock().unwrap();
        let key = (owner.to_string(), name.to_string());
        if state.existing_repos.contains(&key) {
            return Err(
                OrbitError::conflict(format!("repository {owner}/{name} already exists"))
                    .with_code("NAME_CONFLICT"),
            );
        }
        state.existing_repos.insert(key);
        let repo = RepoRef {
            owner: owner.to_string(),
            name: name.to_string(),
            html_url: format!("https://github.com/{owner}/{name}"),
            clone_url: format!("https://github.com/{owner}/{name}.git"),
        };
        state.created.push(repo.clone());
        Ok(repo)
    }
}

#[async_trait]
impl GithubApi for MockGithub {
    async fn generate_from_template(&self, req: GenerateRequest) -> Result<RepoRef> {
        self.create(&req.owner, &req.name)
    }

    async fn create_org_repo(
        &self,
        org: &str,
        name: &str,
        _private: bool,
        _token: &str,
    ) -> Result<RepoRef> {
        self.create(org, name)
    }

    async fn create_installation_token(
        &self,
        installation_id: i64,
    ) -> Result<InstallationAccessToken> {
        let mut state = self.state.lock().unwrap();
        if state.rate_limit_failures > 0 {
            state.rate_limit_failures -= 1;
            return Err(OrbitError::rate_limited(
                Some(Duration::from_secs(30)),
                format!("installation {installation_id}: secondary rate limit"),
            ));
        }
        state.token_mints += 1;
        Ok(InstallationAccessToken {
            token: format!("ghs_mock_{}", state.token_mints),
            expires_at: Utc::now() + state.token_ttl,
        })
    }
}

// ---------------------------------------------------------------------------
// Bifrost
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BifrostState {
    down: bool,
    down_environments: HashSet<String>,
    fail_topic_creates: u32,
    clusters: HashMap<String, VirtualClusterInfo>,
    topics: HashMap<String, TopicInfo>,
    credentials: HashMap<String, CredentialInfo>,
    shares: HashMap<String, AccessShareSpec>,
    schemas: HashMap<String, SchemaSpec>,
    next_schema: u64,
}

#[derive(Default)]
pub struct MockBifrost {
    state: Mutex<BifrostState>,
}

impl MockBifrost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails `Transient` until cleared.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    /// Virtual-cluster creation fails `Transient` for this environment.
    pub fn set_environment_down(&self, environment: &str) {
        self.state
            .lock()
            .unwrap()
            .down_environments
            .insert(environment.to_string());
    }

    /// The next `n` topic creations fail `Transient`.
    pub fn fail_next_topic_creates(&self, n: u32) {
        self.state.lock().unwrap().fail_topic_creates = n;
    }

    pub fn cluster(&self, logical_name: &str) -> Option<VirtualClusterInfo> {
        self.state.lock().unwrap().clusters.get(logical_name).cloned()
    }

    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().clusters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn credential_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .credentials
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn share_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().shares.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn schema_count(&self) -> usize {
        self.state.lock().unwrap().schemas.len()
    }

    fn check_up(state: &BifrostState) -> Result<()> {
        if state.down {
            Err(OrbitError::transient("bifrost unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BifrostAdmin for MockBifrost {
    async fn create_virtual_cluster(
        &self,
        spec: VirtualClusterSpec,
        _key: IdempotencyKey,
    ) -> Result<VirtualClusterInfo> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        if state.down_environments.contains(&spec.environment) {
            return Err(OrbitError::transient(format!(
                "bifrost unavailable for {}",
                spec.environment
            )));
        }
        if state.clusters.contains_key(&spec.logical_name) {
            return Err(OrbitError::conflict(format!(
                "virtual cluster {} already exists",
                spec.logical_name
            )));
        }
        let info = VirtualClusterInfo {
            bifrost_ref: format!("bif-{}", spec.logical_name),
            logical_name: spec.logical_name.clone(),
            read_only: false,
        };
        state.clusters.insert(spec.logical_name, info.clone());
        Ok(info)
    }

    async fn get_virtual_cluster(&self, logical_name: &str) -> Result<Option<VirtualClusterInfo>> {
        let state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        Ok(state.clusters.get(logical_name).cloned())
    }

    async fn set_virtual_cluster_read_only(
        &self,
        logical_name: &str,
        read_only: bool,
        _key: IdempotencyKey,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        match state.clusters.get_mut(logical_name) {
            Some(cluster) => {
                cluster.read_only = read_only;
                Ok(())
            }
            None => Err(OrbitError::not_found(format!(
                "virtual cluster {logical_name} not found"
            ))),
        }
    }

    async fn delete_virtual_cluster(&self, logical_name: &str, _key: IdempotencyKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.clusters.remove(logical_name);
        Ok(())
    }

    async fn create_topic(&self, spec: TopicSpec, _key: IdempotencyKey) -> Result<TopicInfo> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        if state.fail_topic_creates > 0 {
            state.fail_topic_creates -= 1;
            return Err(OrbitError::transient("bifrost topic create failed"));
        }
        let key = format!("{}/{}", spec.virtual_cluster, spec.name);
        if state.topics.contains_key(&key) {
            return Err(OrbitError::conflict(format!("topic {key} already exists")));
        }
        let info = TopicInfo {
            bifrost_ref: format!("bif-topic-{}", spec.name),
            virtual_cluster: spec.virtual_cluster,
            name: spec.name,
        };
        state.topics.insert(key, info.clone());
        Ok(info)
    }

    async fn delete_topic(
        &self,
        virtual_cluster: &str,
        name: &str,
        _key: IdempotencyKey,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.topics.remove(&format!("{virtual_cluster}/{name}"));
        Ok(())
    }

    async fn upsert_credential(&self, spec: CredentialSpec, _key: IdempotencyKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.credentials.insert(
            format!("{}/{}", spec.cluster, spec.principal),
            CredentialInfo {
                principal: spec.principal,
                cluster: spec.cluster,
                scopes: spec.scopes,
            },
        );
        Ok(())
    }

    async fn revoke_credential(
        &self,
        cluster: &str,
        principal: &str,
        _key: IdempotencyKey,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.credentials.remove(&format!("{cluster}/{principal}"));
        Ok(())
    }

    async fn list_credentials(&self, cluster: &str) -> Result<Vec<CredentialInfo>> {
        let state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        let mut credentials: Vec<CredentialInfo> = state
            .credentials
            .values()
            .filter(|c| c.cluster == cluster)
            .cloned()
            .collect();
        credentials.sort_by(|a, b| a.principal.cmp(&b.principal));
        Ok(credentials)
    }

    async fn upsert_access_share(&self, spec: AccessShareSpec, _key: IdempotencyKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.shares.insert(spec.share_id.clone(), spec);
        Ok(())
    }

    async fn revoke_access_share(&self, share_id: &str, _key: IdempotencyKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.shares.remove(share_id);
        Ok(())
    }

    async fn register_schema(&self, spec: SchemaSpec, _key: IdempotencyKey) -> Result<SchemaRef> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.next_schema += 1;
        let id = format!("sch-{}", state.next_schema);
        state.schemas.insert(id.clone(), spec);
        Ok(SchemaRef { id })
    }

    async fn unregister_schema(&self, id: &str, _key: IdempotencyKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_up(&state)?;
        state.schemas.remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys written via `put_object`, in order (repeated writes repeat).
    pub fn put_log(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        self.puts.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| OrbitError::not_found(format!("object {key} not found")))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.objects.lock().unwrap().get(key).map(|b| ObjectMeta {
            size: b.len() as u64,
            etag: None,
        }))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Build service
// ---------------------------------------------------------------------------

enum BuildBehavior {
    Succeed { image_ref: String, digest: String, heartbeats: u32 },
    Fail(OrbitError),
}

pub struct MockBuildService {
    behavior: Mutex<BuildBehavior>,
    requests: Mutex<Vec<BuildRequest>>,
}

impl Default for MockBuildService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBuildService {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(BuildBehavior::Succeed {
                image_ref: "registry.orbit.internal/app:latest".to_string(),
                digest: "sha256:0000".to_string(),
                heartbeats: 2,
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeed_with(&self, image_ref: &str, digest: &str) {
        *self.behavior.lock().unwrap() = BuildBehavior::Succeed {
            image_ref: image_ref.to_string(),
            digest: digest.to_string(),
            heartbeats: 2,
        };
    }

    pub fn fail_with(&self, error: OrbitError) {
        *self.behavior.lock().unwrap() = BuildBehavior::Fail(error);
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildService for MockBuildService {
    async fn build(&self, request: BuildRequest) -> Result<BuildStream> {
        self.requests.lock().unwrap().push(request);
        match &*self.behavior.lock().unwrap() {
            BuildBehavior::Fail(error) => Err(error.clone()),
            BuildBehavior::Succeed {
                image_ref,
                digest,
                heartbeats,
            } => {
                let mut events: Vec<Result<BuildEvent>> = (0..*heartbeats)
                    .map(|i| {
                        Ok(BuildEvent::Heartbeat {
                            message: format!("step {i}"),
                        })
                    })
                    .collect();
                events.push(Ok(BuildEvent::Completed {
                    image_ref: image_ref.clone(),
                    digest: digest.clone(),
                }));
                Ok(BuildStream::new(futures::stream::iter(events)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GitState {
    template_files: HashMap<String, Vec<(String, String)>>,
    clones: Vec<(String, PathBuf)>,
    remotes: Vec<(PathBuf, String, String)>,
    pushes: Vec<(PathBuf, String, String, bool)>,
    commits: Vec<String>,
    reject_pushes: u32,
    rebase_conflicts: bool,
    rebases: u32,
}

/// Git double: clones materialize staged template files on disk, commits
/// hash the tree + message + timestamp so determinism is observable.
#[derive(Default)]
pub struct MockGit {
    state: Mutex<GitState>,
}

impl MockGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files materialized when `url` is cloned.
    pub fn stage_template(&self, url: &str, files: &[(&str, &str)]) {
        self.state.lock().unwrap().template_files.insert(
            url.to_string(),
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        );
    }

    /// The next `n` non-force pushes answer non-fast-forward.
    pub fn reject_next_pushes(&self, n: u32) {
        self.state.lock().unwrap().reject_pushes = n;
    }

    pub fn set_rebase_conflicts(&self, conflicts: bool) {
        self.state.lock().unwrap().rebase_conflicts = conflicts;
    }

    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().clones.clone()
    }

    pub fn pushes(&self) -> Vec<(PathBuf, String, String, bool)> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn rebase_count(&self) -> u32 {
        self.state.lock().unwrap().rebases
    }
}

#[async_trait]
impl Git for MockGit {
    async fn clone_repo(&self, url: &str, dest: &Path, _depth: Option<u32>) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        let files = {
            let state = self.state.lock().unwrap();
            state
                .template_files
                .get(url)
                .cloned()
                .unwrap_or_else(|| vec![("README.md".to_string(), "# template\n".to_string())])
        };
        for (rel, content) in files {
            let path = dest.join(&rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        self.state
            .lock()
            .unwrap()
            .clones
            .push((url.to_string(), dest.to_path_buf()));
        Ok(())
    }

    async fn init_repo(&self, dir: &Path, _default_branch: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        Ok(())
    }

    async fn set_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()> {
        self.state.lock().unwrap().remotes.push((
            dir.to_path_buf(),
            name.to_string(),
            url.to_string(),
        ));
        Ok(())
    }

    async fn commit_all(
        &self,
        dir: &Path,
        message: &str,
        identity: &GitIdentity,
        timestamp: DateTime<Utc>,
    ) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        hasher.update(identity.name.as_bytes());
        hasher.update(timestamp.to_rfc3339().as_bytes());
        digest_dir(dir, &mut hasher)?;
        let digest = hasher.finalize();
        let mut sha = String::with_capacity(40);
        for byte in digest.iter().take(20) {
            sha.push_str(&format!("{byte:02x}"));
        }
        self.state.lock().unwrap().commits.push(sha.clone());
        Ok(sha)
    }

    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<PushOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.reject_pushes > 0 {
            state.reject_pushes -= 1;
            return Ok(PushOutcome::NonFastForward);
        }
        state.pushes.push((
            dir.to_path_buf(),
            remote.to_string(),
            branch.to_string(),
            false,
        ));
        Ok(PushOutcome::Pushed)
    }

    async fn force_push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.state.lock().unwrap().pushes.push((
            dir.to_path_buf(),
            remote.to_string(),
            branch.to_string(),
            true,
        ));
        Ok(())
    }

    async fn fetch(&self, _dir: &Path, _remote: &str) -> Result<()> {
        Ok(())
    }

    async fn rebase(&self, _dir: &Path, _onto: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.rebase_conflicts {
            return Err(OrbitError::conflict("rebase hit conflicting hunks"));
        }
        state.rebases += 1;
        Ok(())
    }
}

/// Stable digest of a directory tree: sorted relative paths and contents.
fn digest_dir(dir: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut entries: Vec<PathBuf> = Vec::new();
    collect_files(dir, &mut entries)?;
    entries.sort();
    for path in entries {
        if let Ok(rel) = path.strip_prefix(dir) {
            hasher.update(rel.to_string_lossy().as_bytes());
        }
        hasher.update(std::fs::read(&path)?);
    }
    Ok(())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cms_find_filters_sorts_limits() {
        let cms = InMemoryCms::new();
        cms.insert(
            "github-installations",
            serde_json::json!({"id": "b", "workspace": "ws1", "status": "active"}),
        );
        cms.insert(
            "github-installations",
            serde_json::json!({"id": "a", "workspace": "ws1", "status": "active"}),
        );
        cms.insert(
            "github-installations",
            serde_json::json!({"id": "c", "workspace": "ws1", "status": "suspended"}),
        );

        let docs = cms
            .find(
                "github-installations",
                &Filter::new().eq("workspace", "ws1").eq("status", "active").sort("id"),
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["id"], "a");
        assert_eq!(docs[1]["id"], "b");
    }

    #[tokio::test]
    async fn cms_patch_merges_fields() {
        let cms = InMemoryCms::new();
        let id = cms.insert("topics", serde_json::json!({"name": "orders", "status": "pending"}));
        cms.patch("topics", &id, serde_json::json!({"status": "active"}))
            .await
            .unwrap();
        let doc = cms.document("topics", &id).unwrap();
        assert_eq!(doc["status"], "active");
        assert_eq!(doc["name"], "orders");
    }

    #[tokio::test]
    async fn github_mock_reports_name_conflicts() {
        let github = MockGithub::new();
        github.add_existing_repo("acme", "payments");
        let err = github
            .create_org_repo("acme", "payments", true, "t")
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "NAME_CONFLICT");
    }

    #[tokio::test]
    async fn github_mock_rate_limits_then_succeeds() {
        let github = MockGithub::new();
        github.fail_token_mints_with_rate_limit(2);
        assert!(github.create_installation_token(1).await.is_err());
        assert!(github.create_installation_token(1).await.is_err());
        assert!(github.create_installation_token(1).await.is_ok());
        assert_eq!(github.token_mint_count(), 1);
    }

    #[tokio::test]
    async fn bifrost_mock_is_idempotent_on_delete() {
        let bifrost = MockBifrost::new();
        bifrost
            .delete_topic("vc", "gone", IdempotencyKey::derive("d", "t", "w"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mock_git_commit_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        let git = MockGit::new();
        let when = Utc::now();
        let identity = GitIdentity::service();

        let first = git
            .commit_all(dir.path(), "initial commit", &identity, when)
            .await
            .unwrap();
        let second = git
            .commit_all(dir.path(), "initial commit", &identity, when)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
    }
}
