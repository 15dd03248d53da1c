use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use orbit_core::{OrbitError, Result};

use crate::http::{classify_transport, ensure_success};

/// Collection slugs the orchestrator touches.
pub mod collections {
    pub const INSTALLATIONS: &str = "github-installations";
    pub const APPLICATIONS: &str = "applications";
    pub const REPOSITORIES: &str = "repositories";
    pub const TEMPLATES: &str = "templates";
    pub const BUILDS: &str = "builds";
    pub const TRACKED_IMAGES: &str = "tracked-images";
    pub const DEPLOYMENTS: &str = "deployments";
    pub const VIRTUAL_CLUSTERS: &str = "virtual-clusters";
    pub const CREDENTIALS: &str = "credentials";
    pub const TOPICS: &str = "topics";
    pub const SHARES: &str = "shares";
    pub const LINEAGE_EDGES: &str = "lineage-edges";
    pub const LINEAGE_SNAPSHOTS: &str = "lineage-snapshots";
}

/// Equality filter + sort + limit, the only query shape the worker uses;
/// every write stays a single-record PATCH.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    equals: Vec<(String, String)>,
    sort: Option<String>,
    limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn sort(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(field.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort_field(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    /// Payload-style query pairs: `where[field][equals]=value`.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .equals
            .iter()
            .map(|(field, value)| (format!("where[{field}][equals]"), value.clone()))
            .collect();
        if let Some(sort) = &self.sort {
            pairs.push(("sort".to_string(), sort.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    /// Whether a document matches every equality clause (used by the
    /// in-memory test CMS).
    pub fn matches(&self, doc: &serde_json::Value) -> bool {
        self.equals.iter().all(|(field, value)| {
            match doc.get(field) {
                Some(serde_json::Value::String(s)) => s == value,
                Some(other) => other.to_string() == *value,
                None => false,
            }
        })
    }
}

/// The CMS surface the core consumes: collection CRUD plus the three
/// internal endpoints. All writes are single-record.
#[async_trait]
pub trait Cms: Send + Sync {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<serde_json::Value>>;
    async fn get(&self, collection: &str, id: &str) -> Result<serde_json::Value>;
    async fn create(&self, collection: &str, doc: serde_json::Value) -> Result<serde_json::Value>;
    async fn patch(
        &self,
        collection: &str,
        id: &str,
        changes: serde_json::Value,
    ) -> Result<serde_json::Value>;
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    async fn update_build_status(&self, app_id: &str, body: serde_json::Value) -> Result<()>;
    async fn record_health_check(&self, body: serde_json::Value) -> Result<()>;
    async fn store_rotated_token(&self, body: serde_json::Value) -> Result<()>;
}

/// Typed convenience over [`Cms::find`].
pub async fn find_as<T: DeserializeOwned>(
    cms: &dyn Cms,
    collection: &str,
    filter: &Filter,
) -> Result<Vec<T>> {
    cms.find(collection, filter)
        .await?
        .into_iter()
        .map(|doc| {
            serde_json::from_value(doc).map_err(|e| {
                OrbitError::internal(format!("undecodable {collection} document: {e}"))
            })
        })
        .collect()
}

/// Typed convenience over [`Cms::get`].
pub async fn get_as<T: DeserializeOwned>(cms: &dyn Cms, collection: &str, id: &str) -> Result<T> {
    let doc = cms.get(collection, id).await?;
    serde_json::from_value(doc)
        .map_err(|e| OrbitError::internal(format!("undecodable {collection}/{id}: {e}")))
}

#[derive(Deserialize)]
struct FindResponse {
    docs: Vec<serde_json::Value>,
}

/// Payload CMS over HTTP+JSON with `X-API-Key` auth. 4xx responses are
/// terminal; 5xx and transport failures retry at the activity layer.
pub struct PayloadClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PayloadClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| OrbitError::config(format!("cms client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-API-Key", &self.api_key)
    }

    async fn send_json(
        &self,
        context: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport(context, e))?;
        let response = ensure_success(context, response).await?;
        response
            .json()
            .await
            .map_err(|e| classify_transport(context, e))
    }

    /// Create/patch responses wrap the document in `doc`; unwrap when
    /// present.
    fn unwrap_doc(body: serde_json::Value) -> serde_json::Value {
        match body {
            serde_json::Value::Object(mut map) if map.contains_key("doc") => {
                map.remove("doc").unwrap_or(serde_json::Value::Null)
            }
            other => other,
        }
    }
}

#[async_trait]
impl Cms for PayloadClient {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<serde_json::Value>> {
        let context = format!("cms find {collection}");
        let builder = self
            .request(reqwest::Method::GET, &format!("/api/{collection}"))
            .query(&filter.query_pairs());
        let body = self.send_json(&context, builder).await?;
        let parsed: FindResponse = serde_json::from_value(body)
            .map_err(|e| OrbitError::internal(format!("{context}: bad response shape: {e}")))?;
        Ok(parsed.docs)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<serde_json::Value> {
        let context = format!("cms get {collection}/{id}");
        let builder = self.request(reqwest::Method::GET, &format!("/api/{collection}/{id}"));
        self.send_json(&context, builder).await
    }

    async fn create(&self, collection: &str, doc: serde_json::Value) -> Result<serde_json::Value> {
        let context = format!("cms create {collection}");
        let builder = self
            .request(reqwest::Method::POST, &format!("/api/{collection}"))
            .json(&doc);
        self.send_json(&context, builder).await.map(Self::unwrap_doc)
    }

    async fn patch(
        &self,
        collection: &str,
        id: &str,
        changes: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let context = format!("cms patch {collection}/{id}");
        let builder = self
            .request(reqwest::Method::PATCH, &format!("/api/{collection}/{id}"))
            .json(&changes);
        self.send_json(&context, builder).await.map(Self::unwrap_doc)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let context = format!("cms delete {collection}/{id}");
        let response = self
            .request(reqwest::Method::DELETE, &format!("/api/{collection}/{id}"))
            .send()
            .await
            .map_err(|e| classify_transport(&context, e))?;
        ensure_success(&context, response).await?;
        Ok(())
    }

    async fn update_build_status(&self, app_id: &str, body: serde_json::Value) -> Result<()> {
        let context = format!("cms build-status {app_id}");
        let builder = self
            .request(
                reqwest::Method::PATCH,
                &format!("/api/internal/apps/{app_id}/build-status"),
            )
            .json(&body);
        self.send_json(&context, builder).await.map(|_| ())
    }

    async fn record_health_check(&self, body: serde_json::Value) -> Result<()> {
        let builder = self
            .request(reqwest::Method::POST, "/api/health-checks")
            .json(&body);
        self.send_json("cms health-check", builder).await.map(|_| ())
    }

    async fn store_rotated_token(&self, body: serde_json::Value) -> Result<()> {
        let builder = self
            .request(reqwest::Method::POST, "/api/internal/github/token")
            .json(&body);
        self.send_json("cms rotated token", builder).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_payload_query_pairs() {
        let filter = Filter::new()
            .eq("workspace", "ws1")
            .eq("status", "active")
            .sort("id")
            .limit(10);
        let pairs = filter.query_pairs();
        assert!(pairs.contains(&("where[workspace][equals]".to_string(), "ws1".to_string())));
        assert!(pairs.contains(&("where[status][equals]".to_string(), "active".to_string())));
        assert!(pairs.contains(&("sort".to_string(), "id".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "10".to_string())));
    }

    #[test]
    fn filter_matches_documents() {
        let filter = Filter::new().eq("status", "active").eq("workspace", "ws1");
        assert!(filter.matches(&serde_json::json!({"status": "active", "workspace": "ws1"})));
        assert!(!filter.matches(&serde_json::json!({"status": "revoked", "workspace": "ws1"})));
        assert!(!filter.matches(&serde_json::json!({"workspace": "ws1"})));
    }

    #[test]
    fn doc_envelope_is_unwrapped() {
        let wrapped = serde_json::json!({"message": "ok", "doc": {"id": "a1"}});
        assert_eq!(
            PayloadClient::unwrap_doc(wrapped),
            serde_json::json!({"id": "a1"})
        );
        let bare = serde_json::json!({"id": "a1"});
        assert_eq!(PayloadClient::unwrap_doc(bare.clone()), bare);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = PayloadClient::new("http://cms.internal:3000/", "k").unwrap();
        assert_eq!(client.url("/api/topics"), "http://cms.internal:3000/api/topics");
    }
}
