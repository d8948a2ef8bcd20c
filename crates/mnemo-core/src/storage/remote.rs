//! Remote store (C4): an HTTP client against a remote vector+KV memory
//! service. Implements the same [`MemoryStore`] contract as [`super::LocalStore`]
//! so the sync engine and `HybridStore` can treat both uniformly.
//!
//! Every network or HTTP-status failure is classified into
//! [`EngineError::Transient`] or [`EngineError::Permanent`] at the edge —
//! nothing downstream needs to inspect a status code again. 5xx, connect
//! failures, and timeouts are transient (worth retrying); 4xx is permanent
//! (retrying won't help). `404` on `get_by_hash` is not an error at all —
//! that method returns `Ok(None)`, matching the local backend's contract.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::{EngineError, Result};
use crate::memory::{Association, AssociationReason, Memory, SearchResult, StoreStats, TagMatch};
use crate::storage::{DeleteFilters, DeleteOutcome, MemoryStore};

/// HTTP client backend for the remote memory service.
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    api_token: String,
    vector_index: String,
    kv_namespace: String,
}

impl RemoteStore {
    /// Build a client from [`RemoteConfig`]. Fails only if the HTTP client
    /// itself can't be constructed (e.g. invalid TLS config) — no network
    /// call happens until the first request.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| EngineError::Permanent(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            api_token: config.api_token.clone(),
            vector_index: config.vector_index.clone(),
            kv_namespace: config.kv_namespace.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}{}", self.base_url, self.account_id, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.api_token)
            .header("X-Mnemo-Vector-Index", &self.vector_index)
            .header("X-Mnemo-Kv-Namespace", &self.kv_namespace)
    }

    /// Liveness probe used by the sync engine before draining its queue and
    /// by `memory_health` when the backend is `hybrid`/`remote`.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "/ping")
            .send()
            .await
            .map_err(classify_transport_error)?;
        classify_status(response.status())?;
        Ok(())
    }

    async fn send_json<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<R> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_error_body(status, response).await);
        }
        response
            .json::<R>()
            .await
            .map_err(|e| EngineError::Permanent(format!("decoding remote response: {e}")))
    }
}

// Any transport-level failure (timeout, connect refused, DNS, TLS) is
// worth retrying — the remote service may simply be unreachable right now.
fn classify_transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Transient(e.to_string())
}

fn classify_status(status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        return Err(EngineError::Transient(format!("remote returned {status}")));
    }
    Err(EngineError::Permanent(format!("remote returned {status}")))
}

async fn classify_error_body(status: reqwest::StatusCode, response: reqwest::Response) -> EngineError {
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        EngineError::Transient(format!("remote {status}: {body}"))
    } else {
        EngineError::Permanent(format!("remote {status}: {body}"))
    }
}

#[derive(Serialize)]
struct StoreRequest<'a> {
    #[serde(flatten)]
    memory: &'a Memory,
}

#[derive(Deserialize)]
struct StoreResponse {
    inserted: bool,
    reason: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    n: usize,
    min_score: Option<f32>,
}

#[derive(Serialize)]
struct SearchByTagRequest<'a> {
    tags: &'a [String],
    tag_match: TagMatch,
}

#[derive(Serialize)]
struct RecallRequest {
    after: Option<f64>,
    before: Option<f64>,
    n: usize,
}

#[derive(Serialize)]
struct ExactMatchRequest<'a> {
    needle: &'a str,
    n: usize,
}

#[derive(Deserialize)]
struct DeleteResponse {
    deleted: u64,
}

#[derive(Serialize)]
struct UpsertAssociationRequest<'a> {
    a: &'a str,
    b: &'a str,
    strength: f32,
    reason: AssociationReason,
}

impl MemoryStore for RemoteStore {
    async fn initialize(&self) -> Result<()> {
        self.ping().await
    }

    async fn store(&self, memory: Memory) -> Result<(bool, String)> {
        let response: StoreResponse = self
            .send_json(
                reqwest::Method::POST,
                "/memories",
                Some(&StoreRequest { memory: &memory }),
            )
            .await?;
        Ok((response.inserted, response.reason))
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Memory>> {
        let path = format!("/memories/{hash}");
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(classify_error_body(status, response).await);
        }
        let memory = response
            .json::<Memory>()
            .await
            .map_err(|e| EngineError::Permanent(format!("decoding remote response: {e}")))?;
        Ok(Some(memory))
    }

    async fn retrieve(
        &self,
        query: &str,
        n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        self.send_json(
            reqwest::Method::POST,
            "/search",
            Some(&RetrieveRequest { query, n, min_score }),
        )
        .await
    }

    async fn search_by_tag(&self, tags: &[String], tag_match: TagMatch) -> Result<Vec<Memory>> {
        self.send_json(
            reqwest::Method::POST,
            "/search_by_tag",
            Some(&SearchByTagRequest { tags, tag_match }),
        )
        .await
    }

    async fn recall(&self, after: Option<f64>, before: Option<f64>, n: usize) -> Result<Vec<Memory>> {
        self.send_json(reqwest::Method::POST, "/recall", Some(&RecallRequest { after, before, n }))
            .await
    }

    async fn exact_match_search(&self, needle: &str, n: usize) -> Result<Vec<Memory>> {
        self.send_json(
            reqwest::Method::POST,
            "/exact_match_search",
            Some(&ExactMatchRequest { needle, n }),
        )
        .await
    }

    async fn delete(&self, hash: &str) -> Result<u64> {
        let path = format!("/memories/{hash}");
        let response: DeleteResponse = self
            .send_json::<(), _>(reqwest::Method::DELETE, &path, None)
            .await?;
        Ok(response.deleted)
    }

    async fn delete_by_filters(&self, filters: DeleteFilters) -> Result<DeleteOutcome> {
        #[derive(Serialize)]
        struct Req {
            tags: Option<Vec<String>>,
            tag_match: TagMatch,
            after: Option<f64>,
            before: Option<f64>,
            dry_run: bool,
        }
        #[derive(Deserialize)]
        struct Resp {
            count: u64,
            previewed_hashes: Option<Vec<String>>,
        }
        let resp: Resp = self
            .send_json(
                reqwest::Method::POST,
                "/delete_by_filters",
                Some(&Req {
                    tags: filters.tags,
                    tag_match: filters.tag_match,
                    after: filters.after,
                    before: filters.before,
                    dry_run: filters.dry_run,
                }),
            )
            .await?;
        Ok(DeleteOutcome {
            count: resp.count,
            previewed_hashes: resp.previewed_hashes,
        })
    }

    async fn update_metadata(&self, hash: &str, patch: HashMap<String, Value>) -> Result<()> {
        let path = format!("/memories/{hash}/metadata");
        self.send_json::<_, Value>(reqwest::Method::PATCH, &path, Some(&patch)).await?;
        Ok(())
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        self.send_json::<(), _>(reqwest::Method::GET, "/stats", None).await
    }

    async fn get_all_memories(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Memory>> {
        let path = format!(
            "/memories?limit={}&offset={}",
            limit.unwrap_or(100),
            offset.unwrap_or(0)
        );
        self.send_json::<(), _>(reqwest::Method::GET, &path, None).await
    }

    async fn upsert_association(
        &self,
        a: &str,
        b: &str,
        strength: f32,
        reason: AssociationReason,
    ) -> Result<()> {
        if a == b {
            return Err(EngineError::InvalidArgument("cannot associate a memory with itself".into()));
        }
        self.send_json::<_, Value>(
            reqwest::Method::POST,
            "/associations",
            Some(&UpsertAssociationRequest { a, b, strength, reason }),
        )
        .await?;
        Ok(())
    }

    async fn list_associations(&self, hash: &str, max_hops: usize) -> Result<Vec<Association>> {
        let path = format!("/associations/{hash}?max_hops={max_hops}");
        self.send_json::<(), _>(reqwest::Method::GET, &path, None).await
    }
}
