//! Version-dialect capability layer over the Elasticsearch REST API.
//!
//! One probe of `GET /` at startup binds a concrete dialect for the whole
//! run; nothing version-sniffs per request after that. The dialects cover
//! majors 0/1/2 (`V0`), 5/6 (`V5`) and 7+ (`V7`), and differ in how scrolls
//! open and advance, whether bulk actions and mappings carry a `_type`, and
//! how `hits.total` is spelled.

pub(crate) mod client;
pub(crate) mod types;
pub(crate) mod v0;
pub(crate) mod v5;
pub(crate) mod v7;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::common::{ClusterHealth, ClusterVersion, Doc};
use self::client::{EsClient, EsEndpoint};
use self::types::{BulkDialect, BulkSummary, ScrollBatch};
use self::v0::EsApiV0;
use self::v5::EsApiV5;
use self::v7::EsApiV7;

/// Everything the pipeline asks of a cluster.
///
/// Implementations never retry: transport errors and non-2xx responses
/// surface to the caller, who decides whether the failure is fatal, worth a
/// warning, or just another counter bump.
#[async_trait]
pub(crate) trait EsApi {
    async fn cluster_health(&self) -> Result<ClusterHealth>;

    /// Settings trees keyed by concrete index name.
    async fn get_settings(&self, pattern: &str) -> Result<Map<String, Value>>;

    /// `tree` is a full index descriptor; only its `settings` subtree is sent.
    async fn update_settings(&self, index: &str, tree: &Value) -> Result<()>;

    /// Resolved concrete index names plus the mapping tree keyed by name.
    /// `copy_all` expands the pattern to `_all` and drops dot-prefixed
    /// system indices from the result.
    async fn get_mappings(&self, copy_all: bool, pattern: &str)
    -> Result<(Vec<String>, Map<String, Value>)>;

    /// `mappings` is the value found under a descriptor's `mappings` key.
    async fn update_mapping(&self, index: &str, mappings: &Value) -> Result<()>;

    async fn create_index(&self, index: &str, body: &Value) -> Result<()>;
    async fn delete_index(&self, index: &str) -> Result<()>;
    async fn refresh(&self, index: &str) -> Result<()>;

    /// Opens a server-side scroll; the first page of hits rides back with the
    /// cursor. Slices are ignored by dialects that predate them.
    async fn open_scroll(&self, request: &ScrollRequest, slice: Option<SliceSpec>)
    -> Result<ScrollBatch>;

    async fn next_scroll(&self, keep_alive: &str, scroll_id: &str) -> Result<ScrollBatch>;

    /// One bulk request. `Ok` means the request landed; per-item rejects are
    /// counted in the summary. `Err` means the whole batch went nowhere.
    async fn bulk(&self, docs: &[Doc], index_override: Option<&str>) -> Result<BulkSummary>;
}

/// What a scroll producer needs to open its cursor.
#[derive(Debug, Clone)]
pub(crate) struct ScrollRequest {
    /// Index name or pattern, passed to the server unexpanded.
    pub indices: String,
    /// Server-side keep-alive window, e.g. `1m`.
    pub keep_alive: String,
    /// Documents per shard per page.
    pub batch_size: usize,
    /// Query DSL passed through verbatim.
    pub query: Option<Value>,
    /// `_source` projection.
    pub fields: Option<Vec<String>>,
}

/// A disjoint partition of a scroll for parallel consumption.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceSpec {
    pub id: usize,
    pub max: usize,
}

/// Enum dispatch over the dialects, same pattern as the pipeline backends.
#[derive(Debug, Clone)]
pub(crate) enum EsApiBackend {
    V0(EsApiV0),
    V5(EsApiV5),
    V7(EsApiV7),
}

impl EsApiBackend {
    /// Sliced scrolls are a 5.x feature; callers cap their fan-out to this.
    pub(crate) fn supports_slices(&self) -> bool {
        !matches!(self, EsApiBackend::V0(_))
    }
}

/// Probes the root endpoint once and binds the dialect for this cluster.
pub(crate) async fn connect(endpoint: EsEndpoint) -> Result<(EsApiBackend, ClusterVersion)> {
    let client = EsClient::new(endpoint)?;
    let base = client.base_url().to_owned();
    let body = client
        .get("")
        .await?
        .into_body()
        .with_context(|| format!("version probe against {base} failed"))?;
    let info: types::RootInfo = serde_json::from_str(&body)
        .with_context(|| format!("{base} does not answer like an Elasticsearch cluster"))?;
    let version = ClusterVersion::parse(&info.version.number)?;
    let api = match version.major {
        0..=2 => EsApiBackend::V0(EsApiV0::new(client)),
        5 | 6 => EsApiBackend::V5(EsApiV5::new(client)),
        // 7.x and anything newer speaks the typeless dialect
        _ => EsApiBackend::V7(EsApiV7::new(client)),
    };
    debug!("cluster {base} reports version {version}");
    Ok((api, version))
}

#[async_trait]
impl EsApi for EsApiBackend {
    async fn cluster_health(&self) -> Result<ClusterHealth> {
        match self {
            EsApiBackend::V0(api) => api.cluster_health().await,
            EsApiBackend::V5(api) => api.cluster_health().await,
            EsApiBackend::V7(api) => api.cluster_health().await,
        }
    }

    async fn get_settings(&self, pattern: &str) -> Result<Map<String, Value>> {
        match self {
            EsApiBackend::V0(api) => api.get_settings(pattern).await,
            EsApiBackend::V5(api) => api.get_settings(pattern).await,
            EsApiBackend::V7(api) => api.get_settings(pattern).await,
        }
    }

    async fn update_settings(&self, index: &str, tree: &Value) -> Result<()> {
        match self {
            EsApiBackend::V0(api) => api.update_settings(index, tree).await,
            EsApiBackend::V5(api) => api.update_settings(index, tree).await,
            EsApiBackend::V7(api) => api.update_settings(index, tree).await,
        }
    }

    async fn get_mappings(
        &self,
        copy_all: bool,
        pattern: &str,
    ) -> Result<(Vec<String>, Map<String, Value>)> {
        match self {
            EsApiBackend::V0(api) => api.get_mappings(copy_all, pattern).await,
            EsApiBackend::V5(api) => api.get_mappings(copy_all, pattern).await,
            EsApiBackend::V7(api) => api.get_mappings(copy_all, pattern).await,
        }
    }

    async fn update_mapping(&self, index: &str, mappings: &Value) -> Result<()> {
        match self {
            EsApiBackend::V0(api) => api.update_mapping(index, mappings).await,
            EsApiBackend::V5(api) => api.update_mapping(index, mappings).await,
            EsApiBackend::V7(api) => api.update_mapping(index, mappings).await,
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        match self {
            EsApiBackend::V0(api) => api.create_index(index, body).await,
            EsApiBackend::V5(api) => api.create_index(index, body).await,
            EsApiBackend::V7(api) => api.create_index(index, body).await,
        }
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        match self {
            EsApiBackend::V0(api) => api.delete_index(index).await,
            EsApiBackend::V5(api) => api.delete_index(index).await,
            EsApiBackend::V7(api) => api.delete_index(index).await,
        }
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        match self {
            EsApiBackend::V0(api) => api.refresh(index).await,
            EsApiBackend::V5(api) => api.refresh(index).await,
            EsApiBackend::V7(api) => api.refresh(index).await,
        }
    }

    async fn open_scroll(
        &self,
        request: &ScrollRequest,
        slice: Option<SliceSpec>,
    ) -> Result<ScrollBatch> {
        match self {
            EsApiBackend::V0(api) => api.open_scroll(request, slice).await,
            EsApiBackend::V5(api) => api.open_scroll(request, slice).await,
            EsApiBackend::V7(api) => api.open_scroll(request, slice).await,
        }
    }

    async fn next_scroll(&self, keep_alive: &str, scroll_id: &str) -> Result<ScrollBatch> {
        match self {
            EsApiBackend::V0(api) => api.next_scroll(keep_alive, scroll_id).await,
            EsApiBackend::V5(api) => api.next_scroll(keep_alive, scroll_id).await,
            EsApiBackend::V7(api) => api.next_scroll(keep_alive, scroll_id).await,
        }
    }

    async fn bulk(&self, docs: &[Doc], index_override: Option<&str>) -> Result<BulkSummary> {
        match self {
            EsApiBackend::V0(api) => api.bulk(docs, index_override).await,
            EsApiBackend::V5(api) => api.bulk(docs, index_override).await,
            EsApiBackend::V7(api) => api.bulk(docs, index_override).await,
        }
    }
}

// Calls that kept the same shape across every supported major live here so
// the dialect files only spell out what actually differs.

async fn fetch_health(client: &EsClient) -> Result<ClusterHealth> {
    let body = client
        .get("_cluster/health")
        .await?
        .into_body()
        .context("cluster health probe failed")?;
    serde_json::from_str(&body).context("unexpected cluster health payload")
}

async fn fetch_settings(client: &EsClient, pattern: &str) -> Result<Map<String, Value>> {
    let body = client
        .get(&format!("{pattern}/_settings"))
        .await?
        .into_body()
        .with_context(|| format!("failed to read settings for '{pattern}'"))?;
    serde_json::from_str(&body).context("unexpected settings payload")
}

async fn push_settings(client: &EsClient, index: &str, tree: &Value) -> Result<()> {
    // callers hand over a full descriptor; the API wants the subtree
    let payload = tree.get("settings").cloned().unwrap_or_else(|| tree.clone());
    client
        .put_json(&format!("{index}/_settings"), &payload)
        .await?
        .into_body()
        .with_context(|| format!("settings update on '{index}' was rejected"))?;
    Ok(())
}

async fn fetch_mappings(
    client: &EsClient,
    copy_all: bool,
    pattern: &str,
) -> Result<(Vec<String>, Map<String, Value>)> {
    let pattern = if copy_all { "_all" } else { pattern };
    let body = client
        .get(&format!("{pattern}/_mapping"))
        .await?
        .into_body()
        .with_context(|| format!("failed to read mappings for '{pattern}'"))?;
    let tree: Map<String, Value> =
        serde_json::from_str(&body).context("unexpected mapping payload")?;
    let mappings: Map<String, Value> = tree
        .into_iter()
        // a full-cluster copy never drags system indices along
        .filter(|(name, _)| !(copy_all && name.starts_with('.')))
        .collect();
    let mut names: Vec<String> = mappings.keys().cloned().collect();
    names.sort();
    Ok((names, mappings))
}

async fn put_index(client: &EsClient, index: &str, body: &Value) -> Result<()> {
    client
        .put_json(index, body)
        .await?
        .into_body()
        .with_context(|| format!("failed to create index '{index}'"))?;
    Ok(())
}

async fn drop_index(client: &EsClient, index: &str) -> Result<()> {
    client
        .delete(index)
        .await?
        .into_body()
        .with_context(|| format!("failed to delete index '{index}'"))?;
    Ok(())
}

async fn post_refresh(client: &EsClient, index: &str) -> Result<()> {
    client
        .post(&format!("{index}/_refresh"))
        .await?
        .into_body()
        .with_context(|| format!("refresh of '{index}' failed"))?;
    Ok(())
}

async fn push_bulk(
    client: &EsClient,
    docs: &[Doc],
    index_override: Option<&str>,
    dialect: BulkDialect,
) -> Result<BulkSummary> {
    let body = types::render_bulk_body(docs, index_override, dialect)?;
    let response = client
        .post_ndjson("_bulk", body)
        .await?
        .into_body()
        .context("bulk request rejected by the cluster")?;
    types::parse_bulk_body(&response, docs.len())
}
