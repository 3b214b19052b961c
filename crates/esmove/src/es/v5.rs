//! Dialect for majors 5/6: sliced scrolls, typed mappings and bulk actions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::client::EsClient;
use super::types::{BulkDialect, BulkSummary, ScrollBatch, parse_scroll_body};
use super::{EsApi, ScrollRequest, SliceSpec};
use crate::common::{ClusterHealth, Doc};

#[derive(Debug, Clone)]
pub(crate) struct EsApiV5 {
    client: EsClient,
}

impl EsApiV5 {
    pub(crate) fn new(client: EsClient) -> Self {
        Self { client }
    }
}

/// Builds the search body shared by the 5.x and 7.x open calls.
pub(super) fn scroll_open_body(request: &ScrollRequest, slice: Option<SliceSpec>) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("size".into(), json!(request.batch_size));
    if let Some(query) = &request.query {
        body.insert("query".into(), query.clone());
    }
    if let Some(fields) = &request.fields {
        body.insert("_source".into(), json!(fields));
    }
    if let Some(slice) = slice.filter(|s| s.max > 1) {
        body.insert("slice".into(), json!({ "id": slice.id, "max": slice.max }));
    }
    body
}

pub(super) async fn open_scroll_json(
    client: &EsClient,
    request: &ScrollRequest,
    body: Map<String, Value>,
) -> Result<ScrollBatch> {
    let path = format!("{}/_search?scroll={}", request.indices, request.keep_alive);
    let response = client
        .post_json(&path, &Value::Object(body))
        .await?
        .into_body()
        .with_context(|| format!("failed to open scroll over '{}'", request.indices))?;
    parse_scroll_body(&response)
}

pub(super) async fn next_scroll_json(
    client: &EsClient,
    keep_alive: &str,
    scroll_id: &str,
) -> Result<ScrollBatch> {
    let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });
    let response = client
        .post_json("_search/scroll", &body)
        .await?
        .into_body()
        .context("failed to advance scroll")?;
    parse_scroll_body(&response)
}

#[async_trait]
impl EsApi for EsApiV5 {
    async fn cluster_health(&self) -> Result<ClusterHealth> {
        super::fetch_health(&self.client).await
    }

    async fn get_settings(&self, pattern: &str) -> Result<Map<String, Value>> {
        super::fetch_settings(&self.client, pattern).await
    }

    async fn update_settings(&self, index: &str, tree: &Value) -> Result<()> {
        super::push_settings(&self.client, index, tree).await
    }

    async fn get_mappings(
        &self,
        copy_all: bool,
        pattern: &str,
    ) -> Result<(Vec<String>, Map<String, Value>)> {
        super::fetch_mappings(&self.client, copy_all, pattern).await
    }

    async fn update_mapping(&self, index: &str, mappings: &Value) -> Result<()> {
        super::v0::put_typed_mappings(&self.client, index, mappings).await
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        super::put_index(&self.client, index, body).await
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        super::drop_index(&self.client, index).await
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        super::post_refresh(&self.client, index).await
    }

    async fn open_scroll(
        &self,
        request: &ScrollRequest,
        slice: Option<SliceSpec>,
    ) -> Result<ScrollBatch> {
        let body = scroll_open_body(request, slice);
        open_scroll_json(&self.client, request, body).await
    }

    async fn next_scroll(&self, keep_alive: &str, scroll_id: &str) -> Result<ScrollBatch> {
        next_scroll_json(&self.client, keep_alive, scroll_id).await
    }

    async fn bulk(&self, docs: &[Doc], index_override: Option<&str>) -> Result<BulkSummary> {
        super::push_bulk(&self.client, docs, index_override, BulkDialect { typed: true }).await
    }
}
