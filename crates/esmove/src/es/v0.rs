//! Dialect for majors 0/1/2: scan-type scrolls, typed mappings, no slices.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::client::EsClient;
use super::types::{BulkDialect, BulkSummary, ScrollBatch, parse_scroll_body};
use super::{EsApi, ScrollRequest, SliceSpec};
use crate::common::{ClusterHealth, Doc};

#[derive(Debug, Clone)]
pub(crate) struct EsApiV0 {
    client: EsClient,
}

impl EsApiV0 {
    pub(crate) fn new(client: EsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EsApi for EsApiV0 {
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
        put_typed_mappings(&self.client, index, mappings).await
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
        if slice.is_some_and(|s| s.max > 1) {
            debug!("this cluster predates sliced scrolls; reading a single scroll");
        }
        let mut body = Map::new();
        if let Some(query) = &request.query {
            body.insert("query".into(), query.clone());
        }
        if let Some(fields) = &request.fields {
            body.insert("_source".into(), serde_json::json!(fields));
        }
        // scan mode returns no hits on the first page, only the cursor and
        // the total; the first advance starts delivering documents
        let path = format!(
            "{}/_search?scroll={}&search_type=scan&size={}",
            request.indices, request.keep_alive, request.batch_size
        );
        let response = self
            .client
            .post_json(&path, &Value::Object(body))
            .await?
            .into_body()
            .with_context(|| format!("failed to open scroll over '{}'", request.indices))?;
        parse_scroll_body(&response)
    }

    async fn next_scroll(&self, keep_alive: &str, scroll_id: &str) -> Result<ScrollBatch> {
        let path = format!("_search/scroll?scroll={keep_alive}");
        let response = self
            .client
            .post_text(&path, scroll_id.to_owned())
            .await?
            .into_body()
            .context("failed to advance scroll")?;
        parse_scroll_body(&response)
    }

    async fn bulk(&self, docs: &[Doc], index_override: Option<&str>) -> Result<BulkSummary> {
        super::push_bulk(&self.client, docs, index_override, BulkDialect { typed: true }).await
    }
}

/// Pre-7 mapping trees are keyed by type; each type is pushed separately.
pub(super) async fn put_typed_mappings(
    client: &EsClient,
    index: &str,
    mappings: &Value,
) -> Result<()> {
    let Some(types) = mappings.as_object() else {
        bail!("mapping tree for '{index}' is not an object");
    };
    for (doc_type, mapping) in types {
        client
            .put_json(&format!("{index}/_mapping/{doc_type}"), mapping)
            .await?
            .into_body()
            .with_context(|| format!("failed to update mapping for '{index}/{doc_type}'"))?;
    }
    Ok(())
}
