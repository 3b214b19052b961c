//! Dialect for major 7 and newer: typeless everything, tracked totals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::client::EsClient;
use super::types::{BulkDialect, BulkSummary, ScrollBatch};
use super::{EsApi, ScrollRequest, SliceSpec};
use crate::common::{ClusterHealth, Doc};

#[derive(Debug, Clone)]
pub(crate) struct EsApiV7 {
    client: EsClient,
}

impl EsApiV7 {
    pub(crate) fn new(client: EsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EsApi for EsApiV7 {
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

    /// Typeless since 7.0: the whole mapping goes up in one request.
    async fn update_mapping(&self, index: &str, mappings: &Value) -> Result<()> {
        self.client
            .put_json(&format!("{index}/_mapping"), mappings)
            .await?
            .into_body()
            .with_context(|| format!("failed to update mapping for '{index}'"))?;
        Ok(())
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
        let mut body = super::v5::scroll_open_body(request, slice);
        // without this the reported total caps at 10k and the read progress
        // bar lies for any index worth migrating
        body.insert("track_total_hits".into(), json!(true));
        super::v5::open_scroll_json(&self.client, request, body).await
    }

    async fn next_scroll(&self, keep_alive: &str, scroll_id: &str) -> Result<ScrollBatch> {
        super::v5::next_scroll_json(&self.client, keep_alive, scroll_id).await
    }

    async fn bulk(&self, docs: &[Doc], index_override: Option<&str>) -> Result<BulkSummary> {
        super::push_bulk(&self.client, docs, index_override, BulkDialect { typed: false }).await
    }
}
