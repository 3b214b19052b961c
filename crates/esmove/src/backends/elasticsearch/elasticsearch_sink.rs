//! Bulk-writing sink: one instance per worker, I/O only.

use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{BatchReport, Sink};
use crate::common::Doc;
use crate::es::{EsApi, EsApiBackend};

/// Hands batches to the dialect's `_bulk` call and converts the outcome.
/// No buffer lives here; the sink worker decides when a batch is a batch.
#[derive(Debug)]
pub(crate) struct ElasticsearchSink {
    api: EsApiBackend,
    /// Rewrites every record's target index; set for single-index renames.
    index_override: Option<String>,
}

impl ElasticsearchSink {
    pub(crate) fn new(api: EsApiBackend, index_override: Option<String>) -> Self {
        Self { api, index_override }
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    async fn write_batch(&mut self, docs: Vec<Doc>) -> Result<BatchReport> {
        let summary = self.api.bulk(&docs, self.index_override.as_deref()).await?;
        Ok(BatchReport {
            written: summary.written,
            failed: summary.failed,
        })
    }

    async fn close(&mut self) -> Result<()> {
        // nothing buffered; the connection pool drops with the client
        Ok(())
    }
}
