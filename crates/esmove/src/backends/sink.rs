use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{elasticsearch, file};
use crate::common::Doc;

/// What one batch write actually achieved.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BatchReport {
    pub written: u64,
    pub failed: u64,
}

/// A sink takes one batch and reports what landed. Pure I/O.
///
/// # Contract
/// - `write_batch` sends everything it is given in one operation. Per-record
///   rejections come back in the report; an `Err` means the whole batch went
///   nowhere and the caller decides what that costs.
/// - `close` flushes and releases; it must be called once the queue drains.
///   Nothing here retries.
#[async_trait]
pub(crate) trait Sink: std::fmt::Debug {
    async fn write_batch(&mut self, docs: Vec<Doc>) -> Result<BatchReport>;
    async fn close(&mut self) -> Result<()>;
}

/// Enum dispatch over the concrete sinks, mirror image of `SourceBackend`.
#[derive(Debug)]
pub(crate) enum SinkBackend {
    Elasticsearch(elasticsearch::ElasticsearchSink),
    File(file::FileSink),
}

#[async_trait]
impl Sink for SinkBackend {
    async fn write_batch(&mut self, docs: Vec<Doc>) -> Result<BatchReport> {
        match self {
            SinkBackend::Elasticsearch(sink) => sink.write_batch(docs).await,
            SinkBackend::File(sink) => sink.write_batch(docs).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::Elasticsearch(sink) => sink.close().await,
            SinkBackend::File(sink) => sink.close().await,
        }
    }
}
