use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{elasticsearch, file};
use crate::common::Doc;

/// A source produces batches of records until the well runs dry.
///
/// # Contract
/// - `next_batch` returns `Ok(Some(docs))` while data flows.
/// - `Ok(None)` is EOF: the scroll is exhausted or the file is done.
/// - `Err` is fatal for this source only; sibling slices keep reading.
/// - Within one source, batches come back in server order. Across sources
///   there is no order at all, and consumers must not assume one.
#[async_trait]
pub(crate) trait Source: std::fmt::Debug {
    async fn next_batch(&mut self) -> Result<Option<Vec<Doc>>>;
}

/// Enum dispatch over the concrete sources; the workers never know whether
/// they are pumping a scroll slice or a dump file.
#[derive(Debug)]
pub(crate) enum SourceBackend {
    Elasticsearch(elasticsearch::ElasticsearchSource),
    File(file::FileSource),
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_batch(&mut self) -> Result<Option<Vec<Doc>>> {
        match self {
            SourceBackend::Elasticsearch(source) => source.next_batch().await,
            SourceBackend::File(source) => source.next_batch().await,
        }
    }
}
