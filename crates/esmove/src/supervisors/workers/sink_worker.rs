//! Drains the queue into one sink with size- and time-based flushes.

use std::sync::Arc;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::Worker;
use crate::backends::{Sink, SinkBackend};
use crate::common::Doc;
use crate::progress::PipelineStats;
use crate::supervisors::FlushPolicy;

/// Each worker owns a private buffer; workers share only the queue and the
/// counters, so no cross-worker synchronization exists anywhere.
pub(crate) struct SinkWorker {
    rx: Receiver<Doc>,
    sink: SinkBackend,
    flush: FlushPolicy,
    stats: Arc<PipelineStats>,
}

impl SinkWorker {
    pub(crate) fn new(
        rx: Receiver<Doc>,
        sink: SinkBackend,
        flush: FlushPolicy,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            rx,
            sink,
            flush,
            stats,
        }
    }
}

impl Worker for SinkWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let mut buffer: Vec<Doc> = Vec::new();
            let mut buffered_bytes = 0usize;
            loop {
                match timeout(self.flush.idle, self.rx.recv()).await {
                    Ok(Ok(doc)) => {
                        buffered_bytes += doc.approx_bytes();
                        buffer.push(doc);
                        if buffer.len() >= self.flush.max_docs
                            || buffered_bytes >= self.flush.max_bytes
                        {
                            flush_buffer(&mut self.sink, &mut buffer, &mut buffered_bytes, &self.stats)
                                .await;
                        }
                    }
                    Ok(Err(_)) => {
                        // queue closed and drained: final flush, then release
                        if !buffer.is_empty() {
                            flush_buffer(&mut self.sink, &mut buffer, &mut buffered_bytes, &self.stats)
                                .await;
                        }
                        self.sink.close().await?;
                        debug!("sink worker done");
                        return Ok(());
                    }
                    Err(_) => {
                        // idle with work pending: do not sit on documents
                        if !buffer.is_empty() {
                            flush_buffer(&mut self.sink, &mut buffer, &mut buffered_bytes, &self.stats)
                                .await;
                        }
                    }
                }
            }
        })
    }
}

/// Sends the buffer as one batch. A whole-batch failure is logged and counted
/// against `failed`; the worker never dies over a bad request, so every
/// dequeued document ends up in exactly one counter.
async fn flush_buffer(
    sink: &mut SinkBackend,
    buffer: &mut Vec<Doc>,
    buffered_bytes: &mut usize,
    stats: &PipelineStats,
) {
    let batch = std::mem::take(buffer);
    *buffered_bytes = 0;
    let batch_len = batch.len() as u64;
    match sink.write_batch(batch).await {
        Ok(report) => {
            stats.add_written(report.written);
            stats.add_failed(report.failed);
        }
        Err(error) => {
            warn!("dropping a batch of {batch_len} document(s): {error:#}");
            stats.add_failed(batch_len);
        }
    }
}
