//! The supervisor wires producers to consumers over one bounded channel and
//! owns the completion protocol: the last producer out closes the queue,
//! consumers drain what is left, the supervisor joins everyone.

mod workers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_channel::Sender;
use futures::future::join_all;
use tracing::debug;

use crate::backends::{SinkBackend, SourceBackend};
use crate::common::Doc;
use crate::progress::PipelineStats;
use self::workers::{SinkWorker, SourceWorker, Worker};

/// When a sink worker flushes its private buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushPolicy {
    pub max_docs: usize,
    pub max_bytes: usize,
    /// Flush a non-empty buffer after this much queue silence.
    pub idle: Duration,
}

/// Producer count-gate. Every producer calls [`leave`](Self::leave) exactly
/// once on exit; the last one closes the queue, and only the last one.
#[derive(Debug)]
pub(crate) struct ProducerGate {
    remaining: AtomicUsize,
    tx: Sender<Doc>,
}

impl ProducerGate {
    fn new(producers: usize, tx: Sender<Doc>) -> Self {
        Self {
            remaining: AtomicUsize::new(producers),
            tx,
        }
    }

    /// Blocks while the queue is full; that backpressure is the only flow
    /// control in the pipeline. Returns false once the queue is closed.
    pub(crate) async fn send(&self, doc: Doc) -> bool {
        self.tx.send(doc).await.is_ok()
    }

    pub(crate) fn leave(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("last producer done; closing the document queue");
            self.tx.close();
        }
    }
}

pub(crate) struct Supervisor {
    queue_capacity: usize,
    flush: FlushPolicy,
}

impl Supervisor {
    pub(crate) fn new(queue_capacity: usize, flush: FlushPolicy) -> Self {
        Self {
            queue_capacity,
            flush,
        }
    }

    /// Spawns every worker and waits for all of them.
    pub(crate) async fn start(
        &self,
        sources: Vec<SourceBackend>,
        sinks: Vec<SinkBackend>,
        stats: Arc<PipelineStats>,
    ) -> Result<()> {
        let (tx, rx) = async_channel::bounded(self.queue_capacity);
        let gate = Arc::new(ProducerGate::new(sources.len(), tx));
        debug!(
            "starting {} producer(s) and {} consumer(s), queue capacity {}",
            gate.remaining.load(Ordering::Relaxed),
            sinks.len(),
            self.queue_capacity
        );

        let mut handles = Vec::with_capacity(sources.len() + sinks.len());
        for sink in sinks {
            handles.push(SinkWorker::new(rx.clone(), sink, self.flush, stats.clone()).start());
        }
        for source in sources {
            handles.push(SourceWorker::new(source, gate.clone(), stats.clone()).start());
        }
        drop(rx);

        for result in join_all(handles).await {
            result??;
        }
        Ok(())
    }
}
