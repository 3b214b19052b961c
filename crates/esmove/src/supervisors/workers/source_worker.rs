//! Pumps one source (a scroll slice or a dump file) into the shared queue.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Worker;
use crate::backends::{Source, SourceBackend};
use crate::progress::PipelineStats;
use crate::supervisors::ProducerGate;

pub(crate) struct SourceWorker {
    source: SourceBackend,
    gate: Arc<ProducerGate>,
    stats: Arc<PipelineStats>,
}

impl SourceWorker {
    pub(crate) fn new(
        source: SourceBackend,
        gate: Arc<ProducerGate>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self { source, gate, stats }
    }
}

impl Worker for SourceWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            loop {
                match self.source.next_batch().await {
                    Ok(Some(docs)) => {
                        self.stats.add_read(docs.len() as u64);
                        for doc in docs {
                            if !self.gate.send(doc).await {
                                debug!("queue closed early; this producer stops");
                                self.gate.leave();
                                return Ok(());
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        // fatal for this source only; sibling slices keep going
                        // and the coordinator reports the shortfall at the end
                        warn!("source worker stopping after error: {error:#}");
                        break;
                    }
                }
            }
            self.gate.leave();
            Ok(())
        })
    }
}
