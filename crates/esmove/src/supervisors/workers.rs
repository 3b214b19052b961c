//! Workers do the actual pumping; the supervisor only wires and waits.

use anyhow::Result;
use tokio::task::JoinHandle;

mod sink_worker;
mod source_worker;

pub(crate) use self::sink_worker::SinkWorker;
pub(crate) use self::source_worker::SourceWorker;

/// A spawned pipeline task.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}
