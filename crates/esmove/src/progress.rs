//! Pipeline counters and their terminal rendering, kept apart so workers
//! never hold a TTY handle and the pipeline stays testable headless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

/// Shared counters, bumped by workers with relaxed ordering. The coordinator
/// reads the final numbers only after joining every worker, so nothing
/// stronger is needed.
#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    read: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn add_read(&self, n: u64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub(crate) fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Renders the read/write bars from the shared counters on a timer.
/// Indicatif hides itself on non-TTY stderr, so tests and cron runs stay
/// quiet without any special casing.
pub(crate) struct ProgressObserver {
    ticker: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    read_bar: ProgressBar,
    write_bar: ProgressBar,
}

pub(crate) fn spawn_observer(
    stats: Arc<PipelineStats>,
    total: u64,
    read_prefix: &str,
    write_prefix: &str,
) -> ProgressObserver {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:>6} [{bar:40}] {pos}/{len} ({per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    let read_bar = multi.add(
        ProgressBar::new(total)
            .with_style(style.clone())
            .with_prefix(read_prefix.to_owned()),
    );
    let write_bar = multi.add(
        ProgressBar::new(total)
            .with_style(style)
            .with_prefix(write_prefix.to_owned()),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let ticker = tokio::spawn({
        let stop = stop.clone();
        let read_bar = read_bar.clone();
        let write_bar = write_bar.clone();
        async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            while !stop.load(Ordering::Relaxed) {
                interval.tick().await;
                read_bar.set_position(stats.read());
                write_bar.set_position(stats.written() + stats.failed());
            }
        }
    });

    ProgressObserver {
        ticker,
        stop,
        read_bar,
        write_bar,
    }
}

impl ProgressObserver {
    /// Stops the ticker and pins the bars to their final counts.
    pub(crate) async fn finish(self, stats: &PipelineStats) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.ticker.await;
        self.read_bar.set_position(stats.read());
        self.write_bar.set_position(stats.written() + stats.failed());
        self.read_bar.finish();
        self.write_bar.finish();
    }
}
