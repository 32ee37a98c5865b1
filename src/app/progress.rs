//! Progress bar for fetch runs, driven by the engine's outcome channel.

use bookfetch_core::{AcquireOutcome, OutcomeKind};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 64;

/// Spawns the consumer side of the outcome channel.
///
/// The bar finishes once every sender is dropped, i.e. when the batch is
/// done. A hidden bar is used when `visible` is false so the channel is still
/// drained.
pub(crate) fn spawn_progress_ui(
    visible: bool,
    total: usize,
) -> (mpsc::Sender<AcquireOutcome>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AcquireOutcome>(CHANNEL_CAPACITY);
    let bar = if visible {
        let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let handle = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            bar.set_message(progress_message(&outcome));
            bar.inc(1);
        }
        bar.finish_and_clear();
    });
    (tx, handle)
}

fn progress_message(outcome: &AcquireOutcome) -> String {
    let verb = match outcome.kind {
        OutcomeKind::Downloaded => "fetched",
        OutcomeKind::AlreadyPresent => "present",
        OutcomeKind::AllUrlsFailed => "failed",
        OutcomeKind::Cancelled => "cancelled",
    };
    format!("{verb}: {}", outcome.title)
}
