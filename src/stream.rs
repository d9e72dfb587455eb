//! Snapshot streaming for UIs.
//!
//! A translation can take minutes. Instead of polling [`crate::Pipeline::snapshot`],
//! a UI can hold a [`SnapshotStream`] and redraw whenever it yields. The
//! stream starts with the current snapshot and then yields the latest one
//! after each change; intermediate snapshots may be skipped when the
//! consumer is slower than the pipeline.

use crate::job::JobSnapshot;
use futures::StreamExt;
use std::pin::Pin;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

/// A boxed stream of job snapshots.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = JobSnapshot> + Send>>;

pub(crate) fn snapshot_stream(rx: watch::Receiver<JobSnapshot>) -> SnapshotStream {
    Box::pin(WatchStream::new(rx))
}

/// Wait until the stream shows a job at `generation` in `ready` or `failed`.
///
/// Returns `None` if the stream ends first (the pipeline was dropped).
pub async fn settled(stream: &mut SnapshotStream, generation: u64) -> Option<JobSnapshot> {
    while let Some(snapshot) = stream.next().await {
        if snapshot.generation == generation && snapshot.status.is_terminal() {
            return Some(snapshot);
        }
    }
    None
}
