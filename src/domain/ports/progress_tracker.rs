use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::domain::models::DownloadEvent;

/// Sending half of the channel the engine reports progress, completion and failure on.
///
/// A sink whose receiver went away, or a disabled sink, silently drops events:
/// the download keeps going whether or not anybody is watching.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<DownloadEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<DownloadEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// No-op sink for when progress tracking is not needed
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                trace!("Event receiver dropped, discarding event");
            }
        }
    }
}
