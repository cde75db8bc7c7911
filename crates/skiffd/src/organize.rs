//! Organize queue.
//!
//! Confirmed magnet deliveries can be handed to an organizer for rename
//! and folder post-processing. Those stages live outside this daemon; the
//! contract the dispatcher needs is a fire-and-forget enqueue, modeled as
//! an unbounded channel drained by a background task.

use skiff_common::api::ResourceItem;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Fire-and-forget enqueue into the organizer pipeline.
pub trait Organizer: Send + Sync {
    fn add_task(&self, item: &ResourceItem);
}

/// What the organizer stages need to pick the item up later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeJob {
    pub id: i64,
    pub code: Option<String>,
    pub magnet: String,
}

/// Channel-backed organizer used by the daemon.
pub struct QueueOrganizer {
    tx: mpsc::UnboundedSender<OrganizeJob>,
}

impl QueueOrganizer {
    /// Build an organizer plus the receiving end of its queue. Tests and
    /// embedding code drain the receiver themselves.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OrganizeJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Build an organizer with a background drain task that records each
    /// job. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (organizer, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                info!(
                    "organize: queued resource {} ({})",
                    job.id,
                    job.code.as_deref().unwrap_or("-")
                );
            }
        });
        organizer
    }
}

impl Organizer for QueueOrganizer {
    fn add_task(&self, item: &ResourceItem) {
        let job = OrganizeJob {
            id: item.id,
            code: item.code.clone(),
            magnet: item.magnet_trimmed().to_string(),
        };
        if self.tx.send(job).is_err() {
            warn!("organize queue is closed, dropping resource {}", item.id);
        }
    }
}

/// Enqueue every item whose magnet field qualifies it for organizing.
/// Items without a qualifying magnet are silently excluded from the count.
pub fn organize_items(items: &[ResourceItem], organizer: &dyn Organizer) -> usize {
    let mut count = 0;
    for item in items {
        if !item.has_qualifying_magnet() {
            continue;
        }
        organizer.add_task(item);
        count += 1;
    }
    count
}
