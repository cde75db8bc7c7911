//! Push dispatch pipeline.
//!
//! For each resource in a batch, the dispatcher derives a delivery target,
//! claims the resource in the store, invokes exactly one backend, and
//! confirms or releases the claim. Items are processed strictly in the
//! order given, with a fixed pause between consecutive items so outbound
//! calls stay inside backend rate limits.
//!
//! Routing rules, in precedence order:
//! 1. A magnet field starting with `magnet:?` goes to the drive backend
//!    with the magnet as-is.
//! 2. A pipe-delimited magnet field (`m3u8|<url>`, `pikpak|<url>`) yields
//!    its second segment as the target when that segment is an HTTP URL;
//!    otherwise the raw link field is the candidate.
//! 3. An HTTP candidate goes to the stream backend. Anything else is
//!    unroutable and never touches a backend or the store.

use crate::delivery::DeliveryBackend;
use crate::organize::Organizer;
use crate::store::ResourceStore;
use skiff_common::api::{ResourceItem, MAGNET_SCHEME};
use skiff_common::SkiffError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Target classification
// ============================================================================

/// Where one resource should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Magnet URI for the cloud-drive backend.
    Drive(String),
    /// HTTP URL for the stream-download backend.
    Stream(String),
    /// No usable target; the item is skipped without side effects.
    Unroutable,
}

/// Classify one resource. Pure function over the trimmed magnet and link
/// fields; the magnet field wins over the page link.
pub fn derive_target(item: &ResourceItem) -> DeliveryTarget {
    let magnet = item.magnet_trimmed();
    if magnet.starts_with(MAGNET_SCHEME) {
        return DeliveryTarget::Drive(magnet.to_string());
    }

    // `m3u8|<url>` and `pikpak|<url>` carry the real URL in the second
    // pipe segment. A segment that is not HTTP falls back to the link.
    let candidate = magnet
        .split('|')
        .nth(1)
        .filter(|segment| segment.starts_with("http"))
        .unwrap_or_else(|| item.link_trimmed());

    if candidate.starts_with("http") {
        DeliveryTarget::Stream(candidate.to_string())
    } else {
        DeliveryTarget::Unroutable
    }
}

// ============================================================================
// Throttled sequencer
// ============================================================================

/// Enforces the fixed inter-item delay during batch delivery. The wait
/// happens between items, so a batch of N items suspends N-1 times.
pub struct ThrottledSequencer {
    delay: Duration,
    first: bool,
}

impl ThrottledSequencer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, first: true }
    }

    /// Suspend for the configured delay, except before the first item.
    pub async fn pace(&mut self) {
        if self.first {
            self.first = false;
            return;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Result of one batch dispatch.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Items confirmed delivered.
    pub pushed: usize,
    /// Items skipped: unroutable, already claimed or pushed, or declined
    /// by a backend (for example no drive credential).
    pub skipped: usize,
    /// Items handed to the organizer after a confirmed drive delivery.
    pub organized: usize,
    /// Set when a backend or store failure aborted the remaining batch.
    pub aborted: Option<SkiffError>,
}

impl DispatchOutcome {
    /// Human-readable result line for the API response.
    pub fn message(&self, organize: bool) -> String {
        match &self.aborted {
            Some(e) => format!("pushed {} resources, batch aborted: {e}", self.pushed),
            None if organize => format!(
                "pushed {} resources, {} queued for organize",
                self.pushed, self.organized
            ),
            None => format!("pushed {} resources", self.pushed),
        }
    }

    pub fn success(&self) -> bool {
        self.aborted.is_none()
    }
}

/// Classifies and delivers batches of resources.
pub struct Dispatcher {
    store: Arc<dyn ResourceStore>,
    delay: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ResourceStore>, delay: Duration) -> Self {
        Self { store, delay }
    }

    /// Deliver `items` in order. A backend transport error aborts the
    /// remaining batch; declined items and unroutable items are skipped
    /// and the batch keeps going.
    pub async fn dispatch(
        &self,
        items: &[ResourceItem],
        drive: &dyn DeliveryBackend,
        stream: &dyn DeliveryBackend,
        organize: bool,
        organizer: &dyn Organizer,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut sequencer = ThrottledSequencer::new(self.delay);

        for item in items {
            sequencer.pace().await;

            let target = derive_target(item);
            let (backend, url): (&dyn DeliveryBackend, &str) = match &target {
                DeliveryTarget::Drive(url) => (drive, url.as_str()),
                DeliveryTarget::Stream(url) => (stream, url.as_str()),
                DeliveryTarget::Unroutable => {
                    debug!("resource {} has no routable target, skipping", item.id);
                    outcome.skipped += 1;
                    continue;
                }
            };

            // Claim before the backend call; losing the claim means another
            // dispatch already owns this item.
            match self.store.claim_for_push(item.id) {
                Ok(true) => {}
                Ok(false) => {
                    info!("resource {} already claimed or pushed, skipping", item.id);
                    outcome.skipped += 1;
                    continue;
                }
                Err(e) => {
                    outcome.aborted = Some(e);
                    break;
                }
            }

            match backend.add_task(url).await {
                Ok(true) => {
                    if let Err(e) = self.store.confirm_pushed(item.id) {
                        outcome.aborted = Some(e);
                        break;
                    }
                    outcome.pushed += 1;
                    info!("✅  resource {} delivered via {} backend", item.id, backend.name());
                    if organize && matches!(target, DeliveryTarget::Drive(_)) {
                        organizer.add_task(item);
                        outcome.organized += 1;
                    }
                }
                Ok(false) => {
                    self.release(item.id);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!("{} backend failed on resource {}: {e}", backend.name(), item.id);
                    self.release(item.id);
                    outcome.aborted = Some(e);
                    break;
                }
            }
        }

        outcome
    }

    fn release(&self, id: i64) {
        if let Err(e) = self.store.release_claim(id) {
            warn!("failed to release claim on resource {id}: {e}");
        }
    }
}
