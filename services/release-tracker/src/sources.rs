//!
//! src/sources.rs
//!
//! The seam every platform plugs into. A source turns one artist's
//! platform identifier into the releases it published inside the window.
//!

use async_trait::async_trait;

use crate::errors::TrackerError;
use crate::types::{ArtistConfig, LookbackWindow, Platform, ReleaseDraft, ReleaseRecord};

///
/// Contract for a platform source:
/// - no identifier for this platform means `Ok(vec![])`
/// - only releases inside `window` are returned
/// - a malformed item is skipped, its siblings are still returned
/// - upstream failures come back as `Err` and cost only this artist/platform pair
///
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch_recent(
        &self,
        artist: &ArtistConfig,
        window: &LookbackWindow
    ) -> Result<Vec<ReleaseRecord>, TrackerError>;
}

/// Builds a record from a draft, logging and dropping ones without a usable id
pub(crate) fn finish_draft(draft: ReleaseDraft) -> Option<ReleaseRecord> {
    let platform = draft.platform;
    match ReleaseRecord::new(draft) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(platform = %platform, error = %e, "source.item.skipped");
            None
        }
    }
}
