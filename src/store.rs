//! Read seams between the evaluator and the data layer.
//!
//! The engine never owns flag or segment data. A [`Store`] provides
//! non-blocking reads of the current data set; implementations are expected
//! to hand out `Arc`s to immutable items that are replaced wholesale when
//! new data arrives. Unbounded ("big") segments live behind a separate
//! [`BigSegmentProvider`] seam because their membership is typically held in
//! an external store whose availability can degrade independently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{FeatureFlag, Segment};

/// Read-only view of the currently active flags and segments.
///
/// Lookups are expected to be cheap in-memory reads. A `None` means the item
/// does not exist (or has been deleted); the evaluator treats the two the
/// same way.
pub trait Store {
    /// Look up a feature flag by key.
    fn flag(&self, key: &str) -> Option<Arc<FeatureFlag>>;

    /// Look up a user segment by key.
    fn segment(&self, key: &str) -> Option<Arc<Segment>>;
}

/// Availability of big segment data at the time a membership was queried.
///
/// The variants are ordered from best to worst, so the "worst status seen"
/// over an evaluation is simply the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    /// The store was reachable and its data is current.
    Healthy,
    /// The store was reachable but its data has not been refreshed recently.
    Stale,
    /// The store could not be queried.
    StoreError,
    /// No big segment store is configured, or the segment cannot be queried
    /// (for example, it has no generation).
    NotConfigured,
}

/// Outcome of a single big segment membership query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigSegmentMembership {
    /// Whether the user is in the segment. `None` means the store had no
    /// record for this user, which is treated as not included.
    pub included: Option<bool>,
    /// Availability of the store at query time.
    pub status: BigSegmentsStatus,
}

/// Provider of membership data for unbounded segments.
///
/// Queries may block briefly (the backing store is commonly a network
/// cache); degraded availability is reported through
/// [`BigSegmentMembership::status`] rather than by failing the evaluation.
pub trait BigSegmentProvider {
    /// Query whether `user_key` belongs to the given generation of a
    /// segment.
    fn membership(
        &self,
        segment_key: &str,
        generation: i64,
        user_key: &str,
    ) -> BigSegmentMembership;
}
