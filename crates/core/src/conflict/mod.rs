//! Change detection, conflict resolution and the manual review queue.
//!
//! 1. **Detection** -- fingerprinting source items and sink activities.
//! 2. **Resolution** -- turning item/record/sink state into a [`SyncOperation`].
//! 3. **Review** -- settling conflicts queued under the `manual` policy.

pub mod detector;
pub mod resolver;
pub mod review;

pub use detector::ChangeDetector;
pub use resolver::{ConflictResolver, Reason, SyncAction, SyncOperation};
pub use review::ConflictReview;
