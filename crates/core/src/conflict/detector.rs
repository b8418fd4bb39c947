//! Change detection by content fingerprint.
//!
//! A fingerprint covers only the fields that matter for the mirrored
//! activity: title, body, state, the sorted label set and the modification
//! time truncated to the minute. Everything else the source returns (comment
//! counts, assignees, reactions) is ignored so that metadata churn does not
//! trigger updates.

use sha2::{Digest, Sha256};

use crate::models::{ActivityFields, SourceItem, SyncRecord};

/// Stateless fingerprinting helpers.
pub struct ChangeDetector;

impl ChangeDetector {
    /// Compute the hex-encoded SHA-256 fingerprint of a source item.
    pub fn fingerprint(item: &SourceItem) -> String {
        let mut labels: Vec<&str> = item.labels.iter().map(String::as_str).collect();
        labels.sort_unstable();
        labels.dedup();

        let mut hasher = Sha256::new();
        feed(&mut hasher, "title", item.title.as_bytes());
        feed(&mut hasher, "body", item.body.as_bytes());
        feed(&mut hasher, "state", item.state.to_string().as_bytes());
        hasher.update((labels.len() as u64).to_be_bytes());
        for label in labels {
            feed(&mut hasher, "label", label.as_bytes());
        }
        let minute = item.updated_at.format("%Y-%m-%dT%H:%MZ").to_string();
        feed(&mut hasher, "updated", minute.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Fingerprint of the activity fields written to (or read from) the sink.
    pub fn sink_fingerprint(fields: &ActivityFields) -> String {
        let mut hasher = Sha256::new();
        feed(&mut hasher, "name", fields.name.as_bytes());
        feed(&mut hasher, "comment", fields.comment.as_bytes());
        feed(&mut hasher, "visible", if fields.visible { b"1" } else { b"0" });
        hex::encode(hasher.finalize())
    }

    /// True when no record exists or the item's fingerprint differs from the
    /// one stored at the last successful apply.
    pub fn needs_update(item: &SourceItem, record: Option<&SyncRecord>) -> bool {
        match record {
            None => true,
            Some(r) => Self::fingerprint(item) != r.source_fingerprint,
        }
    }
}

// Tag and length prefixes keep ("ab", "c") and ("a", "bc") apart.
fn feed(hasher: &mut Sha256, tag: &str, value: &[u8]) {
    hasher.update(tag.as_bytes());
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value);
}
