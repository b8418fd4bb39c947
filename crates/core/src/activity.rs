//! Rendering of source items into sink activity fields.

use crate::models::{ActivityFields, SourceItem};

/// Longest activity name Kimai accepts comfortably.
pub const MAX_NAME_LEN: usize = 100;

/// Longest description carried over into the activity comment.
pub const MAX_COMMENT_BODY_LEN: usize = 500;

const MARKER_PREFIX: &str = "[tracksync]";

/// The reference written into every activity so an entity can be found
/// again even when the local mapping was lost: `[tracksync] org/repo#12`.
pub fn external_ref(namespace: &str, repo: &str, number: i64) -> String {
    format!("{} {}/{}#{}", MARKER_PREFIX, namespace, repo, number)
}

/// Build the activity fields for a source item.
pub fn render(item: &SourceItem, namespace: &str, repo: &str) -> ActivityFields {
    let title = sanitize(&item.title);
    let title = if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    };
    let name = truncate(
        &format!("[{}] #{}: {}", item.kind.label(), item.number, title),
        MAX_NAME_LEN,
    );

    let body = item.body.trim();
    let description = if body.is_empty() {
        "No description provided.".to_string()
    } else {
        truncate(body, MAX_COMMENT_BODY_LEN)
    };

    ActivityFields {
        name,
        comment: format!(
            "{}\n\n{}",
            description,
            external_ref(namespace, repo, item.number)
        ),
        visible: true,
    }
}

/// Whether `comment` carries the given external reference on its own line.
pub fn has_external_ref(comment: &str, external_ref: &str) -> bool {
    comment.lines().any(|line| line.trim() == external_ref)
}

/// Strip control characters and collapse runs of whitespace.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to `max` characters, ending in `...` when shortened.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
