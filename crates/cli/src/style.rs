//! Shared styling utilities for terminal output.

use console::Style;

use tracksync_core::conflict::SyncAction;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Colour for an action in report tables.
pub fn action_color(action: SyncAction) -> comfy_table::Color {
    match action {
        SyncAction::Create => comfy_table::Color::Green,
        SyncAction::Update => comfy_table::Color::Blue,
        SyncAction::Skip => comfy_table::Color::DarkGrey,
        SyncAction::Conflict => comfy_table::Color::Yellow,
    }
}
