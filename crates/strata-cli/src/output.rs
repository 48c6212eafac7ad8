//! Formatted output helpers for CLI commands.
//!
//! Provides colored state markers, column padding, and human-readable
//! durations.

use strata_common::types::NodeState;

/// Bold text.
pub const BOLD: &str = "\x1b[1m";
/// Dimmed text.
pub const DIM: &str = "\x1b[2m";
/// Red foreground.
pub const RED: &str = "\x1b[31m";
/// Green foreground.
pub const GREEN: &str = "\x1b[32m";
/// Yellow foreground.
pub const YELLOW: &str = "\x1b[33m";
/// Cyan foreground.
pub const CYAN: &str = "\x1b[36m";
/// Resets every attribute.
pub const RESET: &str = "\x1b[0m";

/// Colored bullet for a node state.
#[must_use]
pub fn state_marker(state: NodeState) -> String {
    let color = match state {
        NodeState::Done => GREEN,
        NodeState::Failed => RED,
        NodeState::Skipped | NodeState::Cancelled => YELLOW,
        NodeState::NotStarted | NodeState::Running => DIM,
    };
    format!("{color}\u{25cf}{RESET}")
}

/// Formats a millisecond count as `350ms`, `4.2s`, or `2m 05s`.
#[must_use]
pub fn format_millis(millis: i64) -> String {
    let millis = millis.max(0);
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{}.{}s", millis / 1_000, (millis % 1_000) / 100)
    } else {
        let secs = millis / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Width of the longest name, for aligning a column.
#[must_use]
pub fn column_width<'a>(names: impl IntoIterator<Item = &'a str>) -> usize {
    names.into_iter().map(str::len).max().unwrap_or(0)
}
