//! Terminal styles for notebook evaluation events.

use std::io::{self, Write};

pub const RESET: &str = "\x1b[0m";

/// Command banners and section titles.
pub const HEADER: &str = "\x1b[1m";
/// Elapsed times.
pub const TIMING: &str = "\x1b[2m";
/// A cell starting to run.
pub const CELL_STARTED: &str = "\x1b[36m";
/// A cell and its pending work finishing, and successful commands.
pub const CELL_ENDED: &str = "\x1b[32m";
/// Values passed to `display()`. Console text keeps the terminal default.
pub const DISPLAY: &str = "\x1b[34m";
/// Standard error writes, runtime errors and compile diagnostics.
pub const ERROR: &str = "\x1b[31m";
/// Output cap notices and empty notebooks.
pub const NOTICE: &str = "\x1b[33m";

/// Wrap `text` in `style`.
pub fn paint(style: &str, text: impl std::fmt::Display) -> String {
    format!("{}{}{}", style, text, RESET)
}

/// Style of a display event by its rendering hint.
pub fn display_style(display_type: Option<&str>) -> Option<&'static str> {
    match display_type {
        Some("text") => None,
        _ => Some(DISPLAY),
    }
}

/// Flush stdout so streamed cell output shows up immediately.
#[inline]
pub fn flush_stdout() {
    io::stdout().flush().ok();
}
