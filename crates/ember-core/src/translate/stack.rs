//! Stack trace parsing.
//!
//! Understands the V8 and QuickJS frame formats:
//!
//! ```text
//!     at fulfilled (C:\projects\build\evaluator.js:4:58)
//!     at deep stack error.notebook:17:5
//!     at <anonymous>
//! ```

/// Marker that starts every frame line.
const FRAME_MARKER: &str = "at ";

/// Sentinel for frames without a location.
const ANONYMOUS: &str = "<anonymous>";

/// File path given to frames that have no location.
pub const SYSTEM_FRAME_PATH: &str = "<system>";

/// One frame of a stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFrame {
    pub function_name: Option<String>,
    pub file_path: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl StackFrame {
    fn system() -> Self {
        Self {
            file_path: SYSTEM_FRAME_PATH.to_string(),
            ..Default::default()
        }
    }
}

/// Parse a `file:line:column` locator.
///
/// The rightmost numeric components are taken as line and column; everything
/// before them is the file path, so drive letters and other colons in the
/// path are preserved.
pub fn parse_file_locator(locator: &str) -> StackFrame {
    let mut parts: Vec<&str> = locator.trim().split(':').map(str::trim).collect();

    let mut numbers: Vec<u32> = Vec::new();
    while parts.len() > 1 && numbers.len() < 2 {
        match parts.last().and_then(|part| part.parse::<u32>().ok()) {
            Some(number) => {
                numbers.push(number);
                parts.pop();
            }
            None => break,
        }
    }

    let (line, column) = match numbers.as_slice() {
        [column, line] => (Some(*line), Some(*column)),
        [line] => (Some(*line), None),
        _ => (None, None),
    };

    StackFrame {
        function_name: None,
        file_path: parts.join(":"),
        line,
        column,
    }
}

/// Parse a single frame line, with the marker already removed.
fn parse_frame(frame: &str) -> StackFrame {
    let frame = frame.trim();
    if frame == ANONYMOUS {
        return StackFrame::system();
    }

    let Some(open) = frame.find('(') else {
        return parse_file_locator(frame);
    };
    let Some(close) = frame[open + 1..].rfind(')').map(|offset| open + 1 + offset) else {
        return parse_file_locator(frame);
    };

    let locator = frame[open + 1..close].trim();
    if locator == ANONYMOUS {
        return StackFrame::system();
    }

    let mut parsed = parse_file_locator(locator);
    parsed.function_name = Some(frame[..open].trim().to_string());
    parsed
}

/// Parse a multi-line stack trace into frames.
///
/// Lines that do not start with the frame marker (messages, code excerpts)
/// are skipped.
pub fn parse_stack_trace(stack: &str) -> Vec<StackFrame> {
    stack
        .split('\n')
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(FRAME_MARKER))
        .map(parse_frame)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(function: Option<&str>, path: &str, line: Option<u32>, column: Option<u32>) -> StackFrame {
        StackFrame {
            function_name: function.map(str::to_string),
            file_path: path.to_string(),
            line,
            column,
        }
    }

    // =========================================================================
    // File locators
    // =========================================================================

    #[test]
    fn test_empty_locator() {
        assert_eq!(parse_file_locator(""), frame(None, "", None, None));
        assert_eq!(parse_file_locator("   "), frame(None, "", None, None));
    }

    #[test]
    fn test_basic_locator() {
        assert_eq!(parse_file_locator("my-file:1:2"), frame(None, "my-file", Some(1), Some(2)));
        assert_eq!(parse_file_locator(" my-file : 1 : 2 "), frame(None, "my-file", Some(1), Some(2)));
    }

    #[test]
    fn test_locator_without_column() {
        assert_eq!(parse_file_locator("my-file:1"), frame(None, "my-file", Some(1), None));
        assert_eq!(parse_file_locator("my-file"), frame(None, "my-file", None, None));
    }

    #[test]
    fn test_locator_with_colons_in_path() {
        assert_eq!(parse_file_locator("my:file:1:2"), frame(None, "my:file", Some(1), Some(2)));
        assert_eq!(
            parse_file_locator("C:\\projects\\src\\server.ts:363:15"),
            frame(None, "C:\\projects\\src\\server.ts", Some(363), Some(15))
        );
        assert_eq!(
            parse_file_locator("C:\\projects\\server.ts"),
            frame(None, "C:\\projects\\server.ts", None, None)
        );
    }

    // =========================================================================
    // Stack traces
    // =========================================================================

    #[test]
    fn test_non_frame_lines_are_ignored() {
        assert!(parse_stack_trace("").is_empty());
        assert!(parse_stack_trace("not a valid line").is_empty());
    }

    #[test]
    fn test_anonymous_frames() {
        let frames = parse_stack_trace("at <anonymous>\n at <anonymous>\nat foo (<anonymous>)");
        assert_eq!(frames, vec![StackFrame::system(); 3]);
    }

    #[test]
    fn test_frame_with_just_a_file() {
        assert_eq!(
            parse_stack_trace("    at deep stack error.notebook:17:5"),
            vec![frame(None, "deep stack error.notebook", Some(17), Some(5))]
        );
    }

    #[test]
    fn test_frame_with_function_and_windows_path() {
        let line = "at fulfilled (C:\\projects\\notebook\\ts-build\\evaluator-server.js:4:58)";
        assert_eq!(
            parse_stack_trace(line),
            vec![frame(
                Some("fulfilled"),
                "C:\\projects\\notebook\\ts-build\\evaluator-server.js",
                Some(4),
                Some(58)
            )]
        );
    }

    #[test]
    fn test_engine_stack() {
        let stack = "    at boom (eval_script:5:11)\n    at <anonymous> (eval_script:9)\n    at __cell (ember_prelude.js:61:21)\n    at forEach (native)\n";
        assert_eq!(
            parse_stack_trace(stack),
            vec![
                frame(Some("boom"), "eval_script", Some(5), Some(11)),
                frame(Some("<anonymous>"), "eval_script", Some(9), None),
                frame(Some("__cell"), "ember_prelude.js", Some(61), Some(21)),
                frame(Some("forEach"), "native", None, None),
            ]
        );
    }
}
