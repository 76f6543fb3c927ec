//! Translation of errors back to notebook cells.
//!
//! Errors are positioned against generated or compiled code. The translator
//! maps those positions through the source map chain to a cell and a line in
//! that cell, and formats a message that never shows host frames.

mod stack;

use std::fmt;
use std::path::Path;

use serde::Serialize;

pub use stack::{SYSTEM_FRAME_PATH, StackFrame, parse_file_locator, parse_stack_trace};

use crate::compile::{FileLocation, IN_MEMORY_FILE_NAME};
use crate::sourcemap::{SourceMap, SourceMapExt};

/// Name of the evaluation program as seen by the engine.
pub const ENGINE_SCRIPT_NAME: &str = "eval_script";

/// Message used when nothing better is known.
pub const FALLBACK_MESSAGE: &str = "An error occurred.";

/// Frames at which user code ends and evaluator plumbing begins.
const BOUNDARY_FRAMES: &[&str] = &["__cell", "__end", "__ember_run", "__ember_start"];

/// Function names shown as the cell itself.
const CELL_FRAME_NAMES: &[&str] = &["__sync", "wrapperFn", "<anonymous>"];

/// Stage of the pipeline an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorSource {
    #[serde(rename = "Module installation")]
    ModuleInstall,
    #[serde(rename = "Compiler")]
    Compiler,
    #[serde(rename = "Code setup")]
    CodeSetup,
    #[serde(rename = "Code evaluation")]
    CodeEvaluation,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSource::ModuleInstall => "Module installation",
            ErrorSource::Compiler => "Compiler",
            ErrorSource::CodeSetup => "Code setup",
            ErrorSource::CodeEvaluation => "Code evaluation",
        };
        f.write_str(name)
    }
}

/// The raw parts of an error, any of which may be missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawError<'a> {
    pub message: Option<&'a str>,
    /// Compiler reported location, against the generated program.
    pub location: Option<&'a FileLocation>,
    /// Runtime stack, against the compiled program.
    pub stack: Option<&'a str>,
}

/// An error formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedError {
    /// Message followed by the cell location or translated stack.
    pub display: String,
    /// Cell the error originated in, if known.
    pub cell_id: Option<String>,
    pub location: Option<String>,
    pub stack: Option<String>,
}

/// Maps error positions to cells for one evaluation run.
#[derive(Debug, Clone, Copy)]
pub struct LocationTranslator<'a> {
    file_name: &'a str,
    /// Generated program to cells.
    original_map: Option<&'a SourceMap>,
    /// Compiled program to cells.
    final_map: Option<&'a SourceMap>,
}

impl<'a> LocationTranslator<'a> {
    pub fn new(
        file_name: &'a str,
        original_map: Option<&'a SourceMap>,
        final_map: Option<&'a SourceMap>,
    ) -> Self {
        Self {
            file_name,
            original_map,
            final_map,
        }
    }

    /// Format an error for display and attribute it to a cell.
    ///
    /// The cell is taken from the stack if it resolves through the final map,
    /// then from the compiler location if that resolves through the original
    /// map, and otherwise defaults to `current_cell_id`.
    pub fn format_error(
        &self,
        source: ErrorSource,
        current_cell_id: Option<&str>,
        error: RawError<'_>,
    ) -> FormattedError {
        let mut message = error.message.map(strip_file_marker);
        let mut location = None;
        let mut stack = None;

        if let Some(file_location) = error.location {
            location = self.translate_frame(
                &StackFrame {
                    function_name: None,
                    file_path: file_location.file_name.clone(),
                    line: Some(file_location.line),
                    column: Some(file_location.column),
                },
                self.original_map,
            );
        }

        if let Some(raw_stack) = error.stack {
            if message.as_deref().is_none_or(str::is_empty) {
                let end = raw_stack.find("\n    at").unwrap_or(raw_stack.len());
                message = Some(raw_stack[..end].trim().to_string());
            }

            if location.is_none() && raw_stack.starts_with(&format!("{}:", self.file_name)) {
                let first_line = raw_stack.lines().next().unwrap_or_default().trim();
                location = self.translate_frame(&parse_file_locator(first_line), self.final_map);
            }

            stack = Some(self.translate_stack_trace(raw_stack));
        }

        let message = message
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());

        let mut display = message;
        if let Some(location) = location.as_deref() {
            display.push_str("\r\n");
            display.push_str(location);
        } else if let Some(stack) = stack.as_deref().filter(|stack| !stack.is_empty()) {
            display.push_str("\r\n");
            display.push_str(stack);
        }

        let mut cell_id = current_cell_id.map(str::to_string);
        if let (Some(raw_stack), Some(final_map)) = (error.stack, self.final_map) {
            if let Some(cell) = self.stack_cell(raw_stack, final_map) {
                cell_id = Some(cell);
            }
        }
        if let (Some(file_location), Some(original_map)) = (error.location, self.original_map) {
            if let Some(cell_line) = original_map.map_line(file_location.line, file_location.column) {
                cell_id = Some(cell_line.cell_id);
            }
        }

        let display_text = display.as_str();
        tracing::debug!(
            "Formatted {} error for cell {:?}: {}",
            source,
            cell_id,
            display_text
        );

        FormattedError {
            display,
            cell_id,
            location,
            stack,
        }
    }

    /// Translate a stack trace to cell frames.
    ///
    /// Only frames in the evaluated program are kept, and translation stops
    /// at the first evaluator boundary frame.
    pub fn translate_stack_trace(&self, stack: &str) -> String {
        let mut translated = Vec::new();
        for frame in parse_stack_trace(stack) {
            if is_boundary(&frame) {
                break;
            }
            if !self.is_program_file(&frame.file_path) {
                continue;
            }
            if let Some(line) = self.translate_frame(&frame, self.final_map) {
                translated.push(line);
            }
        }
        translated.join("\n")
    }

    /// Render a frame as `at <function>, line <n>` if it maps to a cell.
    pub fn translate_frame(&self, frame: &StackFrame, map: Option<&SourceMap>) -> Option<String> {
        let line = frame.line?;
        let cell_line = map?.map_line(line, frame.column.unwrap_or(0))?;
        Some(format!(
            "at {}, line {}",
            display_function_name(frame.function_name.as_deref()),
            cell_line.line
        ))
    }

    /// Cell of the first program frame of a stack.
    fn stack_cell(&self, stack: &str, final_map: &SourceMap) -> Option<String> {
        let frame = parse_stack_trace(stack)
            .into_iter()
            .find(|frame| frame.line.is_some() && self.is_program_file(&frame.file_path))?;
        let cell_line = final_map.map_line(frame.line?, frame.column.unwrap_or(0))?;
        Some(cell_line.cell_id)
    }

    fn is_program_file(&self, file_path: &str) -> bool {
        let base_name = Path::new(file_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(file_path);
        base_name == self.file_name
            || base_name == IN_MEMORY_FILE_NAME
            || base_name == "in-memory-file.js"
            || base_name == ENGINE_SCRIPT_NAME
    }
}

fn is_boundary(frame: &StackFrame) -> bool {
    frame
        .function_name
        .as_deref()
        .is_some_and(|name| BOUNDARY_FRAMES.contains(&name))
}

fn display_function_name(function_name: Option<&str>) -> &str {
    match function_name {
        None => "Code cell",
        Some(name) if name.is_empty() || CELL_FRAME_NAMES.contains(&name) => "Code cell",
        Some(name) => name,
    }
}

/// Remove everything up to and including the in-memory file name.
fn strip_file_marker(message: &str) -> String {
    match message.find(IN_MEMORY_FILE_NAME) {
        Some(index) => message[index + IN_MEMORY_FILE_NAME.len()..]
            .trim_start_matches(':')
            .trim()
            .to_string(),
        None => message.to_string(),
    }
}
