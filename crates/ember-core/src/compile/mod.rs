//! Compilation of the generated evaluation program.
//!
//! The generated program is TypeScript-flavoured JavaScript with ESM import
//! statements hoisted to the top. The compiler turns it into plain script code
//! the engine can run, and produces a source map from compiled positions back
//! to generated positions.
//!
//! - **`SwcCompiler`** - Parses with swc, lowers imports to `require`, strips
//!   types, injects own-cell locals into capture closures and instruments
//!   `await` expressions so continuations stay attributed to their cell.

mod swc;
pub(crate) mod transforms;

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub use swc::SwcCompiler;

use crate::sourcemap::SourceMap;
use crate::translate::ErrorSource;

/// Synthetic file name of the program while it is being compiled.
pub const IN_MEMORY_FILE_NAME: &str = "in-memory-file.ts";

/// A location in a file, as reported by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocation {
    pub file_name: String,
    /// 1-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

/// A problem found while preparing the notebook for evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub location: Option<FileLocation>,
    pub source: ErrorSource,
}

impl Diagnostic {
    /// A compiler diagnostic.
    pub fn compiler(message: impl Into<String>, location: Option<FileLocation>) -> Self {
        Self {
            message: message.into(),
            location,
            source: ErrorSource::Compiler,
        }
    }
}

/// Output of a compiler.
#[derive(Debug, Clone, Default)]
pub struct CompiledCode {
    /// Compiled text, `None` if compilation failed.
    pub text: Option<String>,
    /// Map from compiled positions to positions in the input program.
    pub source_map: Option<SourceMap>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Turns generated program text into code the engine can run.
pub trait Compiler {
    /// Compile `code`. `project_path` is the directory the notebook runs in.
    ///
    /// Never fails outright: problems are reported as diagnostics and a
    /// `None` text.
    fn compile(&self, code: &str, project_path: &Path) -> CompiledCode;
}

static LINE_COLUMN_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(.*)\(\d*:\d*\)").expect("valid location pattern"));

/// Clean a raw compiler error for display.
///
/// Keeps the lines before the first empty line (dropping any code frame) and
/// removes the `(line:column)` suffix.
pub fn clean_error_message(raw: &str) -> String {
    let message = raw
        .split('\n')
        .take_while(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    match LINE_COLUMN_SUFFIX.captures(&message).and_then(|caps| caps.get(1)) {
        Some(prefix) => prefix.as_str().to_string(),
        None => message,
    }
}
