//! Generation of the single evaluation program for a notebook.
//!
//! Every code cell is wrapped in an `__cell` callback and nested inside the
//! previous cell's callback, so each cell's top-level bindings are in lexical
//! scope for the cells after it:
//!
//! ```text
//! const wrapperFn = (async function () {
//! __cell(0, "a", async () => {
//! <cell a>
//! __capture_locals(0, "a", () => ({}));
//! __cell(1, "b", async () => {
//! <cell b>
//! __capture_locals(1, "b", () => ({x, y}));
//! __end();
//! });
//! });
//!
//! })
//! ```
//!
//! Import statements are hoisted above the prologue because they are only
//! legal at module top level.

mod imports;
mod locals;

use std::path::Path;

pub use imports::{
    find_module_specifiers, find_required_packages, is_module_import_statement, package_name,
};
pub use locals::find_declared_locals;

use crate::compile::{Compiler, Diagnostic};
use crate::notebook::Cell;
use crate::error::{Error, Result};
use crate::sourcemap::{self, CELL_SOURCE_PREFIX, SourceMap, SourceMapBuilder};

/// Line ending used throughout generated code.
pub const LINE_ENDING: &str = "\r\n";

/// Prologue of the evaluation program.
pub const EVAL_PRE_CODE: &str = "const wrapperFn = (async function () {\r\n";

/// Epilogue of the evaluation program.
pub const EVAL_POST_CODE: &str = "\r\n})";

/// Prologue of an exported script: a `display` shim and the `main` wrapper.
pub const EXPORT_PRE_CODE: &str = "function display() {\r\n     for (const arg of arguments) {\r\n          console.log(arg);\r\n     }\r\n}\r\n\r\nasync function main() {\r\n";

/// Epilogue of an exported script.
pub const EXPORT_POST_CODE: &str = "\r\n}\r\n\r\nmain()\r\n    .then(() => console.log(\"Done\"))\r\n    .catch(err => console.error(err && err.stack || err));\r\n";

/// Opening of the outer wrapper applied after compilation. The parameters
/// are the names injected by the evaluator.
pub const GLOBAL_PRE_CODE: &str = "(async function (require, __filename, __dirname, display, __cell, __end, __capture_locals, __auto_display) { ";

/// Closing of the outer wrapper.
pub const GLOBAL_POST_CODE: &str = " await wrapperFn(); })";

/// Output of code generation.
#[derive(Debug, Clone, Default)]
pub struct GeneratedCode {
    /// Program text, `None` if generation or compilation failed.
    pub text: Option<String>,
    /// Source map chain, each map translating positions of the next stage
    /// back to the previous one. The first map resolves to cells.
    pub source_maps: Vec<SourceMap>,
    pub diagnostics: Vec<Diagnostic>,
}

impl GeneratedCode {
    /// The map from generated program positions to cells.
    pub fn original_source_map(&self) -> Option<&SourceMap> {
        self.source_maps.first()
    }

    /// The whole chain merged into one map from final positions to cells.
    pub fn final_source_map(&self) -> Option<SourceMap> {
        let (first, rest) = self.source_maps.split_first()?;
        Some(
            rest.iter()
                .fold(first.clone(), |merged, next| sourcemap::merge(&merged, next)),
        )
    }

    /// The program text, or a compilation error carrying the diagnostics.
    pub fn program(&self) -> Result<&str> {
        match &self.text {
            Some(text) => Ok(text),
            None => {
                let messages: Vec<&str> = self
                    .diagnostics
                    .iter()
                    .map(|diagnostic| diagnostic.message.as_str())
                    .collect();
                Err(Error::Compilation(if messages.is_empty() {
                    "no program was generated".to_string()
                } else {
                    messages.join("; ")
                }))
            }
        }
    }
}

/// Generates evaluation and export programs from notebook cells.
pub struct CodeGenerator;

impl CodeGenerator {
    /// Generate the program text for the code cells of `cells`.
    ///
    /// Markdown cells are skipped. With `for_export` the cells are emitted
    /// flat inside a standalone `main` function and none of the evaluator
    /// hooks are called.
    pub fn generate(cells: &[Cell], for_export: bool) -> GeneratedCode {
        let code_cells: Vec<&Cell> = cells.iter().filter(|cell| cell.is_code()).collect();

        let mut hoisted: Vec<String> = Vec::new();
        let bodies: Vec<Vec<&str>> = code_cells
            .iter()
            .map(|cell| Self::split_body(cell.source(), &mut hoisted))
            .collect();

        let mut text = String::new();
        if !hoisted.is_empty() {
            text.push_str(&hoisted.join(LINE_ENDING));
            text.push_str(LINE_ENDING);
        }
        text.push_str(if for_export {
            EXPORT_PRE_CODE
        } else {
            EVAL_PRE_CODE
        });

        let mut builder = SourceMapBuilder::new(None);
        let mut prior_locals: Vec<String> = Vec::new();

        for (index, (cell, body)) in code_cells.iter().zip(&bodies).enumerate() {
            let id = Self::quote(cell.id());
            if !for_export {
                text.push_str(&format!("__cell({}, {}, async () => {{{}", index, id, LINE_ENDING));
            }

            let cell_start_line = text.matches('\n').count() as u32;
            sourcemap::add_lines(
                &mut builder,
                &format!("{}{}", CELL_SOURCE_PREFIX, cell.id()),
                cell.source(),
                cell_start_line,
                0,
            );

            text.push_str(&body.join(LINE_ENDING));
            text.push_str(LINE_ENDING);

            if !for_export {
                text.push_str(&format!(
                    "__capture_locals({}, {}, () => ({{{}}}));{}",
                    index,
                    id,
                    prior_locals.join(", "),
                    LINE_ENDING
                ));
            }

            for name in find_declared_locals(&body.join("\n")) {
                locals::push_unique(&mut prior_locals, &name);
            }
        }

        if for_export {
            text.push_str(EXPORT_POST_CODE);
        } else {
            text.push_str("__end();");
            text.push_str(LINE_ENDING);
            for _ in &code_cells {
                text.push_str("});");
                text.push_str(LINE_ENDING);
            }
            text.push_str(EVAL_POST_CODE);
        }

        tracing::debug!(
            "Generated {} bytes for {} code cells ({} hoisted imports)",
            text.len(),
            code_cells.len(),
            hoisted.len()
        );

        GeneratedCode {
            text: Some(text),
            source_maps: vec![builder.into_sourcemap()],
            diagnostics: Vec::new(),
        }
    }

    /// Generate the evaluation program and compile it.
    ///
    /// On success the compiled text is wrapped in the outer function that
    /// receives the injected names, and the compiler's map is appended to the
    /// chain. Compiler diagnostics are passed through.
    pub fn gen_code(cells: &[Cell], compiler: &dyn Compiler, project_path: &Path) -> GeneratedCode {
        let mut generated = Self::generate(cells, false);
        let Some(text) = generated.text.take() else {
            return generated;
        };

        let compiled = compiler.compile(&text, project_path);
        generated.diagnostics.extend(compiled.diagnostics);
        if let Some(map) = compiled.source_map {
            generated.source_maps.push(map);
        }
        generated.text = compiled
            .text
            .map(|code| format!("{}{}{}", GLOBAL_PRE_CODE, code, GLOBAL_POST_CODE));
        generated
    }

    /// Standalone script for running the notebook outside the evaluator.
    pub fn export_code(cells: &[Cell]) -> String {
        Self::generate(cells, true).text.unwrap_or_default()
    }

    /// Trim each line and move import lines to `hoisted`, leaving an empty
    /// line in their place so line numbers are preserved.
    fn split_body<'a>(source: &'a str, hoisted: &mut Vec<String>) -> Vec<&'a str> {
        source
            .split('\n')
            .map(str::trim_end)
            .map(|line| {
                if is_module_import_statement(line) {
                    hoisted.push(line.to_string());
                    ""
                } else {
                    line
                }
            })
            .collect()
    }

    /// Double-quoted string literal for a cell id.
    fn quote(id: &str) -> String {
        serde_json::Value::String(id.to_string()).to_string()
    }
}
