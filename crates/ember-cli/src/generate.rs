//! Generate command implementation for Ember CLI.
//!
//! Prints the program the evaluator would run, after compilation, and
//! optionally its source map back to the cells.

use std::fs;

use ember_core::{CodeGenerator, SourceMap, SwcCompiler};

use crate::colors;

/// Generate the evaluation program for a notebook.
pub fn execute(notebook_path: &str, output_path: Option<&str>, map: bool) -> anyhow::Result<()> {
    let (path, notebook) = crate::load_notebook(notebook_path)?;
    let project_path = crate::notebook_dir(&path);
    let code_cells: Vec<_> = notebook.code_cells().into_iter().cloned().collect();

    let generated = CodeGenerator::gen_code(&code_cells, &SwcCompiler::new(), &project_path);

    for diagnostic in &generated.diagnostics {
        let location = diagnostic
            .location
            .as_ref()
            .map(|loc| format!(" ({}:{})", loc.file_name, loc.line))
            .unwrap_or_default();
        eprintln!(
            "{}{}: {}",
            colors::paint(colors::ERROR, "error"),
            location,
            diagnostic.message
        );
    }

    let text = generated.program()?;
    let name = crate::notebook_name(&path);

    match output_path {
        Some(output) => {
            fs::write(output, text)?;
            if map {
                if let Some(source_map) = generated.final_source_map() {
                    let map_path = format!("{}.map", output);
                    fs::write(&map_path, map_json(source_map, &name)?)?;
                    eprintln!("Wrote source map to {}", map_path);
                }
            }
            eprintln!("{} {}", colors::paint(colors::CELL_ENDED, "Generated"), output);
        }
        None => {
            println!("{}", text);
            if map {
                if let Some(source_map) = generated.final_source_map() {
                    println!("{}", map_json(source_map, &name)?);
                }
            }
        }
    }

    Ok(())
}

/// Version 3 JSON for the map from the program back to the notebook's cells.
fn map_json(mut source_map: SourceMap, notebook_name: &str) -> anyhow::Result<String> {
    source_map.set_file(Some(notebook_name.to_string()));
    Ok(ember_core::sourcemap::to_json(&source_map)?)
}
