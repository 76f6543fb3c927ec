//! Notebook document model.
//!
//! Plain data holders for the serialized notebook format. Only the fields the
//! evaluation engine consumes are modelled; unknown fields (outputs, errors,
//! editor state) are ignored on load.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Type of cell in the notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// Executable JavaScript or TypeScript.
    Code,
    /// Documentation, never evaluated.
    Markdown,
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    /// Stable identity of the cell across a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub cell_type: CellType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Cell {
    /// Create a code cell with the given id and source.
    pub fn code(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            instance_id: Some(id.into()),
            cell_type: CellType::Code,
            code: Some(code.into()),
        }
    }

    /// Create a markdown cell with the given id and text.
    pub fn markdown(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            instance_id: Some(id.into()),
            cell_type: CellType::Markdown,
            code: Some(text.into()),
        }
    }

    /// The cell id, or an empty string for cells that were never assigned one.
    pub fn id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or_default()
    }

    /// The cell source text.
    pub fn source(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }
}

/// A notebook document: an ordered list of cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

fn default_version() -> u32 {
    1
}

fn default_language() -> String {
    "javascript".to_string()
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Notebook {
    /// Create a notebook from cells, assigning ids to any cell without one.
    pub fn new(cells: Vec<Cell>) -> Self {
        let mut notebook = Self {
            version: default_version(),
            language: default_language(),
            cells,
        };
        notebook.ensure_cell_ids();
        notebook
    }

    /// Parse a notebook from its JSON serialization.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut notebook: Notebook =
            serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))?;
        notebook.ensure_cell_ids();
        Ok(notebook)
    }

    /// Load a notebook from a `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the notebook to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Code cells in document order.
    pub fn code_cells(&self) -> Vec<&Cell> {
        self.cells.iter().filter(|cell| cell.is_code()).collect()
    }

    /// Give every cell without an id a fresh UUID.
    fn ensure_cell_ids(&mut self) {
        for cell in &mut self.cells {
            if cell.instance_id.as_deref().is_none_or(str::is_empty) {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::debug!("Assigned id {} to cell without an instance id", id);
                cell.instance_id = Some(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serialized_notebook() {
        let json = r##"{
            "version": 3,
            "language": "javascript",
            "cells": [
                {
                    "instanceId": "e9fe6a22-76df-11e9-b6bb-81a2f4ed2364",
                    "cellType": "code",
                    "cellScope": "global",
                    "code": "console.log(\"Hello JavaScript!\");",
                    "output": [],
                    "errors": []
                },
                {
                    "instanceId": "md-1",
                    "cellType": "markdown",
                    "code": "# Title"
                }
            ]
        }"##;

        let notebook = Notebook::from_json(json).unwrap();
        assert_eq!(notebook.version, 3);
        assert_eq!(notebook.cells.len(), 2);
        assert_eq!(notebook.cells[0].id(), "e9fe6a22-76df-11e9-b6bb-81a2f4ed2364");
        assert_eq!(notebook.cells[1].cell_type, CellType::Markdown);

        let code_cells = notebook.code_cells();
        assert_eq!(code_cells.len(), 1);
        assert_eq!(code_cells[0].source(), "console.log(\"Hello JavaScript!\");");
    }

    #[test]
    fn test_missing_ids_are_assigned() {
        let json = r#"{ "cells": [ { "cellType": "code", "code": "1" } ] }"#;
        let notebook = Notebook::from_json(json).unwrap();
        assert_eq!(notebook.language, "javascript");
        let id = notebook.cells[0].id();
        assert!(uuid::Uuid::parse_str(id).is_ok(), "not a uuid: {}", id);
    }

    #[test]
    fn test_missing_code_is_empty() {
        let json = r#"{ "cells": [ { "instanceId": "a", "cellType": "code" } ] }"#;
        let notebook = Notebook::from_json(json).unwrap();
        assert_eq!(notebook.cells[0].source(), "");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = Notebook::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_round_trip_keeps_camel_case() {
        let notebook = Notebook::new(vec![Cell::code("c1", "let x = 1;")]);
        let json = notebook.to_json().unwrap();
        assert!(json.contains("\"instanceId\": \"c1\""));
        assert!(json.contains("\"cellType\": \"code\""));
    }
}
