//! Position mapping between generated code and notebook cells.
//!
//! Maps are plain [`swc_sourcemap::SourceMap`]s. This module adds the lookups
//! the error translator needs on top of them and the merge of a map chain
//! into one map.
//!
//! The public helpers take 1-based lines and 0-based columns, matching the
//! positions engines print in stack traces. The underlying tokens are 0-based
//! in both coordinates.

use swc_sourcemap::Token;
pub use swc_sourcemap::{SourceMap, SourceMapBuilder};

use crate::error::Result;

/// Prefix of the synthetic source name given to each cell.
pub const CELL_SOURCE_PREFIX: &str = "cell-";

/// A location in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub source: String,
    /// 1-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

/// A line within a notebook cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellLine {
    pub cell_id: String,
    /// 1-based line within the cell.
    pub line: u32,
    pub column: u32,
}

/// Lookups with the fuzzy matching used for error positions.
pub trait SourceMapExt {
    /// Map a generated position to its source location.
    ///
    /// A position between two mappings resolves to the preceding one, except
    /// that a position before the first mapping of its line resolves to that
    /// mapping. Positions before the first mapping, or past the last mapping
    /// on a later line, resolve to nothing.
    fn locate(&self, line: u32, column: u32) -> Option<SourceLocation>;

    /// Map a generated position to a line in a notebook cell.
    ///
    /// Only sources named with the `cell-<id>` convention resolve.
    fn map_line(&self, line: u32, column: u32) -> Option<CellLine> {
        let location = self.locate(line, column)?;
        let cell_id = location.source.strip_prefix(CELL_SOURCE_PREFIX)?;
        Some(CellLine {
            cell_id: cell_id.to_string(),
            line: location.line,
            column: location.column,
        })
    }
}

impl SourceMapExt for SourceMap {
    fn locate(&self, line: u32, column: u32) -> Option<SourceLocation> {
        let token = find_token(self, line.checked_sub(1)?, column)?;
        Some(SourceLocation {
            source: token.get_source()?.to_string(),
            line: token.get_src_line() + 1,
            column: token.get_src_col(),
        })
    }
}

fn find_token(map: &SourceMap, line: u32, column: u32) -> Option<Token<'_>> {
    let lower = map.lookup_token(line, column);
    if let Some(token) = lower.filter(|token| token.get_dst_line() == line) {
        return Some(token);
    }

    // Nothing at or before the column on this line.
    let next = map.tokens().find(|token| token.get_dst_line() >= line)?;
    if next.get_dst_line() == line {
        Some(next)
    } else {
        lower
    }
}

/// Map each line of `code` to the same line of `source`.
///
/// `start_line` is the number of generated lines preceding the snippet:
/// generated line `start_line + k` maps to source line `k`, both 1-based.
pub fn add_lines(
    builder: &mut SourceMapBuilder,
    source: &str,
    code: &str,
    start_line: u32,
    column: u32,
) {
    let num_lines = code.matches('\n').count() as u32 + 1;
    for offset in 0..num_lines {
        builder.add(
            start_line + offset,
            column,
            offset,
            0,
            Some(source.to_string().into()),
            None,
            false,
        );
    }
}

/// Merge two maps into one.
///
/// `first` maps B to A and `second` maps C to B; the result maps C to A.
/// Tokens of `second` whose target has no location in `first` are dropped.
pub fn merge(first: &SourceMap, second: &SourceMap) -> SourceMap {
    let mut builder = SourceMapBuilder::new(None);
    for token in second.tokens() {
        let Some(location) = first.locate(token.get_src_line() + 1, token.get_src_col()) else {
            continue;
        };
        builder.add(
            token.get_dst_line(),
            token.get_dst_col(),
            location.line - 1,
            location.column,
            Some(location.source.into()),
            None,
            false,
        );
    }
    builder.into_sourcemap()
}

/// Serialize a map to version 3 JSON.
pub fn to_json(map: &SourceMap) -> Result<String> {
    let mut buf = Vec::new();
    map.to_writer(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_map() -> SourceMap {
        // Two cells: generated lines 3..=4 are cell "a", 7..=8 are cell "b".
        let mut builder = SourceMapBuilder::new(None);
        add_lines(&mut builder, "cell-a", "x\ny", 2, 0);
        add_lines(&mut builder, "cell-b", "z\nw", 6, 0);
        builder.into_sourcemap()
    }

    /// A map from 1-based `(generated, source)` line pairs of one source.
    fn line_map(source: &str, lines: &[((u32, u32), (u32, u32))]) -> SourceMap {
        let mut builder = SourceMapBuilder::new(None);
        for ((gen_line, gen_col), (src_line, src_col)) in lines {
            builder.add(
                gen_line - 1,
                *gen_col,
                src_line - 1,
                *src_col,
                Some(source.to_string().into()),
                None,
                false,
            );
        }
        builder.into_sourcemap()
    }

    #[test]
    fn test_add_lines_maps_each_line() {
        let map = cell_map();
        assert_eq!(map.get_token_count(), 4);
        assert_eq!(
            map.map_line(4, 0),
            Some(CellLine {
                cell_id: "a".to_string(),
                line: 2,
                column: 0
            })
        );
        assert_eq!(map.map_line(7, 0).map(|l| l.cell_id), Some("b".to_string()));
    }

    #[test]
    fn test_fuzzy_lookup_uses_preceding_mapping() {
        let map = cell_map();
        // Column past the only mapping on the line.
        assert_eq!(map.map_line(3, 25).map(|l| l.line), Some(1));
        // Line without a mapping falls back to the previous one.
        assert_eq!(map.map_line(5, 0).map(|l| (l.cell_id, l.line)), Some(("a".to_string(), 2)));
    }

    #[test]
    fn test_leading_column_uses_mapping_on_same_line() {
        let map = line_map("cell-a", &[((1, 0), (1, 0)), ((2, 4), (2, 0))]);
        assert_eq!(map.map_line(2, 1).map(|l| l.line), Some(2));
    }

    #[test]
    fn test_lookup_out_of_range() {
        let map = cell_map();
        assert_eq!(map.map_line(1, 0), None);
        assert_eq!(map.map_line(8, 4).map(|l| l.line), Some(2));
        assert_eq!(map.map_line(20, 0), None);
        assert_eq!(map.map_line(0, 0), None);
        assert_eq!(SourceMapBuilder::new(None).into_sourcemap().map_line(1, 0), None);
    }

    #[test]
    fn test_non_cell_sources_do_not_map_to_cells() {
        let map = line_map("in-memory-file.ts", &[((1, 0), (1, 0))]);
        assert!(map.locate(1, 0).is_some());
        assert_eq!(map.map_line(1, 0), None);
    }

    #[test]
    fn test_merge_chains_two_maps() {
        let original = cell_map();

        // Compiled line 10 came from generated line 8, compiled line 2 from
        // generated line 3, compiled line 1 from a line with no cell.
        let compiled = line_map(
            "in-memory-file.ts",
            &[((1, 0), (1, 4)), ((2, 8), (3, 4)), ((10, 0), (8, 4))],
        );

        let merged = merge(&original, &compiled);
        assert_eq!(merged.get_token_count(), 2);
        assert_eq!(
            merged.map_line(10, 3).map(|l| (l.cell_id, l.line)),
            Some(("b".to_string(), 2))
        );
        assert_eq!(
            merged.map_line(2, 9).map(|l| (l.cell_id, l.line)),
            Some(("a".to_string(), 1))
        );
    }

    #[test]
    fn test_json_keeps_lookups() {
        let map = cell_map();
        let json = to_json(&map).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(raw["version"], 3);
        assert_eq!(raw["sources"], serde_json::json!(["cell-a", "cell-b"]));

        let parsed = SourceMap::from_slice(json.as_bytes()).unwrap();
        assert_eq!(parsed.map_line(8, 0), map.map_line(8, 0));
    }

    #[test]
    fn test_decode_known_mappings() {
        let json = br#"{"version":3,"sources":["cell-2a0bc263"],"names":[],"mappings":";;;CAAA"}"#;
        let map = SourceMap::from_slice(json).unwrap();
        assert_eq!(
            map.map_line(4, 1),
            Some(CellLine {
                cell_id: "2a0bc263".to_string(),
                line: 1,
                column: 0
            })
        );
    }
}
