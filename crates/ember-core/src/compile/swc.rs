//! swc based compiler.

use std::path::Path;

use swc_common::source_map::DefaultSourceMapGenConfig;
use swc_common::{FileName, GLOBALS, Mark, SourceMap as SwcSourceMap, Spanned, sync::Lrc};
use swc_ecma_ast::{EsVersion, Pass, Program};
use swc_ecma_codegen::{Config, Emitter, text_writer::JsWriter};
use swc_ecma_parser::{Parser, StringInput, Syntax, TsSyntax, lexer::Lexer};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::VisitMutWith;

use super::transforms::{AwaitInstrumentation, CaptureLocals, ImportLowering};
use super::{
    CompiledCode, Compiler, Diagnostic, FileLocation, IN_MEMORY_FILE_NAME, clean_error_message,
};

/// Compiles generated programs with swc.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwcCompiler;

impl SwcCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for SwcCompiler {
    fn compile(&self, code: &str, project_path: &Path) -> CompiledCode {
        GLOBALS.set(&Default::default(), || compile_inner(code, project_path))
    }
}

fn compile_inner(code: &str, project_path: &Path) -> CompiledCode {
    let cm: Lrc<SwcSourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(IN_MEMORY_FILE_NAME.into())),
        code.to_string(),
    );

    let syntax = Syntax::Typescript(TsSyntax {
        tsx: false,
        decorators: true,
        ..Default::default()
    });
    let lexer = Lexer::new(syntax, EsVersion::Es2022, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let module = match parser.parse_module() {
        Ok(module) => match parser.take_errors().into_iter().next() {
            None => module,
            Some(err) => return parse_failure(&cm, &err, project_path),
        },
        Err(err) => return parse_failure(&cm, &err, project_path),
    };

    let mut program = Program::Module(module);
    program.visit_mut_with(&mut ImportLowering);

    let unresolved_mark = Mark::new();
    let top_level_mark = Mark::new();
    let mut pass = strip(unresolved_mark, top_level_mark);
    pass.process(&mut program);

    program.visit_mut_with(&mut CaptureLocals);
    program.visit_mut_with(&mut AwaitInstrumentation);

    let Program::Module(module) = program else {
        return failure("Expected a module".to_string(), None);
    };

    let mut buf = Vec::new();
    let mut srcmap = Vec::new();
    {
        let mut emitter = Emitter {
            cfg: Config::default(),
            cm: cm.clone(),
            comments: None,
            wr: JsWriter::new(cm.clone(), "\n", &mut buf, Some(&mut srcmap)),
        };
        if let Err(err) = emitter.emit_module(&module) {
            return failure(format!("Emit error: {}", err), None);
        }
    }

    let text = match String::from_utf8(buf) {
        Ok(text) => text,
        Err(err) => return failure(format!("UTF-8 error: {}", err), None),
    };

    // Synthesized nodes carry spans outside the input file.
    srcmap.retain(|(pos, _)| !pos.is_dummy() && *pos >= fm.start_pos && *pos <= fm.end_pos);
    let source_map = cm.build_source_map(&srcmap, None, DefaultSourceMapGenConfig);

    CompiledCode {
        text: Some(text),
        source_map: Some(source_map),
        diagnostics: Vec::new(),
    }
}

fn parse_failure(
    cm: &SwcSourceMap,
    err: &swc_ecma_parser::error::Error,
    project_path: &Path,
) -> CompiledCode {
    let location = cm.lookup_char_pos(err.span().lo);
    let line = location.line as u32;
    let column = location.col.0 as u32;
    let raw = format!(
        "{}: {} ({}:{})",
        project_path.join(IN_MEMORY_FILE_NAME).display(),
        err.kind().msg(),
        line,
        column
    );
    tracing::debug!("Compilation failed: {}", raw);

    failure(
        clean_error_message(&raw),
        Some(FileLocation {
            file_name: IN_MEMORY_FILE_NAME.to_string(),
            line,
            column,
        }),
    )
}

fn failure(message: String, location: Option<FileLocation>) -> CompiledCode {
    CompiledCode {
        text: None,
        source_map: None,
        diagnostics: vec![Diagnostic::compiler(message, location)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourceMapExt;

    fn compile(code: &str) -> CompiledCode {
        SwcCompiler::new().compile(code, Path::new("/tmp"))
    }

    fn compile_ok(code: &str) -> String {
        let compiled = compile(code);
        assert!(
            compiled.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            compiled.diagnostics
        );
        compiled.text.unwrap()
    }

    #[test]
    fn test_types_are_stripped() {
        let text = compile_ok("const x: number = 42;");
        assert!(text.contains("const x = 42"), "Got: {}", text);
        assert!(!text.contains(": number"), "Got: {}", text);
    }

    #[test]
    fn test_interfaces_are_removed() {
        let text = compile_ok("interface Point { x: number }\nconst p: Point = { x: 1 };");
        assert!(!text.contains("interface"), "Got: {}", text);
        assert!(text.contains("const p = {"), "Got: {}", text);
    }

    #[test]
    fn test_default_import_lowered() {
        let text = compile_ok("import moment from \"moment\";\nmoment();");
        assert!(
            text.contains("const moment = __import_default(require(\"moment\"));"),
            "Got: {}",
            text
        );
        assert!(!text.contains("import "), "Got: {}", text);
    }

    #[test]
    fn test_named_and_namespace_imports_lowered() {
        let text = compile_ok(
            "import * as fs from \"fs\";\nimport { join, resolve as res } from \"path\";\nfs.x(join, res);",
        );
        assert!(text.contains("const fs = require(\"fs\");"), "Got: {}", text);
        assert!(text.contains("const join = require(\"path\").join;"), "Got: {}", text);
        assert!(text.contains("const res = require(\"path\").resolve;"), "Got: {}", text);
    }

    #[test]
    fn test_bare_import_lowered() {
        let text = compile_ok("import \"reflect-metadata\";");
        assert!(text.contains("require(\"reflect-metadata\");"), "Got: {}", text);
    }

    #[test]
    fn test_type_only_import_dropped() {
        let text = compile_ok("import type { Foo } from \"foo\";\nconst x = 1;");
        assert!(!text.contains("foo"), "Got: {}", text);
    }

    #[test]
    fn test_own_cell_locals_are_captured() {
        let code = r#"const wrapperFn = (async function () {
__cell(0, "a", async () => {
const x = 1;
let { y, z: w } = { y: 2, z: 3 };
if (x) {
    var nested = 4;
}
__capture_locals(0, "a", () => ({}));
__end();
});
})"#;
        let text = compile_ok(code);
        let start = text.find("__capture_locals").unwrap();
        let end = start + text[start..].find("__end").unwrap();
        let capture = &text[start..end];
        assert!(capture.contains("x"), "Got: {}", capture);
        assert!(capture.contains("y"), "Got: {}", capture);
        assert!(capture.contains("w"), "Got: {}", capture);
        assert!(!capture.contains("nested"), "Got: {}", capture);
    }

    #[test]
    fn test_prior_locals_are_not_duplicated() {
        let code = r#"async () => {
let x = 1;
__capture_locals(1, "b", () => ({x}));
};"#;
        let text = compile_ok(code);
        let start = text.find("__capture_locals").unwrap();
        let capture = &text[start..];
        assert_eq!(capture.matches('x').count(), 1, "Got: {}", capture);
    }

    #[test]
    fn test_await_is_instrumented() {
        let text = compile_ok("async function f() { const v = await g(); }");
        assert!(text.contains("await __track_await(g())"), "Got: {}", text);
    }

    #[test]
    fn test_syntax_error_diagnostic() {
        let compiled = compile("const x = 1;\nlet = ;");
        assert!(compiled.text.is_none());
        assert_eq!(compiled.diagnostics.len(), 1);

        let diagnostic = &compiled.diagnostics[0];
        assert!(diagnostic.message.contains(IN_MEMORY_FILE_NAME), "Got: {}", diagnostic.message);
        assert!(!diagnostic.message.contains("(2:"), "Got: {}", diagnostic.message);
        let location = diagnostic.location.as_ref().unwrap();
        assert_eq!(location.file_name, IN_MEMORY_FILE_NAME);
        assert_eq!(location.line, 2);
    }

    #[test]
    fn test_source_map_points_back_to_input_lines() {
        let compiled = compile("\n\nconst answer: number = 42;");
        let map = compiled.source_map.unwrap();
        let text = compiled.text.unwrap();

        let line = text
            .lines()
            .position(|line| line.contains("answer"))
            .unwrap() as u32
            + 1;
        let location = map.locate(line, 1000).unwrap();
        assert_eq!(location.source, IN_MEMORY_FILE_NAME);
        assert_eq!(location.line, 3);
    }
}
