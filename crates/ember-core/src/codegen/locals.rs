//! Static discovery of the top-level variables a cell declares.

use swc_common::{FileName, GLOBALS, SourceMap, sync::Lrc};
use swc_ecma_ast::{BlockStmtOrExpr, Decl, EsVersion, Expr, Ident, ModuleItem, Stmt};
use swc_ecma_parser::{Parser, StringInput, Syntax, TsSyntax, lexer::Lexer};

use crate::compile::transforms::collect_binding_idents;

/// Names bound by the top-level `var`, `let` and `const` statements of a cell
/// body, in declaration order.
///
/// The body is parsed the way it runs, inside an async arrow function, so
/// `await` and `return` are accepted. Declarations nested in functions or
/// blocks are not reported, nor is text inside strings and comments. A body
/// that does not parse declares nothing; the compiler reports the error.
pub fn find_declared_locals(body: &str) -> Vec<String> {
    let Some(stmts) = GLOBALS.set(&Default::default(), || parse_cell_body(body)) else {
        return Vec::new();
    };

    let mut idents: Vec<Ident> = Vec::new();
    for stmt in &stmts {
        if let Stmt::Decl(Decl::Var(var)) = stmt {
            for declarator in &var.decls {
                collect_binding_idents(&declarator.name, &mut idents);
            }
        }
    }

    let mut names = Vec::new();
    for ident in idents {
        push_unique(&mut names, &ident.sym);
    }
    names
}

/// Parse `body` as the block of an async arrow function.
fn parse_cell_body(body: &str) -> Option<Vec<Stmt>> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Anon),
        format!("(async () => {{\n{}\n}});", body),
    );

    let syntax = Syntax::Typescript(TsSyntax {
        tsx: false,
        decorators: true,
        ..Default::default()
    });
    let lexer = Lexer::new(syntax, EsVersion::Es2022, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);
    let module = match parser.parse_module() {
        Ok(module) => module,
        Err(err) => {
            tracing::debug!("Could not scan cell locals: {}", err.kind().msg());
            return None;
        }
    };

    let ModuleItem::Stmt(Stmt::Expr(stmt)) = module.body.into_iter().next()? else {
        return None;
    };
    let Expr::Paren(paren) = *stmt.expr else {
        return None;
    };
    let Expr::Arrow(arrow) = *paren.expr else {
        return None;
    };
    match *arrow.body {
        BlockStmtOrExpr::BlockStmt(block) => Some(block.stmts),
        BlockStmtOrExpr::Expr(_) => None,
    }
}

/// Append `name` unless it is already present.
pub(crate) fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|existing| existing == name) {
        names.push(name.to_string());
    }
}
