//! AST transforms applied by [`super::SwcCompiler`].

use std::mem;

use swc_common::DUMMY_SP;
use swc_ecma_ast::{
    AwaitExpr, BindingIdent, BlockStmtOrExpr, CallExpr, Callee, ComputedPropName, Decl, Expr,
    ExprOrSpread, ExprStmt, Ident, IdentName, ImportDecl, ImportSpecifier, MemberExpr, MemberProp,
    ModuleDecl, ModuleExportName, ModuleItem, ObjectLit, ObjectPatProp, Pat, Prop, PropName,
    PropOrSpread, Stmt, Str, VarDecl, VarDeclKind, VarDeclarator,
};
use swc_ecma_visit::{VisitMut, VisitMutWith};

/// Injected function that captures a cell's locals.
pub const CAPTURE_LOCALS_FN: &str = "__capture_locals";

/// Prelude function wrapping awaited values so the continuation is tracked.
pub const TRACK_AWAIT_FN: &str = "__track_await";

/// Prelude function giving the default export of a CommonJS module.
pub const IMPORT_DEFAULT_FN: &str = "__import_default";

/// Lowers ESM import declarations to `require` calls.
///
/// ```text
/// import x from "m";          const x = __import_default(require("m"));
/// import * as ns from "m";    const ns = require("m");
/// import { a, b as c } from "m";
///                             const a = require("m").a;
///                             const c = require("m").b;
/// import "m";                 require("m");
/// ```
///
/// Type-only imports are dropped.
pub struct ImportLowering;

impl VisitMut for ImportLowering {
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        let original = mem::take(items);
        for item in original {
            match item {
                ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
                    items.extend(Self::lower(import).into_iter().map(ModuleItem::Stmt));
                }
                other => items.push(other),
            }
        }
    }
}

impl ImportLowering {
    fn lower(import: ImportDecl) -> Vec<Stmt> {
        if import.type_only {
            return Vec::new();
        }

        let span = import.span;
        if import.specifiers.is_empty() {
            return vec![Stmt::Expr(ExprStmt {
                span,
                expr: Box::new(require_call(&import.src)),
            })];
        }

        import
            .specifiers
            .into_iter()
            .filter_map(|specifier| {
                let (local, init) = match specifier {
                    ImportSpecifier::Default(default) => (
                        default.local,
                        call(IMPORT_DEFAULT_FN, vec![require_call(&import.src)]),
                    ),
                    ImportSpecifier::Namespace(namespace) => {
                        (namespace.local, require_call(&import.src))
                    }
                    ImportSpecifier::Named(named) => {
                        if named.is_type_only {
                            return None;
                        }
                        let prop = match named.imported {
                            Some(ModuleExportName::Ident(imported)) => {
                                MemberProp::Ident(IdentName::new(imported.sym, DUMMY_SP))
                            }
                            Some(ModuleExportName::Str(imported)) => {
                                MemberProp::Computed(ComputedPropName {
                                    span: DUMMY_SP,
                                    expr: Box::new(Expr::Lit(imported.into())),
                                })
                            }
                            None => MemberProp::Ident(IdentName::new(
                                named.local.sym.clone(),
                                DUMMY_SP,
                            )),
                        };
                        let member = Expr::Member(MemberExpr {
                            span: DUMMY_SP,
                            obj: Box::new(require_call(&import.src)),
                            prop,
                        });
                        (named.local, member)
                    }
                };
                Some(const_decl(local, init, span))
            })
            .collect()
    }
}

/// Adds a cell's own locals to its `__capture_locals` closure.
///
/// Every variable declared by a statement preceding the capture call in the
/// same statement list becomes a shorthand property of the object literal the
/// closure returns. Nested declarations are not visible to the call and are
/// not added.
pub struct CaptureLocals;

impl VisitMut for CaptureLocals {
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);

        let mut declared: Vec<Ident> = Vec::new();
        for stmt in stmts.iter_mut() {
            match stmt {
                Stmt::Decl(Decl::Var(var)) => {
                    for declarator in &var.decls {
                        collect_binding_idents(&declarator.name, &mut declared);
                    }
                }
                Stmt::Expr(ExprStmt { expr, .. }) => {
                    if let Some(object) = capture_locals_object(expr) {
                        add_shorthand_props(object, &declared);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Rewrites `await x` as `await __track_await(x)`.
pub struct AwaitInstrumentation;

impl VisitMut for AwaitInstrumentation {
    fn visit_mut_await_expr(&mut self, await_expr: &mut AwaitExpr) {
        await_expr.visit_mut_children_with(self);

        if is_call_to(&await_expr.arg, TRACK_AWAIT_FN) {
            return;
        }
        let arg = mem::take(&mut await_expr.arg);
        await_expr.arg = Box::new(call(TRACK_AWAIT_FN, vec![*arg]));
    }
}

/// The object literal returned by the closure of a `__capture_locals` call.
fn capture_locals_object(expr: &mut Expr) -> Option<&mut ObjectLit> {
    let Expr::Call(call) = expr else {
        return None;
    };
    if !callee_is(&call.callee, CAPTURE_LOCALS_FN) {
        return None;
    }

    let closure = call.args.get_mut(2)?;
    let Expr::Arrow(arrow) = &mut *closure.expr else {
        return None;
    };
    let BlockStmtOrExpr::Expr(body) = &mut *arrow.body else {
        return None;
    };

    match &mut **body {
        Expr::Paren(paren) => match &mut *paren.expr {
            Expr::Object(object) => Some(object),
            _ => None,
        },
        Expr::Object(object) => Some(object),
        _ => None,
    }
}

fn add_shorthand_props(object: &mut ObjectLit, names: &[Ident]) {
    for name in names {
        let present = object.props.iter().any(|prop| match prop {
            PropOrSpread::Prop(prop) => match &**prop {
                Prop::Shorthand(ident) => ident.sym == name.sym,
                Prop::KeyValue(kv) => match &kv.key {
                    PropName::Ident(key) => key.sym == name.sym,
                    _ => false,
                },
                _ => false,
            },
            PropOrSpread::Spread(_) => false,
        });
        if !present {
            object.props.push(PropOrSpread::Prop(Box::new(Prop::Shorthand(
                Ident::new(name.sym.clone(), DUMMY_SP, name.ctxt),
            ))));
        }
    }
}

/// Every identifier bound by a declaration pattern.
pub(crate) fn collect_binding_idents(pat: &Pat, out: &mut Vec<Ident>) {
    match pat {
        Pat::Ident(binding) => out.push(binding.id.clone()),
        Pat::Array(array) => {
            for elem in array.elems.iter().flatten() {
                collect_binding_idents(elem, out);
            }
        }
        Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    ObjectPatProp::KeyValue(kv) => collect_binding_idents(&kv.value, out),
                    ObjectPatProp::Assign(assign) => out.push(assign.key.id.clone()),
                    ObjectPatProp::Rest(rest) => collect_binding_idents(&rest.arg, out),
                }
            }
        }
        Pat::Rest(rest) => collect_binding_idents(&rest.arg, out),
        Pat::Assign(assign) => collect_binding_idents(&assign.left, out),
        _ => {}
    }
}

fn callee_is(callee: &Callee, name: &str) -> bool {
    matches!(callee, Callee::Expr(expr) if matches!(&**expr, Expr::Ident(ident) if &*ident.sym == name))
}

fn is_call_to(expr: &Expr, name: &str) -> bool {
    matches!(expr, Expr::Call(call) if callee_is(&call.callee, name))
}

fn ident(name: &str) -> Ident {
    Ident::new(name.into(), DUMMY_SP, Default::default())
}

fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        span: DUMMY_SP,
        callee: Callee::Expr(Box::new(Expr::Ident(ident(name)))),
        args: args
            .into_iter()
            .map(|arg| ExprOrSpread {
                spread: None,
                expr: Box::new(arg),
            })
            .collect(),
        type_args: None,
        ctxt: Default::default(),
    })
}

fn require_call(src: &Str) -> Expr {
    call("require", vec![Expr::Lit(src.clone().into())])
}

fn const_decl(local: Ident, init: Expr, span: swc_common::Span) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span,
        ctxt: Default::default(),
        kind: VarDeclKind::Const,
        declare: false,
        decls: vec![VarDeclarator {
            span,
            name: Pat::Ident(BindingIdent {
                id: local,
                type_ann: None,
            }),
            init: Some(Box::new(init)),
            definite: false,
        }],
    })))
}
