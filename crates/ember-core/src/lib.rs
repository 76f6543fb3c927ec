//! Core evaluation engine for Ember JavaScript/TypeScript notebooks.
//!
//! This crate provides:
//! - Code generation of one nested program from a notebook's cells
//! - TypeScript compilation with swc, with source maps back to cells
//! - Evaluation in an embedded QuickJS runtime with per-cell async tracking
//! - Translation of runtime errors to cell and line
//! - npm module installation for required packages

pub mod codegen;
pub mod compile;
pub mod error;
pub mod evaluate;
pub mod install;
pub mod notebook;
pub mod sourcemap;
pub mod tracker;
pub mod translate;

pub use codegen::{CodeGenerator, GeneratedCode};
pub use compile::{CompiledCode, Compiler, Diagnostic, FileLocation, SwcCompiler};
pub use error::{Error, Result};
pub use evaluate::{
    DisplayValue, EvaluationCallback, EvaluationReport, Evaluator, EvaluatorConfig, MAX_OUTPUTS,
};
pub use install::{ModuleInstaller, NoopInstaller, NpmInstaller};
pub use notebook::{Cell, CellType, Notebook};
pub use sourcemap::{SourceMap, SourceMapExt};
pub use tracker::{AsyncId, AsyncTracker, NullAsyncTracker, OpTracker};
pub use translate::{ErrorSource, FormattedError, LocationTranslator, RawError};
