//! Notebook evaluation.
//!
//! Runs the compiled program of a notebook in an embedded QuickJS runtime and
//! reports per-cell progress through an [`EvaluationCallback`].
//!
//! # Run lifecycle
//!
//! ```text
//! install modules ─► generate + compile ─► start program ─┐
//!                                                        ▼
//!            ┌──────── drain jobs ◄──── run next macrotask
//!            ▼                                ▲
//!      poll cell completion ─► all done? ──no─┘
//!                                 │yes
//!                                 ▼
//!                              finish
//! ```
//!
//! Every error that reaches the evaluator ends the run. Finishing is
//! idempotent: the completion event fires once and output capture is released
//! once, whichever path gets there first.

mod callback;
mod host;
pub mod loader;
mod output;
mod scheduler;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rquickjs::convert::Coerced;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Module, Runtime, Value};

pub use callback::{DisplayValue, EvaluationCallback};
pub use output::{OutputCapture, OutputStreams, Stream, strip_ansi};
pub use scheduler::{ReadyTask, Scheduler};

use host::{HostEvent, HostState, ROOT_OP_ID, SharedState};

use crate::codegen::CodeGenerator;
use crate::compile::{Compiler, SwcCompiler};
use crate::error::{Error, Result};
use crate::install::{ModuleInstaller, NoopInstaller};
use crate::notebook::{Cell, Notebook};
use crate::translate::{ErrorSource, RawError};

/// Maximum number of outputs per run.
pub const MAX_OUTPUTS: usize = 1000;

/// Name the prelude module is evaluated under.
pub const PRELUDE_NAME: &str = "ember_prelude.js";

const PRELUDE: &str = include_str!("prelude.js");

/// Property used to recognise promises already reported as unhandled.
const REJECTION_KEY: &str = "__ember_rejection";

/// Configuration for an [`Evaluator`].
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Outputs allowed before output is capped.
    pub max_outputs: usize,
    /// Also write captured console output to the real process streams.
    pub echo_output: bool,
    /// Longest wait for a pending timer. A run whose next timer is further
    /// away than this is treated as stalled. Unlimited when `None`.
    pub max_stall_wait: Option<Duration>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_outputs: MAX_OUTPUTS,
            echo_output: false,
            max_stall_wait: None,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    /// Locals captured from all cells, later cells overriding earlier ones.
    pub environment: BTreeMap<String, serde_json::Value>,
    pub outputs_capped: bool,
    /// Number of errors reported through the callback.
    pub errors: usize,
    pub elapsed: Duration,
}

impl EvaluationReport {
    pub fn succeeded(&self) -> bool {
        self.errors == 0
    }
}

#[derive(Debug)]
struct Rejection {
    id: u64,
    message: String,
    stack: String,
}

#[derive(Debug, Default)]
struct Rejections {
    next_id: u64,
    pending: Vec<Rejection>,
}

/// Evaluates notebooks.
pub struct Evaluator {
    config: EvaluatorConfig,
    compiler: Box<dyn Compiler>,
    installer: Box<dyn ModuleInstaller>,
    callback: Option<Box<dyn EvaluationCallback>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}

impl Evaluator {
    /// Create an evaluator using the swc compiler and no module installation.
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            config,
            compiler: Box::new(SwcCompiler::new()),
            installer: Box::new(NoopInstaller),
            callback: None,
        }
    }

    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn with_installer(mut self, installer: impl ModuleInstaller + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    /// Set the callback for evaluation events.
    pub fn set_callback(&mut self, callback: impl EvaluationCallback + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate the code cells of `notebook`.
    ///
    /// `file_name` names the notebook in error messages and `project_path`
    /// is the directory modules are installed into and required from.
    /// Errors in the notebook's code are reported through the callback, not
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the project directory does not exist or the
    /// JavaScript runtime cannot be set up.
    pub fn evaluate(
        &self,
        notebook: &Notebook,
        file_name: &str,
        project_path: &Path,
    ) -> Result<EvaluationReport> {
        if !project_path.is_dir() {
            return Err(Error::InvalidOperation(format!(
                "project directory {} does not exist",
                project_path.display()
            )));
        }

        let start = Instant::now();
        let code_cells: Vec<Cell> = notebook.code_cells().into_iter().cloned().collect();
        tracing::info!(
            "Evaluating {} ({} code cells)",
            file_name,
            code_cells.len()
        );

        let streams = OutputStreams::shared();
        let state = HostState::new(&self.config, file_name).shared();
        state
            .borrow_mut()
            .set_cells(code_cells.iter().map(|cell| cell.id().to_string()).collect());

        self.install_modules(&state, &code_cells, project_path);

        let generated = CodeGenerator::gen_code(&code_cells, self.compiler.as_ref(), project_path);
        {
            let mut host = state.borrow_mut();
            host.set_source_maps(
                generated.original_source_map().cloned(),
                generated.final_source_map(),
            );
            for diagnostic in &generated.diagnostics {
                host.report_error(
                    diagnostic.source,
                    None,
                    RawError {
                        message: Some(&diagnostic.message),
                        location: diagnostic.location.as_ref(),
                        stack: None,
                    },
                );
            }
        }
        self.flush(&state);

        let result = match generated.text.as_deref() {
            Some(program) => self.run_program(&state, &streams, program, file_name, project_path),
            None => Ok(()),
        };
        state.borrow_mut().finish();
        self.flush(&state);
        result?;

        let mut host = state.borrow_mut();
        let report = EvaluationReport {
            environment: host.take_environment(),
            outputs_capped: host.outputs_capped(),
            errors: host.errors_reported(),
            elapsed: start.elapsed(),
        };
        tracing::info!(
            "Evaluated {} in {:?} with {} errors",
            file_name,
            report.elapsed,
            report.errors
        );
        Ok(report)
    }

    fn install_modules(&self, state: &SharedState, code_cells: &[Cell], project_path: &Path) {
        for cell in code_cells {
            if let Err(err) = self
                .installer
                .ensure_required_modules(cell.source(), project_path)
            {
                let message = err.to_string();
                state.borrow_mut().report_error(
                    ErrorSource::ModuleInstall,
                    Some(cell.id()),
                    RawError {
                        message: Some(&message),
                        ..Default::default()
                    },
                );
            }
        }
    }

    fn run_program(
        &self,
        state: &SharedState,
        streams: &Rc<RefCell<OutputStreams>>,
        program: &str,
        file_name: &str,
        project_path: &Path,
    ) -> Result<()> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;

        let rejections = Rc::new(RefCell::new(Rejections::default()));
        track_rejections(&runtime, &rejections);

        context.with(|ctx| -> Result<()> {
            host::install(&ctx, state, streams)?;
            Module::evaluate(ctx.clone(), PRELUDE_NAME, PRELUDE)
                .and_then(|promise| promise.finish::<()>())
                .catch(&ctx)
                .map_err(|err| Error::Runtime(format!("failed to load prelude: {}", err)))
        })?;

        state.borrow_mut().begin_run(streams);

        let filename = project_path.join(file_name).display().to_string();
        let dirname = project_path.display().to_string();
        context.with(|ctx| -> Result<()> {
            let compiled = ctx.eval::<Function, _>(program.as_bytes()).catch(&ctx);
            let program = match compiled {
                Ok(program) => program,
                Err(caught) => {
                    let (message, stack) = caught_parts(&caught);
                    tracing::debug!("Program setup failed: {}", message);
                    let mut host = state.borrow_mut();
                    host.report_error(
                        ErrorSource::CodeSetup,
                        None,
                        RawError {
                            message: Some(&message),
                            location: None,
                            stack: Some(stack.as_str()).filter(|stack| !stack.is_empty()),
                        },
                    );
                    host.finish();
                    return Ok(());
                }
            };

            let start: Function = ctx.globals().get("__ember_start")?;
            if let Err(caught) = start.call::<_, ()>((program, filename, dirname)).catch(&ctx) {
                let (message, stack) = caught_parts(&caught);
                state.borrow_mut().fail(None, &message, &stack);
            }
            Ok(())
        })?;

        let result = self.drive(&runtime, &context, state, &rejections);
        runtime.set_host_promise_rejection_tracker(None);
        result
    }

    /// Run the event loop until the run finishes.
    fn drive(
        &self,
        runtime: &Runtime,
        context: &Context,
        state: &SharedState,
        rejections: &Rc<RefCell<Rejections>>,
    ) -> Result<()> {
        loop {
            self.drain_jobs(runtime, state, rejections);
            self.flush(state);
            if state.borrow().is_finished() {
                return Ok(());
            }

            let completed = state.borrow_mut().poll_completed_cells();
            for index in completed {
                context.with(|ctx| -> Result<()> {
                    let capture: Function = ctx.globals().get("__ember_capture")?;
                    if let Err(caught) = capture.call::<_, ()>((index as f64,)).catch(&ctx) {
                        tracing::debug!("Could not recapture locals of cell {}: {}", index, caught);
                    }
                    Ok(())
                })?;
                state.borrow_mut().cell_ended(index);
            }
            if state.borrow().is_notebook_done() {
                state.borrow_mut().finish();
            }
            self.flush(state);
            if state.borrow().is_finished() {
                return Ok(());
            }

            let now = Instant::now();
            let ready = state.borrow_mut().scheduler.pop_ready(now);
            if let Some(task) = ready {
                self.run_task(runtime, context, state, rejections, task)?;
                continue;
            }

            let deadline = state.borrow_mut().scheduler.next_deadline();
            match deadline {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    if self.config.max_stall_wait.is_some_and(|limit| wait > limit) {
                        self.stall(state);
                    } else {
                        std::thread::sleep(wait);
                    }
                }
                None => self.stall(state),
            }
        }
    }

    fn run_task(
        &self,
        runtime: &Runtime,
        context: &Context,
        state: &SharedState,
        rejections: &Rc<RefCell<Rejections>>,
        task: ReadyTask,
    ) -> Result<()> {
        state.borrow_mut().set_current_op(task.id);

        context.with(|ctx| -> Result<()> {
            let run: Function = ctx.globals().get("__ember_run")?;
            if let Err(caught) = run.call::<_, ()>((task.id as f64,)).catch(&ctx) {
                let (message, stack) = caught_parts(&caught);
                state.borrow_mut().fail(None, &message, &stack);
            }
            Ok(())
        })?;
        self.drain_jobs(runtime, state, rejections);

        let mut host = state.borrow_mut();
        let rescheduled = task.repeat && host.scheduler.reschedule(task.id);
        if !rescheduled {
            host.end_op(task.id);
        }
        host.set_current_op(ROOT_OP_ID);
        Ok(())
    }

    /// Run every pending promise job, then report unhandled rejections.
    fn drain_jobs(
        &self,
        runtime: &Runtime,
        state: &SharedState,
        rejections: &Rc<RefCell<Rejections>>,
    ) {
        loop {
            match runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    let (message, stack) = err.0.with(|ctx| value_parts(&ctx.catch()));
                    tracing::warn!("Promise job failed: {}", message);
                    state.borrow_mut().fail(None, &message, &stack);
                }
            }
        }

        let pending = std::mem::take(&mut rejections.borrow_mut().pending);
        for rejection in pending {
            tracing::debug!("Unhandled rejection: {}", rejection.message);
            state
                .borrow_mut()
                .fail(None, &rejection.message, &rejection.stack);
        }
    }

    fn stall(&self, state: &SharedState) {
        let mut host = state.borrow_mut();
        tracing::warn!(
            "Evaluation stalled with no pending work; finishing. Remaining operations:\n{}",
            host.dump()
        );
        host.finish();
    }

    /// Hand queued events to the callback.
    fn flush(&self, state: &SharedState) {
        let events = state.borrow_mut().take_events();
        let Some(callback) = self.callback.as_deref() else {
            return;
        };
        for event in events {
            match event {
                HostEvent::CellStarted(cell_id) => callback.on_cell_started(&cell_id),
                HostEvent::CellEnded(cell_id) => callback.on_cell_ended(&cell_id),
                HostEvent::Display(cell_id, value) => callback.on_display(&cell_id, &value),
                HostEvent::Error(cell_id, message) => callback.on_error(&cell_id, &message),
                HostEvent::OutputCapped => callback.on_output_capped(),
                HostEvent::EvaluationCompleted => callback.on_evaluation_completed(),
            }
        }
    }
}

/// Record promises rejected without a handler until they get one.
fn track_rejections(runtime: &Runtime, rejections: &Rc<RefCell<Rejections>>) {
    let rejections = Rc::clone(rejections);
    runtime.set_host_promise_rejection_tracker(Some(Box::new(
        move |_ctx: Ctx<'_>, promise: Value<'_>, reason: Value<'_>, is_handled: bool| {
            let mut rejections = rejections.borrow_mut();
            if is_handled {
                let id = promise
                    .as_object()
                    .and_then(|promise| promise.get::<_, f64>(REJECTION_KEY).ok());
                if let Some(id) = id {
                    rejections.pending.retain(|rejection| rejection.id != id as u64);
                }
                return;
            }

            rejections.next_id += 1;
            let id = rejections.next_id;
            if let Some(promise) = promise.as_object() {
                if let Err(err) = promise.set(REJECTION_KEY, id as f64) {
                    tracing::warn!("Could not tag rejected promise {}: {}", id, err);
                }
            }
            let (message, stack) = value_parts(&reason);
            rejections.pending.push(Rejection { id, message, stack });
        },
    )));
}

/// Message and stack of a caught JavaScript error.
fn caught_parts(caught: &CaughtError<'_>) -> (String, String) {
    match caught {
        CaughtError::Exception(exception) => {
            let name = exception
                .as_object()
                .get::<_, String>("name")
                .unwrap_or_else(|_| "Error".to_string());
            let message = format!("{}: {}", name, exception.message().unwrap_or_default());
            let stack = exception
                .stack()
                .map(|stack| format!("{}\n{}", message, stack))
                .unwrap_or_default();
            (message, stack)
        }
        CaughtError::Value(value) => value_parts(value),
        CaughtError::Error(error) => (error.to_string(), String::new()),
    }
}

/// Message and stack of a thrown or rejected value.
fn value_parts(value: &Value<'_>) -> (String, String) {
    if let Some(exception) = value.as_exception() {
        return caught_parts(&CaughtError::Exception(exception.clone()));
    }
    let message = value
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_default();
    (message, String::new())
}
