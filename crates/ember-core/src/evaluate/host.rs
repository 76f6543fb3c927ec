//! Host side of an evaluation run.
//!
//! [`HostState`] is shared with the JavaScript bindings. Bindings only record
//! what happened; the driver hands the queued [`HostEvent`]s to the callback
//! once control is back in Rust.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use rquickjs::{Ctx, Function};
use serde_json::Value;

use super::output::{OutputCapture, OutputStreams, Stream, strip_ansi};
use super::scheduler::{Scheduler, delay_from_millis};
use super::{DisplayValue, EvaluatorConfig, loader};
use crate::sourcemap::SourceMap;
use crate::tracker::{ASYNC_CONTEXT_KIND, AsyncId, AsyncTracker, OpTracker};
use crate::translate::{ErrorSource, LocationTranslator, RawError};

/// Operation that is current while no macrotask or cell is executing.
pub const ROOT_OP_ID: AsyncId = 1;

pub type SharedState = Rc<RefCell<HostState>>;

/// Something the callback must be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    CellStarted(String),
    CellEnded(String),
    Display(String, DisplayValue),
    Error(String, String),
    OutputCapped,
    EvaluationCompleted,
}

/// Per-run state shared between the driver and the JavaScript bindings.
pub struct HostState {
    max_outputs: usize,
    echo_output: bool,
    file_name: String,
    cell_ids: Vec<String>,
    started: Vec<bool>,
    completed: Vec<bool>,
    pub(crate) tracker: OpTracker,
    pub(crate) scheduler: Scheduler,
    next_op_id: AsyncId,
    current_op: AsyncId,
    saved_ops: Vec<AsyncId>,
    original_map: Option<SourceMap>,
    final_map: Option<SourceMap>,
    capture: Option<OutputCapture>,
    num_outputs: usize,
    outputs_capped: bool,
    textually_completed: bool,
    finished: bool,
    environment: BTreeMap<String, Value>,
    events: VecDeque<HostEvent>,
    errors_reported: usize,
}

impl HostState {
    pub fn new(config: &EvaluatorConfig, file_name: impl Into<String>) -> Self {
        Self {
            max_outputs: config.max_outputs,
            echo_output: config.echo_output,
            file_name: file_name.into(),
            cell_ids: Vec::new(),
            started: Vec::new(),
            completed: Vec::new(),
            tracker: OpTracker::new(),
            scheduler: Scheduler::new(),
            next_op_id: ROOT_OP_ID + 1,
            current_op: ROOT_OP_ID,
            saved_ops: Vec::new(),
            original_map: None,
            final_map: None,
            capture: None,
            num_outputs: 0,
            outputs_capped: false,
            textually_completed: false,
            finished: false,
            environment: BTreeMap::new(),
            events: VecDeque::new(),
            errors_reported: 0,
        }
    }

    pub fn shared(self) -> SharedState {
        Rc::new(RefCell::new(self))
    }

    pub fn set_cells(&mut self, cell_ids: Vec<String>) {
        self.started = vec![false; cell_ids.len()];
        self.completed = vec![false; cell_ids.len()];
        self.cell_ids = cell_ids;
    }

    pub fn set_source_maps(&mut self, original: Option<SourceMap>, merged: Option<SourceMap>) {
        self.original_map = original;
        self.final_map = merged;
    }

    /// Capture the output streams and start tracking.
    pub fn begin_run(&mut self, streams: &Rc<RefCell<OutputStreams>>) {
        self.capture = Some(OutputCapture::acquire(streams));
        self.tracker.init();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn outputs_capped(&self) -> bool {
        self.outputs_capped
    }

    pub fn errors_reported(&self) -> usize {
        self.errors_reported
    }

    pub fn take_environment(&mut self) -> BTreeMap<String, Value> {
        std::mem::take(&mut self.environment)
    }

    pub fn take_events(&mut self) -> VecDeque<HostEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn current_op(&self) -> AsyncId {
        self.current_op
    }

    pub fn set_current_op(&mut self, op: AsyncId) {
        self.current_op = op;
    }

    pub fn cell_id(&self, index: usize) -> Option<&str> {
        self.cell_ids.get(index).map(String::as_str)
    }

    /// Id of the cell the current operation belongs to.
    ///
    /// Falls back to the first cell when the operation is not attributed.
    pub fn current_cell_id(&self) -> Option<&str> {
        let index = self.tracker.find_cell_index(self.current_op).unwrap_or(0);
        self.cell_id(index)
    }

    fn current_cell_or_empty(&self) -> String {
        self.current_cell_id().unwrap_or_default().to_string()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn begin_op(&mut self, kind: &str) -> AsyncId {
        let id = self.next_op_id;
        self.next_op_id += 1;
        self.tracker.on_op_created(id, kind, self.current_op);
        id
    }

    pub fn end_op(&mut self, id: AsyncId) {
        self.tracker.on_op_completed(id, "resolve");
    }

    pub fn schedule(&mut self, id: AsyncId, delay_ms: f64, repeat: bool) {
        if self.finished {
            return;
        }
        self.scheduler.schedule(id, delay_from_millis(delay_ms), repeat);
    }

    pub fn cancel(&mut self, id: AsyncId) {
        self.scheduler.cancel(id);
        self.tracker.on_op_completed(id, "destroy");
    }

    // =========================================================================
    // Cells
    // =========================================================================

    /// Enter a cell's execution scope. Returns the scope id, or `None` if the
    /// cell must not run.
    pub fn enter_cell(&mut self, index: usize) -> Option<AsyncId> {
        if self.finished || index >= self.cell_ids.len() {
            return None;
        }

        let cell_id = self.cell_ids[index].clone();
        tracing::debug!("Evaluating cell {} ({})", index, cell_id);
        self.started[index] = true;
        self.events.push_back(HostEvent::CellStarted(cell_id));

        let scope = self.next_op_id;
        self.next_op_id += 1;
        self.tracker
            .on_op_created(scope, ASYNC_CONTEXT_KIND, self.current_op);
        self.tracker.track_cell(scope, index);

        self.saved_ops.push(self.current_op);
        self.current_op = scope;
        Some(scope)
    }

    pub fn leave_cell(&mut self, scope: AsyncId) {
        if self.current_op == scope {
            self.current_op = self.saved_ops.pop().unwrap_or(ROOT_OP_ID);
        }
    }

    /// Mark the end of the generated program's synchronous text.
    pub fn end(&mut self) {
        tracing::debug!("Notebook text completed");
        self.textually_completed = true;
    }

    /// Started cells whose asynchronous work has drained since the last poll.
    pub fn poll_completed_cells(&mut self) -> Vec<usize> {
        let mut newly_completed = Vec::new();
        for index in 0..self.cell_ids.len() {
            if self.started[index]
                && !self.completed[index]
                && self.tracker.has_cell_completed(index)
            {
                self.completed[index] = true;
                newly_completed.push(index);
            }
        }
        newly_completed
    }

    pub fn cell_ended(&mut self, index: usize) {
        if let Some(cell_id) = self.cell_ids.get(index).cloned() {
            tracing::debug!("Cell {} ({}) completed", index, cell_id);
            self.events.push_back(HostEvent::CellEnded(cell_id));
        }
    }

    /// True once the program text ran to its end and every cell drained.
    pub fn is_notebook_done(&self) -> bool {
        self.textually_completed && self.completed.iter().all(|done| *done)
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn is_output_capped(&mut self) -> bool {
        if self.outputs_capped {
            return true;
        }
        if self.num_outputs >= self.max_outputs {
            tracing::warn!("Output capped after {} outputs", self.num_outputs);
            self.outputs_capped = true;
            self.events.push_back(HostEvent::OutputCapped);
            return true;
        }
        self.num_outputs += 1;
        false
    }

    pub fn write(&mut self, streams: &OutputStreams, stream: Stream, text: &str) {
        if !streams.is_captured() {
            OutputStreams::pass_through(stream, text);
            return;
        }
        if self.is_output_capped() {
            return;
        }

        let cell_id = self.current_cell_or_empty();
        match stream {
            Stream::Stdout => self.events.push_back(HostEvent::Display(
                cell_id,
                DisplayValue {
                    display_type: Some("text".to_string()),
                    data: Value::String(strip_ansi(text)),
                },
            )),
            Stream::Stderr => self
                .events
                .push_back(HostEvent::Error(cell_id, text.to_string())),
        }

        if self.echo_output {
            OutputStreams::pass_through(stream, text);
        }
    }

    pub fn display(&mut self, json: &str, display_type: &str) {
        if self.finished || self.is_output_capped() {
            return;
        }
        let data = serde_json::from_str(json).unwrap_or_else(|_| Value::String(json.to_string()));
        let display_type = (!display_type.is_empty()).then(|| display_type.to_string());
        let cell_id = self.current_cell_or_empty();
        self.events.push_back(HostEvent::Display(
            cell_id,
            DisplayValue { display_type, data },
        ));
    }

    /// Record captured locals; later captures overwrite earlier ones.
    pub fn capture_locals(&mut self, index: usize, json: &str) {
        let locals = match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(locals)) => locals,
            Ok(_) => return,
            Err(err) => {
                tracing::debug!("Discarding locals of cell {}: {}", index, err);
                return;
            }
        };
        tracing::trace!(
            "Captured locals for cell {}: {:?}",
            index,
            locals.keys().collect::<Vec<_>>()
        );
        self.environment.extend(locals);
    }

    // =========================================================================
    // Errors and completion
    // =========================================================================

    /// Format an error and queue it for the callback.
    ///
    /// Ignored once the run has finished.
    pub fn report_error(&mut self, source: ErrorSource, cell_id: Option<&str>, error: RawError<'_>) {
        if self.finished {
            tracing::debug!(
                "Ignoring {} error after completion: {:?}",
                source,
                error.message
            );
            return;
        }

        let current = cell_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.current_cell_id().map(str::to_string));
        let translator = LocationTranslator::new(
            &self.file_name,
            self.original_map.as_ref(),
            self.final_map.as_ref(),
        );
        let formatted = translator.format_error(source, current.as_deref(), error);

        tracing::debug!(
            "{} error: message = {:?}, stack = {:?}",
            source,
            error.message,
            error.stack
        );
        self.errors_reported += 1;
        self.events.push_back(HostEvent::Error(
            formatted.cell_id.unwrap_or_default(),
            formatted.display,
        ));
    }

    /// Report a runtime error and end the run.
    pub fn fail(&mut self, cell_id: Option<&str>, message: &str, stack: &str) {
        let error = RawError {
            message: Some(message).filter(|message| !message.is_empty()),
            location: None,
            stack: Some(stack).filter(|stack| !stack.is_empty()),
        };
        self.report_error(ErrorSource::CodeEvaluation, cell_id, error);
        self.finish();
    }

    /// End the run. Only the first call has any effect.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.capture = None;
        self.tracker.deinit();
        self.scheduler = Scheduler::new();
        tracing::info!("Evaluation completed");
        self.events.push_back(HostEvent::EvaluationCompleted);
    }

    /// Debug snapshot of in-flight work.
    pub fn dump(&self) -> String {
        self.tracker.dump()
    }
}

/// Install the host bindings the prelude calls.
pub fn install<'js>(
    ctx: &Ctx<'js>,
    state: &SharedState,
    streams: &Rc<RefCell<OutputStreams>>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let host = Rc::clone(state);
    globals.set(
        "__host_op_begin",
        Function::new(ctx.clone(), move |kind: String| -> f64 {
            host.borrow_mut().begin_op(&kind) as f64
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_op_end",
        Function::new(ctx.clone(), move |id: f64| {
            host.borrow_mut().end_op(id as AsyncId);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_swap_op",
        Function::new(ctx.clone(), move |id: f64| -> f64 {
            let mut host = host.borrow_mut();
            let previous = host.current_op();
            host.set_current_op(id as AsyncId);
            previous as f64
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_schedule",
        Function::new(ctx.clone(), move |id: f64, delay: f64, repeat: bool| {
            host.borrow_mut().schedule(id as AsyncId, delay, repeat);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_cancel",
        Function::new(ctx.clone(), move |id: f64| {
            host.borrow_mut().cancel(id as AsyncId);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_enter_cell",
        Function::new(ctx.clone(), move |index: f64, _cell_id: String| -> f64 {
            match host.borrow_mut().enter_cell(index as usize) {
                Some(scope) => scope as f64,
                None => -1.0,
            }
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_leave_cell",
        Function::new(ctx.clone(), move |scope: f64| {
            host.borrow_mut().leave_cell(scope as AsyncId);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_error",
        Function::new(
            ctx.clone(),
            move |cell_id: String, message: String, stack: String| {
                let cell_id = (!cell_id.is_empty()).then_some(cell_id.as_str());
                host.borrow_mut().fail(cell_id, &message, &stack);
            },
        )?,
    )?;

    let host = Rc::clone(state);
    let output = Rc::clone(streams);
    globals.set(
        "__host_write",
        Function::new(ctx.clone(), move |stream: String, text: String| {
            let streams = output.borrow();
            host.borrow_mut().write(&streams, Stream::parse(&stream), &text);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_display",
        Function::new(ctx.clone(), move |json: String, display_type: String| {
            host.borrow_mut().display(&json, &display_type);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_locals",
        Function::new(ctx.clone(), move |index: f64, json: String| {
            host.borrow_mut().capture_locals(index as usize, &json);
        })?,
    )?;

    let host = Rc::clone(state);
    globals.set(
        "__host_end",
        Function::new(ctx.clone(), move || {
            host.borrow_mut().end();
        })?,
    )?;

    globals.set(
        "__host_log",
        Function::new(ctx.clone(), |message: String| {
            tracing::debug!("{}", message);
        })?,
    )?;

    globals.set(
        "__ember_resolve",
        Function::new(ctx.clone(), |base: String, specifier: String| -> String {
            loader::resolve(&PathBuf::from(base), &specifier)
                .map(|path| path.display().to_string())
                .unwrap_or_default()
        })?,
    )?;

    globals.set(
        "__ember_read",
        Function::new(ctx.clone(), |path: String| -> String {
            loader::load(&PathBuf::from(path)).to_string()
        })?,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_outputs: usize) -> HostState {
        let config = EvaluatorConfig {
            max_outputs,
            ..Default::default()
        };
        let mut state = HostState::new(&config, "notebook.json");
        state.set_cells(vec!["a".to_string(), "b".to_string()]);
        state
    }

    fn displays(events: &VecDeque<HostEvent>) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, HostEvent::Display(..)))
            .count()
    }

    #[test]
    fn test_output_cap_fires_once() {
        let streams = OutputStreams::shared();
        let mut state = state(3);
        state.begin_run(&streams);

        for i in 0..10 {
            state.display(&i.to_string(), "");
        }
        state.write(&streams.borrow(), Stream::Stdout, "more");

        let events = state.take_events();
        assert_eq!(displays(&events), 3);
        assert_eq!(
            events
                .iter()
                .filter(|event| **event == HostEvent::OutputCapped)
                .count(),
            1
        );
        assert!(state.outputs_capped());
    }

    #[test]
    fn test_writes_are_attributed_to_the_current_cell() {
        let streams = OutputStreams::shared();
        let mut state = state(10);
        state.begin_run(&streams);

        let scope = state.enter_cell(1).unwrap();
        state.write(&streams.borrow(), Stream::Stdout, "\x1b[32mhi\x1b[0m\n");
        state.write(&streams.borrow(), Stream::Stderr, "oops\n");
        state.leave_cell(scope);
        assert_eq!(state.current_op(), ROOT_OP_ID);

        let events: Vec<HostEvent> = state.take_events().into();
        assert_eq!(events[0], HostEvent::CellStarted("b".to_string()));
        assert_eq!(
            events[1],
            HostEvent::Display(
                "b".to_string(),
                DisplayValue {
                    display_type: Some("text".to_string()),
                    data: Value::String("hi\n".to_string()),
                }
            )
        );
        assert_eq!(events[2], HostEvent::Error("b".to_string(), "oops\n".to_string()));
    }

    #[test]
    fn test_ops_keep_their_cell_after_leaving() {
        let streams = OutputStreams::shared();
        let mut state = state(10);
        state.begin_run(&streams);

        let scope = state.enter_cell(0).unwrap();
        let timer = state.begin_op("Timeout");
        state.leave_cell(scope);

        assert_eq!(state.poll_completed_cells(), Vec::<usize>::new());
        state.set_current_op(timer);
        assert_eq!(state.current_cell_id(), Some("a"));

        state.cancel(timer);
        assert_eq!(state.poll_completed_cells(), vec![0]);
        assert_eq!(state.poll_completed_cells(), Vec::<usize>::new());
    }

    #[test]
    fn test_unstarted_cells_are_not_completed() {
        let streams = OutputStreams::shared();
        let mut state = state(10);
        state.begin_run(&streams);

        assert!(state.poll_completed_cells().is_empty());
        state.end();
        assert!(!state.is_notebook_done());
    }

    #[test]
    fn test_finish_is_idempotent() {
        let streams = OutputStreams::shared();
        let mut state = state(10);
        state.begin_run(&streams);

        state.fail(Some("a"), "Error: first", "");
        state.fail(Some("b"), "Error: second", "");
        state.finish();

        let events: Vec<HostEvent> = state.take_events().into();
        assert_eq!(
            events,
            vec![
                HostEvent::Error("a".to_string(), "Error: first".to_string()),
                HostEvent::EvaluationCompleted,
            ]
        );
        assert_eq!(streams.borrow().restore_count(), 1);
        assert!(!streams.borrow().is_captured());
        assert_eq!(state.enter_cell(0), None);
    }

    #[test]
    fn test_locals_last_write_wins() {
        let mut state = state(10);
        state.capture_locals(0, r#"{ "x": 1, "y": "a" }"#);
        state.capture_locals(1, r#"{ "x": 2 }"#);
        state.capture_locals(1, "not json");

        let environment = state.take_environment();
        assert_eq!(environment["x"], 2);
        assert_eq!(environment["y"], "a");
    }
}
