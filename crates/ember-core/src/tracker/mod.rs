//! Asynchronous operation tracking.
//!
//! Attributes every asynchronous operation (timer, immediate, promise
//! continuation) to the notebook cell that transitively caused it, and
//! counts the in-flight operations of each cell so the evaluator knows when a
//! cell's asynchronous work has drained.
//!
//! # Causality model
//!
//! ```text
//! __cell(0, ..)  ──► scope op (bound to cell 0 via track_cell)
//!                      │
//!                      ├── Timeout op      (trigger = scope)
//!                      │      └── PROMISE op (trigger = Timeout)
//!                      └── PROMISE op      (trigger = scope)
//! ```
//!
//! The runtime reports each operation with the id of the operation that was
//! executing when it was scheduled (its trigger). An operation's cell is found
//! by walking trigger ancestry up to an explicit binding. Each new operation
//! is itself bound to the cell it resolved to, so later lookups stop early.
//!
//! # Trackers
//!
//! - **`OpTracker`** - Records operations and per-cell in-flight counts.
//! - **`NullAsyncTracker`** - Tracks nothing; every cell is always complete.

mod op_tracker;

pub use op_tracker::{AsyncOp, OpStatus, OpTracker};

/// Identifier of an asynchronous operation.
pub type AsyncId = u64;

/// Operation kind used for the scope that wraps each cell's execution.
///
/// Scopes only carry the cell binding; they are never counted.
pub const ASYNC_CONTEXT_KIND: &str = "__async_context";

/// Native kind that is never observed to be destroyed and would leak forever.
pub const TLS_WRAP_KIND: &str = "TLSWRAP";

/// Tracks asynchronous operations and attributes them to cells.
///
/// Signal handlers (`on_op_created`, `on_op_completed`) must never panic;
/// inconsistencies are logged and otherwise ignored.
pub trait AsyncTracker {
    /// Begin observing operation lifecycle signals. No-op if already observing.
    fn init(&mut self);

    /// Stop observing. Idempotent.
    fn deinit(&mut self);

    /// Returns true while signals are being observed.
    fn is_tracking(&self) -> bool;

    /// Bind an operation directly to a cell.
    fn track_cell(&mut self, async_id: AsyncId, cell_index: usize);

    /// Resolve the cell that owns an operation.
    ///
    /// Uses the direct binding if there is one, otherwise walks the recorded
    /// trigger ancestry. Returns `None` for operations that were never tracked.
    fn find_cell_index(&self, async_id: AsyncId) -> Option<usize>;

    /// True iff the cell has no in-flight operations.
    fn has_cell_completed(&self, cell_index: usize) -> bool;

    /// Number of in-flight operations across all cells.
    fn get_num_async_ops(&self) -> usize;

    /// True iff the operation was ever observed, including completed ones.
    fn in_context(&self, async_id: AsyncId) -> bool;

    /// JSON snapshot for debugging. Must not affect control flow.
    fn dump(&self) -> String;

    /// Signal: the runtime created an operation.
    fn on_op_created(&mut self, async_id: AsyncId, kind: &str, trigger_id: AsyncId);

    /// Signal: an operation was destroyed or its promise settled.
    fn on_op_completed(&mut self, async_id: AsyncId, reason: &str);
}

/// Tracker that tracks nothing.
///
/// Useful when completion detection is not wanted: every cell is reported
/// complete as soon as its synchronous body has run.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAsyncTracker;

impl AsyncTracker for NullAsyncTracker {
    fn init(&mut self) {}

    fn deinit(&mut self) {}

    fn is_tracking(&self) -> bool {
        false
    }

    fn track_cell(&mut self, _async_id: AsyncId, _cell_index: usize) {}

    fn find_cell_index(&self, _async_id: AsyncId) -> Option<usize> {
        None
    }

    fn has_cell_completed(&self, _cell_index: usize) -> bool {
        true
    }

    fn get_num_async_ops(&self) -> usize {
        0
    }

    fn in_context(&self, _async_id: AsyncId) -> bool {
        false
    }

    fn dump(&self) -> String {
        String::new()
    }

    fn on_op_created(&mut self, _async_id: AsyncId, _kind: &str, _trigger_id: AsyncId) {}

    fn on_op_completed(&mut self, _async_id: AsyncId, _reason: &str) {}
}
