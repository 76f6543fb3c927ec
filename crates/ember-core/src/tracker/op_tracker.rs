//! Operation tracker with per-cell in-flight counters.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::{Value, json};

use super::{ASYNC_CONTEXT_KIND, AsyncId, AsyncTracker, TLS_WRAP_KIND};

/// Status of an asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpStatus {
    InFlight,
    Completed,
}

/// A tracked asynchronous operation.
#[derive(Debug, Clone)]
pub struct AsyncOp {
    pub id: AsyncId,
    pub kind: String,
    pub trigger_id: AsyncId,
    pub status: OpStatus,
    /// Cell that owns this operation.
    pub cell_index: usize,
    /// Operations triggered by this one, in creation order.
    pub children: Vec<AsyncId>,
}

/// Records asynchronous operations and attributes them to cells.
///
/// Completed operations leave the current set but stay in the historical
/// index until the tracker is dropped, so ancestry walks keep working for
/// operations created after their parent finished.
#[derive(Debug, Default)]
pub struct OpTracker {
    /// In-flight operations.
    cur_ops: FxHashSet<AsyncId>,
    /// Every operation ever tracked.
    all_ops: FxHashMap<AsyncId, AsyncOp>,
    /// Operations whose trigger was not itself a tracked operation.
    root_ops: Vec<AsyncId>,
    /// Direct and memoized bindings of operations to cells.
    cell_bindings: FxHashMap<AsyncId, usize>,
    /// In-flight count per cell.
    num_cell_ops: FxHashMap<usize, i64>,
    tracking: bool,
}

impl OpTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight counter for a cell, zero if the cell never had operations.
    pub fn cell_op_count(&self, cell_index: usize) -> i64 {
        self.num_cell_ops.get(&cell_index).copied().unwrap_or(0)
    }

    /// Look up a tracked operation.
    pub fn op(&self, async_id: AsyncId) -> Option<&AsyncOp> {
        self.all_ops.get(&async_id)
    }

    fn op_to_json(&self, op: &AsyncOp, include_children: bool) -> Value {
        let children: Vec<Value> = if include_children {
            op.children
                .iter()
                .filter_map(|id| self.all_ops.get(id))
                .map(|child| self.op_to_json(child, true))
                .collect()
        } else {
            Vec::new()
        };

        json!({
            "asyncId": op.id,
            "type": op.kind,
            "triggerAsyncId": op.trigger_id,
            "status": op.status,
            "cellIndex": op.cell_index,
            "children": children,
        })
    }
}

impl AsyncTracker for OpTracker {
    fn init(&mut self) {
        if self.tracking {
            return;
        }
        tracing::debug!("Async tracking enabled");
        self.tracking = true;
    }

    fn deinit(&mut self) {
        if self.tracking {
            tracing::debug!(
                "Async tracking disabled with {} operations in flight",
                self.cur_ops.len()
            );
            self.tracking = false;
        }
    }

    fn is_tracking(&self) -> bool {
        self.tracking
    }

    fn track_cell(&mut self, async_id: AsyncId, cell_index: usize) {
        self.cell_bindings.insert(async_id, cell_index);
    }

    fn find_cell_index(&self, async_id: AsyncId) -> Option<usize> {
        let mut current = async_id;
        // Trigger ids always precede the operations they trigger; the bound
        // guards against a malformed self-referencing chain.
        for _ in 0..=self.all_ops.len() {
            if let Some(&cell_index) = self.cell_bindings.get(&current) {
                return Some(cell_index);
            }
            let op = self.all_ops.get(&current)?;
            if op.trigger_id == current {
                return None;
            }
            current = op.trigger_id;
        }
        None
    }

    fn has_cell_completed(&self, cell_index: usize) -> bool {
        self.cell_op_count(cell_index) <= 0
    }

    fn get_num_async_ops(&self) -> usize {
        self.cur_ops.len()
    }

    fn in_context(&self, async_id: AsyncId) -> bool {
        self.all_ops.contains_key(&async_id)
    }

    fn dump(&self) -> String {
        let num_cell_ops: BTreeMap<String, i64> = self
            .num_cell_ops
            .iter()
            .map(|(cell, count)| (cell.to_string(), *count))
            .collect();

        let mut cur_ids: Vec<AsyncId> = self.cur_ops.iter().copied().collect();
        cur_ids.sort_unstable();
        let cur_ops: Vec<Value> = cur_ids
            .iter()
            .filter_map(|id| self.all_ops.get(id))
            .map(|op| self.op_to_json(op, false))
            .collect();

        let ops: Vec<Value> = self
            .root_ops
            .iter()
            .filter_map(|id| self.all_ops.get(id))
            .map(|op| self.op_to_json(op, true))
            .collect();

        let snapshot = json!({
            "remainingOps": self.get_num_async_ops(),
            "isTracking": self.is_tracking(),
            "numCellOps": num_cell_ops,
            "curOps": cur_ops,
            "ops": ops,
        });

        serde_json::to_string_pretty(&snapshot).unwrap_or_default()
    }

    fn on_op_created(&mut self, async_id: AsyncId, kind: &str, trigger_id: AsyncId) {
        if !self.tracking {
            return;
        }

        if kind == TLS_WRAP_KIND || kind == ASYNC_CONTEXT_KIND {
            return;
        }

        let Some(cell_index) = self.find_cell_index(trigger_id) else {
            // Outside any cell's causal scope.
            return;
        };

        self.track_cell(async_id, cell_index);

        let op = AsyncOp {
            id: async_id,
            kind: kind.to_string(),
            trigger_id,
            status: OpStatus::InFlight,
            cell_index,
            children: Vec::new(),
        };

        match self.all_ops.get_mut(&trigger_id) {
            Some(parent) => parent.children.push(async_id),
            None => self.root_ops.push(async_id),
        }

        self.all_ops.insert(async_id, op);
        self.cur_ops.insert(async_id);

        let count = self.num_cell_ops.entry(cell_index).or_insert(0);
        *count += 1;

        tracing::trace!(
            "init {} ({}), trigger = {}, cell = {}, #cellops = {}, #ops = {}",
            async_id,
            kind,
            trigger_id,
            cell_index,
            count,
            self.cur_ops.len()
        );
    }

    fn on_op_completed(&mut self, async_id: AsyncId, reason: &str) {
        if !self.tracking {
            return;
        }

        if !self.cur_ops.remove(&async_id) {
            // Not tracked, or already completed.
            return;
        }

        if let Some(op) = self.all_ops.get_mut(&async_id) {
            op.status = OpStatus::Completed;
        }

        let Some(cell_index) = self.find_cell_index(async_id) else {
            tracing::error!("Async op {} doesn't match a cell", async_id);
            return;
        };

        match self.num_cell_ops.get_mut(&cell_index) {
            Some(count) => {
                *count -= 1;
                tracing::trace!(
                    "remove {}, reason = {}, cell = {}, #cellops = {}",
                    async_id,
                    reason,
                    cell_index,
                    count
                );
            }
            None => tracing::error!("No async ops in cell {}", cell_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_cell(scope: AsyncId, cell_index: usize) -> OpTracker {
        let mut tracker = OpTracker::new();
        tracker.init();
        tracker.on_op_created(scope, ASYNC_CONTEXT_KIND, 1);
        tracker.track_cell(scope, cell_index);
        tracker
    }

    // =========================================================================
    // Attribution
    // =========================================================================

    #[test]
    fn test_sync_called_op_is_attributed() {
        let mut tracker = tracker_with_cell(10, 2);
        tracker.on_op_created(11, "PROMISE", 10);

        assert_eq!(tracker.find_cell_index(11), Some(2));
        assert_eq!(tracker.cell_op_count(2), 1);
    }

    #[test]
    fn test_deep_chain_is_attributed_to_root_cell() {
        let mut tracker = tracker_with_cell(10, 1);
        let mut trigger = 10;
        for id in 11..40 {
            tracker.on_op_created(id, "Timeout", trigger);
            trigger = id;
        }

        assert_eq!(tracker.find_cell_index(39), Some(1));
        assert_eq!(tracker.cell_op_count(1), 29);
    }

    #[test]
    fn test_chain_survives_parent_completion() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(11, "Timeout", 10);
        tracker.on_op_completed(11, "it was destroyed");
        // Created while the parent callback ran, after the parent finished.
        tracker.on_op_created(12, "PROMISE", 11);

        assert_eq!(tracker.find_cell_index(12), Some(0));
        assert!(!tracker.has_cell_completed(0));
    }

    #[test]
    fn test_unresolvable_trigger_is_not_tracked() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(50, "Timeout", 999);

        assert_eq!(tracker.find_cell_index(50), None);
        assert!(!tracker.in_context(50));
        assert_eq!(tracker.get_num_async_ops(), 0);
    }

    #[test]
    fn test_direct_binding_wins_over_ancestry() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(11, "PROMISE", 10);
        tracker.track_cell(11, 3);

        assert_eq!(tracker.find_cell_index(11), Some(3));
    }

    #[test]
    fn test_ignored_kinds() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(11, TLS_WRAP_KIND, 10);
        tracker.on_op_created(12, ASYNC_CONTEXT_KIND, 10);

        assert!(!tracker.in_context(11));
        assert!(!tracker.in_context(12));
        assert!(tracker.has_cell_completed(0));
    }

    // =========================================================================
    // Counters
    // =========================================================================

    #[test]
    fn test_cell_drains_after_all_completions_in_any_order() {
        let mut tracker = tracker_with_cell(10, 0);
        let ids: Vec<AsyncId> = (11..16).collect();
        for &id in &ids {
            tracker.on_op_created(id, "Immediate", 10);
        }

        let order = [13, 11, 15, 12, 14];
        for (done, id) in order.iter().enumerate() {
            assert!(!tracker.has_cell_completed(0), "drained after {} of 5", done);
            tracker.on_op_completed(*id, "it was resolved");
        }

        assert!(tracker.has_cell_completed(0));
        assert_eq!(tracker.cell_op_count(0), 0);
    }

    #[test]
    fn test_interleaved_create_and_complete() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(11, "Timeout", 10);
        tracker.on_op_completed(11, "it was destroyed");
        assert!(tracker.has_cell_completed(0));

        tracker.on_op_created(12, "Timeout", 10);
        tracker.on_op_created(13, "Timeout", 12);
        tracker.on_op_completed(12, "it was destroyed");
        assert!(!tracker.has_cell_completed(0));
        tracker.on_op_completed(13, "it was destroyed");
        assert!(tracker.has_cell_completed(0));
    }

    #[test]
    fn test_double_completion_is_ignored() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(11, "PROMISE", 10);
        tracker.on_op_completed(11, "it was resolved");
        tracker.on_op_completed(11, "it was resolved");

        assert_eq!(tracker.cell_op_count(0), 0);
        assert!(tracker.in_context(11));
        assert_eq!(tracker.op(11).map(|op| op.status), Some(OpStatus::Completed));
    }

    #[test]
    fn test_completion_of_unknown_op_does_not_panic() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_completed(77, "it was destroyed");
        assert_eq!(tracker.get_num_async_ops(), 0);
    }

    #[test]
    fn test_cells_are_counted_separately() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.track_cell(20, 1);
        tracker.on_op_created(11, "Timeout", 10);
        tracker.on_op_created(21, "Timeout", 20);
        tracker.on_op_completed(21, "it was destroyed");

        assert!(!tracker.has_cell_completed(0));
        assert!(tracker.has_cell_completed(1));
        assert_eq!(tracker.get_num_async_ops(), 1);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_signals_ignored_when_not_tracking() {
        let mut tracker = OpTracker::new();
        tracker.track_cell(10, 0);
        tracker.on_op_created(11, "Timeout", 10);
        assert!(!tracker.in_context(11));

        tracker.init();
        tracker.init();
        assert!(tracker.is_tracking());
        tracker.on_op_created(11, "Timeout", 10);
        tracker.deinit();
        tracker.deinit();
        assert!(!tracker.is_tracking());

        tracker.on_op_completed(11, "it was destroyed");
        assert!(!tracker.has_cell_completed(0));
    }

    #[test]
    fn test_dump_snapshot() {
        let mut tracker = tracker_with_cell(10, 0);
        tracker.on_op_created(11, "Timeout", 10);
        tracker.on_op_created(12, "PROMISE", 11);
        tracker.on_op_completed(12, "it was resolved");

        let dump: Value = serde_json::from_str(&tracker.dump()).unwrap();
        assert_eq!(dump["remainingOps"], 1);
        assert_eq!(dump["isTracking"], true);
        assert_eq!(dump["numCellOps"]["0"], 1);
        assert_eq!(dump["curOps"][0]["asyncId"], 11);
        assert_eq!(dump["ops"][0]["type"], "Timeout");
        assert_eq!(dump["ops"][0]["children"][0]["status"], "completed");
    }
}
