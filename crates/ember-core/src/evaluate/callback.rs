//! Evaluation callbacks.

use serde::Serialize;
use serde_json::Value;

/// A value shown in a cell's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayValue {
    /// Rendering hint, `"text"` for captured console output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    pub data: Value,
}

/// Callback trait for evaluation progress.
///
/// Every method has an empty default so implementors only handle the events
/// they care about. Methods are called on the evaluating thread, in the order
/// the events happened.
pub trait EvaluationCallback {
    /// Called when a cell's code starts running.
    fn on_cell_started(&self, _cell_id: &str) {}

    /// Called once a cell and all asynchronous work it caused have finished.
    fn on_cell_ended(&self, _cell_id: &str) {}

    /// Called exactly once per run, after which no more events arrive.
    fn on_evaluation_completed(&self) {}

    /// Called once when the output cap is reached; later output is dropped.
    fn on_output_capped(&self) {}

    /// Called for `display()` calls and standard output.
    fn on_display(&self, _cell_id: &str, _value: &DisplayValue) {}

    /// Called for errors and standard error output.
    fn on_error(&self, _cell_id: &str, _message: &str) {}
}
