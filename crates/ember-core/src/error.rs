//! Error types for ember-core.

use thiserror::Error;

/// Result type for ember-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ember-core.
///
/// Failures inside user code are not represented here: they are formatted and
/// reported through [`crate::EvaluationCallback::on_error`]. These variants
/// cover failures of the engine itself and of its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to parse a notebook document.
    #[error("parse error: {0}")]
    Parse(String),

    /// A required module could not be installed.
    #[error("module installation failed{}: {message}", module.as_ref().map(|m| format!(" for {}", m)).unwrap_or_default())]
    ModuleInstall {
        module: Option<String>,
        message: String,
    },

    /// Compilation failed.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// A source map could not be read or written.
    #[error("source map error: {0}")]
    SourceMap(#[from] swc_sourcemap::Error),

    /// The JavaScript runtime could not be created or driven.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation (e.g., evaluating in a project directory that does not exist).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Render the error with a recovery hint where one is known.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Parse(_) | Error::Json(_) => {
                Some("check that the notebook is a JSON document with a `cells` array")
            }
            Error::ModuleInstall { .. } => {
                Some("make sure `npm` is on your PATH and the project directory is writable")
            }
            Error::Runtime(_) => Some("re-run with --verbose to see the engine log"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

impl From<rquickjs::Error> for Error {
    fn from(err: rquickjs::Error) -> Self {
        Error::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_install_display() {
        let err = Error::ModuleInstall {
            module: Some("left-pad".to_string()),
            message: "npm exited with status 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "module installation failed for left-pad: npm exited with status 1"
        );
    }

    #[test]
    fn test_hint_is_appended() {
        let err = Error::Parse("expected value".to_string());
        let text = err.with_hint();
        assert!(text.starts_with("parse error: expected value"));
        assert!(text.contains("hint:"));
    }

    #[test]
    fn test_no_hint_for_invalid_operation() {
        let err = Error::InvalidOperation("busy".to_string());
        assert_eq!(err.with_hint(), "invalid operation: busy");
    }
}
