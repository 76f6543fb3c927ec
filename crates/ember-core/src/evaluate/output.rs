//! Output stream interception.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07")
        .expect("ANSI escape pattern must compile")
});

/// Remove ANSI escape sequences from terminal output.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Which process stream a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn parse(name: &str) -> Self {
        if name == "stderr" {
            Stream::Stderr
        } else {
            Stream::Stdout
        }
    }
}

/// State of the process output streams for one run.
#[derive(Debug, Default)]
pub struct OutputStreams {
    captured: bool,
    restores: usize,
}

impl OutputStreams {
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    /// True while writes are turned into notebook events.
    pub fn is_captured(&self) -> bool {
        self.captured
    }

    /// How many times capture was released.
    pub fn restore_count(&self) -> usize {
        self.restores
    }

    /// Write straight to the real process stream.
    pub fn pass_through(stream: Stream, text: &str) {
        let written = match stream {
            Stream::Stdout => std::io::stdout().write_all(text.as_bytes()),
            Stream::Stderr => std::io::stderr().write_all(text.as_bytes()),
        };
        if let Err(err) = written {
            tracing::debug!("Could not pass output through to {:?}: {}", stream, err);
        }
    }
}

/// Guard that keeps the output streams captured while alive.
///
/// Dropping the guard restores pass-through output.
#[derive(Debug)]
pub struct OutputCapture {
    streams: Rc<RefCell<OutputStreams>>,
}

impl OutputCapture {
    pub fn acquire(streams: &Rc<RefCell<OutputStreams>>) -> Self {
        streams.borrow_mut().captured = true;
        tracing::trace!("Output capture acquired");
        Self {
            streams: Rc::clone(streams),
        }
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        let mut streams = self.streams.borrow_mut();
        streams.captured = false;
        streams.restores += 1;
        tracing::trace!("Output capture released");
    }
}
