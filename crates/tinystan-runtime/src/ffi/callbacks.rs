//! Print capture - route foreign print output to the caller
//!
//! The module's print hook appends each line to an accumulator owned by one
//! `PrintCapture`, then hands the accumulator to the caller's sink. Only the
//! sink ever clears it, so a caller can tell which output belongs to which
//! invocation by taking the delta.

use crate::ffi::module::PrintHook;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Caller-supplied sink; receives the whole accumulator after every line
///
/// The sink runs while the accumulator is locked and must not call back
/// into the owning `PrintCapture`.
pub type PrintSink = Box<dyn FnMut(&mut String) + Send>;

struct CaptureState {
    accumulated: String,
    sink: PrintSink,
}

/// Accumulator plus sink, shared between the binding and the print hook
#[derive(Clone)]
pub struct PrintCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl PrintCapture {
    pub fn new(sink: PrintSink) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState {
                accumulated: String::new(),
                sink,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one line and present the accumulator to the sink
    pub fn emit(&self, line: &str) {
        let mut state = self.lock();
        let CaptureState { accumulated, sink } = &mut *state;
        accumulated.push_str(line);
        accumulated.push('\n');
        sink(accumulated);
    }

    /// A print hook feeding this capture
    pub fn hook(&self) -> PrintHook {
        let capture = self.clone();
        Box::new(move |line: &str| capture.emit(line))
    }

    /// Snapshot of everything not yet cleared by the sink
    pub fn accumulated(&self) -> String {
        self.lock().accumulated.clone()
    }
}

/// Reassembles a byte stream into lines for a `PrintHook`
///
/// Native modules report output in arbitrary chunks; a partial line is held
/// until its newline arrives or the splitter is flushed.
pub struct LineSplitter {
    pending: Vec<u8>,
    hook: PrintHook,
}

impl LineSplitter {
    pub fn new(hook: PrintHook) -> Self {
        Self {
            pending: Vec::new(),
            hook,
        }
    }

    /// Feed a chunk, emitting every completed line
    pub fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            (self.hook)(text.trim_end_matches('\r'));
        }
    }

    /// Emit any trailing partial line
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            (self.hook)(&String::from_utf8_lossy(&line));
        }
    }
}

impl Drop for LineSplitter {
    fn drop(&mut self) {
        self.flush();
    }
}
