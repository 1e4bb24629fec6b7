use std::sync::Mutex;

use crate::demux::ConsoleSink;

mod node_runtime;

/// Console sink that records routed lines for assertions.
#[derive(Default)]
pub(crate) struct CaptureSink {
    pub(crate) out: Mutex<Vec<String>>,
    pub(crate) err: Mutex<Vec<String>>,
}

impl ConsoleSink for CaptureSink {
    fn stdout_line(&self, line: &str) {
        self.out.lock().unwrap().push(line.to_string());
    }

    fn stderr_line(&self, line: &str) {
        self.err.lock().unwrap().push(line.to_string());
    }
}
