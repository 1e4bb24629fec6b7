//! Per-channel demultiplexing of the runtime's output streams.
//!
//! Each output channel is consumed line by line. A line that begins the frame
//! open-delimiter (re)starts frame accumulation; accumulated lines are joined
//! until one ends with the frame terminator, at which point the candidate is
//! structurally parsed and dispatched to the pending-call registry. Everything
//! else is console output and is forwarded verbatim to the sink.
//!
//! Channel identity is load-bearing: frames arriving on stderr reject their
//! pending call, frames arriving on stdout resolve it.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::frame;
use crate::pending::PendingCalls;

/// Receives child-process console output that was not part of a frame.
pub trait ConsoleSink: Send + Sync {
    fn stdout_line(&self, line: &str);
    fn stderr_line(&self, line: &str);
}

/// Default sink: forwards console output through the `log` facade, tagging
/// the error channel with error severity.
pub struct LogConsoleSink;

impl ConsoleSink for LogConsoleSink {
    fn stdout_line(&self, line: &str) {
        log::info!(target: "node_bridge::console", "{line}");
    }

    fn stderr_line(&self, line: &str) {
        log::error!(target: "node_bridge::console", "{line}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Out,
    Err,
}

/// Reads one output channel to EOF, routing frames to the registry and
/// everything else to the console sink. Runs as its own task per channel.
pub(crate) async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    channel: Channel,
    calls: Arc<PendingCalls>,
    sink: Arc<dyn ConsoleSink>,
) {
    let mut lines = BufReader::new(reader).lines();
    let mut accumulation: Option<String> = None;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&line, &mut accumulation, channel, &calls, &sink),
            Ok(None) => break,
            Err(err) => {
                log::debug!("stopped reading runtime {channel:?} stream: {err}");
                break;
            }
        }
    }
}

pub(crate) fn handle_line(
    line: &str,
    accumulation: &mut Option<String>,
    channel: Channel,
    calls: &PendingCalls,
    sink: &Arc<dyn ConsoleSink>,
) {
    if line.is_empty() {
        return;
    }

    if line.starts_with(frame::OPEN) {
        *accumulation = Some(String::new());
    }

    if let Some(buffer) = accumulation.as_mut() {
        buffer.push_str(line);

        if buffer.ends_with(frame::END) {
            let candidate = accumulation.take().unwrap_or_default();
            dispatch(&candidate, channel, calls);
        }

        return;
    }

    match channel {
        Channel::Out => sink.stdout_line(line),
        Channel::Err => sink.stderr_line(line),
    }
}

fn dispatch(candidate: &str, channel: Channel, calls: &PendingCalls) {
    let Some(frame) = frame::parse(candidate) else {
        log::debug!("dropping malformed frame candidate ({} bytes)", candidate.len());
        return;
    };

    if frame.kind != frame::SCRIPT_KIND {
        log::debug!("dropping frame with unknown kind '{}'", frame.kind);
        return;
    }

    match channel {
        Channel::Out => calls.resolve(frame.id, frame.content),
        Channel::Err => calls.reject(frame.id, frame.content),
    }
}
