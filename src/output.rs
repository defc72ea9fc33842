//! Output streaming for supervised processes.
//!
//! Each pipe is read line by line with a hard cap on line length, and every
//! line is fanned out to the debug log, the event sink and the failure-pattern
//! scan of the owning command.

use std::io;
use std::sync::Arc;

use strip_ansi_escapes::strip;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::classify::FailurePatterns;
use crate::events::{EngineEvent, EventSink};
use crate::logging::LogSink;

/// Upper bound for a single line. Longer lines are cut at this size.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Line-delimited reader that never buffers more than `max_len` bytes per line.
///
/// Bytes past the cap are discarded up to the next newline, so a child writing
/// one endless line keeps making progress instead of filling its pipe.
pub struct BoundedLines<R> {
    reader: BufReader<R>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> BoundedLines<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_len,
        }
    }

    /// Returns the next line without its terminator, or `None` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut seen_any = false;
        loop {
            let (consumed, complete) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                seen_any = true;
                let (chunk, consumed, complete) =
                    match available.iter().position(|b| *b == b'\n') {
                        Some(pos) => (&available[..pos], pos + 1, true),
                        None => (available, available.len(), false),
                    };
                let room = self.max_len.saturating_sub(line.len());
                line.extend_from_slice(&chunk[..chunk.len().min(room)]);
                (consumed, complete)
            };
            self.reader.consume(consumed);
            if complete {
                break;
            }
        }

        if !seen_any {
            return Ok(None);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Where lines of one command end up.
#[derive(Clone)]
pub struct LineTarget {
    pub id: String,
    pub events: Arc<dyn EventSink>,
    pub log: Arc<dyn LogSink>,
    pub patterns: Arc<FailurePatterns>,
}

impl LineTarget {
    /// Hands one line to the log, the event sink and the pattern scan.
    pub fn deliver(&self, stream: StreamKind, line: String) {
        self.log
            .debug(&self.id, &format!("{}: {}", stream.as_str(), line));
        let matched = self.patterns.first_match(&line).map(str::to_owned);
        self.events.emit(EngineEvent::NewLogEntry {
            id: self.id.clone(),
            line,
        });
        if let Some(pattern) = matched {
            self.log
                .debug(&self.id, &format!("failure pattern matched: {}", pattern));
            self.events.emit(EngineEvent::FailureDetected {
                id: self.id.clone(),
            });
        }
    }
}

/// Drains `reader` until it closes, delivering every line to `target`.
pub async fn forward_lines<R>(stream: StreamKind, reader: R, target: LineTarget)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BoundedLines::new(reader, MAX_LINE_BYTES);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => target.deliver(stream, line),
            Ok(None) => break,
            Err(err) => {
                target.log.debug(
                    &target.id,
                    &format!("{} read failed: {}", stream.as_str(), err),
                );
                break;
            }
        }
    }
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
