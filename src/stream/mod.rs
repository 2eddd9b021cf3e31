pub mod driver;
pub mod json_array;
pub mod lines;

pub use driver::{decode_byte_stream, decode_text_chunks, DecodeIter};
pub use json_array::{ArrayItem, JsonArrayScanner};
pub use lines::LineSplitter;

use crate::error::StreamError;
use crate::protocol::mapping::Vendor;
use crate::protocol::result::{ChatResult, ChatUsage};

/// Whether the decoder wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A terminator (sentinel, array end) was seen; the source must not be
    /// read any further.
    Stop,
}

/// Per-stream counters reported in the completion log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Lines or array elements handed to the vendor decoder.
    pub units: u64,
    /// Units skipped because they could not be decoded.
    pub malformed: u64,
}

/// An incremental decoder turning one response body into unified results.
///
/// `feed` may be called with text split at any character boundary. Results
/// are appended to `out` in emission order.
pub trait StreamDecoder {
    fn vendor(&self) -> Vendor;

    /// # Errors
    ///
    /// Returns a non-recoverable [`StreamError`] when the vendor aborted the
    /// stream; the sequence ends after results already in `out`.
    fn feed(&mut self, text: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError>;

    /// Flush buffered state and emit terminal events.
    ///
    /// # Errors
    ///
    /// Same contract as [`feed`](Self::feed).
    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError>;

    fn stats(&self) -> DecodeStats;

    /// Usage accumulated so far, if the vendor reported any.
    fn usage(&self) -> Option<ChatUsage>;
}

/// A decoder whose wire unit is one text line.
pub trait LineDecoder {
    fn vendor(&self) -> Vendor;

    /// Decode one line (terminator already stripped).
    ///
    /// # Errors
    ///
    /// Recoverable errors (see [`StreamError::is_recoverable`]) cause the line
    /// to be skipped; any other error ends the sequence.
    fn decode_line(&mut self, line: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError>;

    /// # Errors
    ///
    /// Returns a non-recoverable [`StreamError`] to fail the sequence.
    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError>;

    fn usage(&self) -> Option<ChatUsage>;
}

/// Adapts a [`LineDecoder`] to raw text input.
pub struct LineFramed<D> {
    inner: D,
    splitter: LineSplitter,
    lines: Vec<String>,
    stopped: bool,
    stats: DecodeStats,
}

impl<D: LineDecoder> LineFramed<D> {
    #[must_use]
    pub fn new(inner: D, max_line_bytes: usize) -> Self {
        Self {
            inner,
            splitter: LineSplitter::new(max_line_bytes),
            lines: Vec::with_capacity(16),
            stopped: false,
            stats: DecodeStats::default(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn decode_one(&mut self, line: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError> {
        self.stats.units += 1;
        match self.inner.decode_line(line, out) {
            Ok(flow) => Ok(flow),
            Err(err) if err.is_recoverable() => {
                tracing::warn!(vendor = %self.inner.vendor(), %err, "skipping undecodable line");
                self.stats.malformed += 1;
                Ok(Flow::Continue)
            }
            Err(err) => Err(err),
        }
    }
}

impl<D: LineDecoder> StreamDecoder for LineFramed<D> {
    fn vendor(&self) -> Vendor {
        self.inner.vendor()
    }

    fn feed(&mut self, text: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError> {
        if self.stopped {
            return Ok(Flow::Stop);
        }
        let dropped = self.splitter.feed_into(text, &mut self.lines);
        if dropped > 0 {
            tracing::warn!(
                vendor = %self.inner.vendor(),
                dropped,
                "dropping lines over the configured length limit"
            );
            self.stats.malformed += dropped as u64;
        }

        let mut lines = std::mem::take(&mut self.lines);
        let mut result = Ok(Flow::Continue);
        for line in lines.drain(..) {
            match self.decode_one(&line, out) {
                Ok(Flow::Continue) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        lines.clear();
        self.lines = lines;

        if result == Ok(Flow::Stop) {
            self.stopped = true;
        }
        result
    }

    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError> {
        if !self.stopped {
            if let Some(tail) = self.splitter.finish() {
                if self.decode_one(&tail, out)? == Flow::Stop {
                    self.stopped = true;
                }
            }
        }
        self.inner.finish(out)
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn usage(&self) -> Option<ChatUsage> {
        self.inner.usage()
    }
}

impl<T: StreamDecoder + ?Sized> StreamDecoder for Box<T> {
    fn vendor(&self) -> Vendor {
        (**self).vendor()
    }

    fn feed(&mut self, text: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError> {
        (**self).feed(text, out)
    }

    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError> {
        (**self).finish(out)
    }

    fn stats(&self) -> DecodeStats {
        (**self).stats()
    }

    fn usage(&self) -> Option<ChatUsage> {
        (**self).usage()
    }
}
