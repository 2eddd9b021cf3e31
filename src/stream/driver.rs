//! Pull-based drivers feeding a [`StreamDecoder`] from a byte stream or from
//! canned text chunks.
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{Flow, StreamDecoder};
use crate::error::StreamError;
use crate::observability::{log_stream_summary, StreamOutcome};
use crate::protocol::result::ChatResult;

type DecodeResult = Result<ChatResult, StreamError>;

struct DriveState<D> {
    decoder: D,
    remainder: Vec<u8>,
    scratch: Vec<ChatResult>,
    pending: VecDeque<DecodeResult>,
    finished: bool,
    outcome: StreamOutcome,
    logged: bool,
    emitted: u64,
    started: Instant,
}

impl<D: StreamDecoder> DriveState<D> {
    fn new(decoder: D) -> Self {
        Self {
            decoder,
            remainder: Vec::new(),
            scratch: Vec::with_capacity(8),
            pending: VecDeque::with_capacity(8),
            finished: false,
            outcome: StreamOutcome::Completed,
            logged: false,
            emitted: 0,
            started: Instant::now(),
        }
    }

    fn next_pending(&mut self) -> Option<DecodeResult> {
        let item = self.pending.pop_front()?;
        if item.is_ok() {
            self.emitted += 1;
        }
        Some(item)
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.remainder.extend_from_slice(bytes);
        let text = take_utf8_prefix(&mut self.remainder);
        if !text.is_empty() {
            self.push_text(&text);
        }
    }

    fn push_text(&mut self, text: &str) {
        let outcome = self.decoder.feed(text, &mut self.scratch);
        self.drain_scratch();
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => {
                self.remainder.clear();
                self.finish_decoder();
            }
            Err(err) => self.fail(err),
        }
    }

    fn end_of_input(&mut self) {
        if !self.remainder.is_empty() {
            let tail = String::from_utf8_lossy(&self.remainder).into_owned();
            self.remainder.clear();
            let outcome = self.decoder.feed(&tail, &mut self.scratch);
            self.drain_scratch();
            if let Err(err) = outcome {
                self.fail(err);
                return;
            }
        }
        self.finish_decoder();
    }

    fn finish_decoder(&mut self) {
        let outcome = self.decoder.finish(&mut self.scratch);
        self.drain_scratch();
        if let Err(err) = outcome {
            self.outcome = StreamOutcome::Failed;
            self.pending.push_back(Err(err));
        }
        self.finished = true;
    }

    fn fail(&mut self, err: StreamError) {
        self.outcome = StreamOutcome::Failed;
        self.pending.push_back(Err(err));
        self.finished = true;
    }

    fn cancel(&mut self) {
        tracing::debug!(vendor = %self.decoder.vendor(), "stream cancelled by caller");
        self.outcome = StreamOutcome::Cancelled;
        self.pending.clear();
        self.pending.push_back(Err(StreamError::Cancelled));
        self.finished = true;
    }

    fn drain_scratch(&mut self) {
        self.pending.extend(self.scratch.drain(..).map(Ok));
    }

    fn log_summary_once(&mut self) {
        if self.logged {
            return;
        }
        self.logged = true;
        log_stream_summary(
            self.decoder.vendor(),
            self.outcome,
            self.decoder.stats(),
            self.emitted,
            self.decoder.usage().as_ref(),
            self.started.elapsed(),
        );
    }
}

/// Take the longest decodable UTF-8 prefix out of `remainder`, leaving an
/// incomplete trailing sequence for the next chunk. Invalid sequences become
/// U+FFFD.
fn take_utf8_prefix(remainder: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut pos = 0;
    loop {
        match std::str::from_utf8(&remainder[pos..]) {
            Ok(valid) => {
                text.push_str(valid);
                pos = remainder.len();
                break;
            }
            Err(err) => {
                let valid_end = pos + err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&remainder[pos..valid_end]));
                match err.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pos = valid_end + len;
                    }
                    None => {
                        pos = valid_end;
                        break;
                    }
                }
            }
        }
    }
    remainder.drain(..pos);
    text
}

/// Decode a response body delivered as a byte stream.
///
/// The returned stream yields results in emission order. A transport error
/// ends it with [`StreamError::Transport`]; cancelling `cancel` ends it with a
/// single [`StreamError::Cancelled`] and no synthetic terminal event.
pub fn decode_byte_stream<D, S, E>(
    decoder: D,
    byte_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = DecodeResult> + Send
where
    D: StreamDecoder + Send + 'static,
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(byte_stream), DriveState::new(decoder), cancel),
        |(mut source, mut state, cancel)| async move {
            loop {
                if !state.finished && cancel.is_cancelled() {
                    state.cancel();
                }
                if let Some(item) = state.next_pending() {
                    return Some((item, (source, state, cancel)));
                }
                if state.finished {
                    state.log_summary_once();
                    return None;
                }

                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    chunk = source.next() => Some(chunk),
                };
                match next {
                    None => state.cancel(),
                    Some(Some(Ok(bytes))) => state.push_bytes(&bytes),
                    Some(Some(Err(err))) => state.fail(StreamError::Transport(err.to_string())),
                    Some(None) => state.end_of_input(),
                }
            }
        },
    )
}

/// Lazy synchronous decoding over already-available text chunks.
pub struct DecodeIter<D, I> {
    state: DriveState<D>,
    chunks: I,
    cancel: Option<CancellationToken>,
}

/// Decode canned text chunks, pulling one chunk at a time as results are
/// consumed.
pub fn decode_text_chunks<D, I>(
    decoder: D,
    chunks: I,
    cancel: Option<CancellationToken>,
) -> DecodeIter<D, I::IntoIter>
where
    D: StreamDecoder,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    DecodeIter {
        state: DriveState::new(decoder),
        chunks: chunks.into_iter(),
        cancel,
    }
}

impl<D, I> Iterator for DecodeIter<D, I>
where
    D: StreamDecoder,
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = DecodeResult;

    fn next(&mut self) -> Option<DecodeResult> {
        loop {
            let cancelled = self
                .cancel
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled);
            if cancelled && !self.state.finished {
                self.state.cancel();
            }
            if let Some(item) = self.state.next_pending() {
                return Some(item);
            }
            if self.state.finished {
                self.state.log_summary_once();
                return None;
            }
            match self.chunks.next() {
                Some(chunk) => self.state.push_text(chunk.as_ref()),
                None => self.state.end_of_input(),
            }
        }
    }
}
