use std::sync::Arc;

use super::{GeminiCandidate, GeminiResponse};
use crate::config::LimitsConfig;
use crate::error::StreamError;
use crate::protocol::accumulator::{AccumulatorKey, ToolCallAccumulator, ToolCallSeed};
use crate::protocol::mapping::{gemini_usage_to_unified, merge_usage, NormalizerTables, Vendor};
use crate::protocol::request::RequestContext;
use crate::protocol::result::{
    ChatChoice, ChatMessage, ChatResult, ChatUsage, FinishReason, Role, StreamInternalKind,
};
use crate::stream::{ArrayItem, DecodeStats, Flow, JsonArrayScanner, StreamDecoder};
use crate::util::{next_call_id, vendor_error};

/// Decoder for a body that is one JSON array of response objects.
///
/// Elements are extracted incrementally and decoded one at a time. In
/// buffering mode (strict structured output) nothing is yielded until the
/// array closes, when the concatenated text becomes a single tool call.
pub struct GeminiStreamDecoder {
    ctx: RequestContext,
    tables: Arc<NormalizerTables>,
    scanner: JsonArrayScanner,
    items: Vec<ArrayItem>,
    buffering: bool,
    text: ChatMessage,
    tools: ToolCallAccumulator,
    next_tool_index: u32,
    saw_function_call: bool,
    usage: Option<ChatUsage>,
    last_finish: FinishReason,
    stats: DecodeStats,
    stopped: bool,
}

impl GeminiStreamDecoder {
    #[must_use]
    pub fn new(ctx: RequestContext, tables: Arc<NormalizerTables>, limits: &LimitsConfig) -> Self {
        let buffering = ctx.buffers_structured_output();
        Self {
            ctx,
            tables,
            scanner: JsonArrayScanner::new(limits.max_element_bytes),
            items: Vec::with_capacity(4),
            buffering,
            text: ChatMessage::new(Role::Assistant),
            tools: ToolCallAccumulator::new(),
            next_tool_index: 0,
            saw_function_call: false,
            usage: None,
            last_finish: FinishReason::Unknown,
            stats: DecodeStats::default(),
            stopped: false,
        }
    }

    fn handle_element(&mut self, json: &str, out: &mut Vec<ChatResult>) -> Result<(), StreamError> {
        let response: GeminiResponse = serde_json::from_str(json)
            .map_err(|e| StreamError::malformed(Vendor::Gemini, e.to_string()))?;
        if let Some(error) = response.error.as_ref().filter(|error| !error.is_null()) {
            return Err(vendor_error(Vendor::Gemini, error));
        }

        let snapshot = response.usage_metadata.as_ref().map(gemini_usage_to_unified);
        if let Some(snapshot) = &snapshot {
            self.usage = Some(merge_usage(snapshot, &self.usage.unwrap_or_default()));
        }

        let mut choices = Vec::with_capacity(response.candidates.len());
        for (pos, candidate) in response.candidates.into_iter().enumerate() {
            let index = candidate
                .index
                .unwrap_or_else(|| u32::try_from(pos).unwrap_or(u32::MAX));
            choices.push(self.decode_candidate(index, candidate));
        }

        if !self.buffering {
            out.push(ChatResult {
                choices,
                usage: snapshot,
                kind: StreamInternalKind::Chunk,
            });
        }
        Ok(())
    }

    fn decode_candidate(&mut self, index: u32, candidate: GeminiCandidate) -> ChatChoice {
        let mut delta = ChatMessage::new(Role::Assistant);
        let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
        for part in parts {
            if let Some(call) = part.function_call {
                if self.buffering {
                    tracing::debug!(name = %call.name, "ignoring function call while buffering structured output");
                    continue;
                }
                let id = call.id.filter(|id| !id.is_empty()).unwrap_or_else(next_call_id);
                let key = AccumulatorKey::from_id(&id);
                let arguments = call.args.map_or_else(|| "{}".to_string(), |args| args.to_string());
                let seed = ToolCallSeed {
                    id: Some(id),
                    index: self.next_tool_index,
                    name: call.name,
                };
                self.next_tool_index += 1;
                self.tools.open(key.clone(), seed, &arguments);
                match self.tools.close(&key) {
                    Ok(tool_call) => delta.tool_calls.push(tool_call),
                    Err(err) => tracing::debug!(%err, "function call vanished before close"),
                }
            } else if let Some(text) = part.text {
                if part.thought {
                    delta.push_reasoning(&text);
                } else {
                    delta.push_content(&text);
                }
            }
        }

        let has_calls = !delta.tool_calls.is_empty();
        let mut finish_reason = candidate
            .finish_reason
            .as_deref()
            .map_or(FinishReason::Unknown, |raw| {
                self.tables.map_finish_reason(Vendor::Gemini, raw)
            });
        // Gemini reports STOP for tool turns.
        if finish_reason == FinishReason::Stop && has_calls {
            finish_reason = FinishReason::ToolCalls;
        }

        if index == 0 {
            self.text.push_content(&delta.content);
            self.text.push_reasoning(&delta.reasoning);
            self.saw_function_call |= has_calls;
            if candidate.finish_reason.is_some() {
                self.last_finish = finish_reason;
            }
        }

        ChatChoice {
            index,
            delta: Some(delta),
            message: None,
            finish_reason,
        }
    }

    fn turn_finish_reason(&self) -> FinishReason {
        if !self.scanner.is_complete() {
            return FinishReason::Unknown;
        }
        if self.last_finish == FinishReason::Stop && self.saw_function_call {
            FinishReason::ToolCalls
        } else {
            self.last_finish
        }
    }

    fn finish_buffered(&mut self, out: &mut Vec<ChatResult>) {
        let name = self.ctx.strict_function_name().unwrap_or_default().to_string();
        let arguments = self.text.take().content;
        let id = next_call_id();
        let key = AccumulatorKey::from_id(&id);
        let seed = ToolCallSeed {
            id: Some(id),
            index: 0,
            name,
        };
        self.tools.open(key, seed, &arguments);
        let calls = self.tools.close_all();
        let finish_reason = if self.scanner.is_complete() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Unknown
        };
        out.push(ChatResult::tool_calls(calls, finish_reason, self.usage));
    }
}

impl StreamDecoder for GeminiStreamDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Gemini
    }

    fn feed(&mut self, text: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError> {
        if self.stopped {
            return Ok(Flow::Stop);
        }
        self.scanner.feed_into(text, &mut self.items);

        let mut items = std::mem::take(&mut self.items);
        let mut result = Ok(Flow::Continue);
        for item in items.drain(..) {
            match item {
                ArrayItem::Element(json) => {
                    self.stats.units += 1;
                    match self.handle_element(&json, out) {
                        Ok(()) => {}
                        Err(err) if err.is_recoverable() => {
                            tracing::warn!(vendor = %Vendor::Gemini, %err, "skipping undecodable element");
                            self.stats.malformed += 1;
                        }
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    }
                }
                ArrayItem::Oversized => {
                    self.stats.units += 1;
                    self.stats.malformed += 1;
                    tracing::warn!(vendor = %Vendor::Gemini, "dropping element over the configured size limit");
                }
                ArrayItem::Unexpected(byte) => {
                    self.stats.malformed += 1;
                    tracing::debug!(vendor = %Vendor::Gemini, %byte, "unexpected byte outside array element");
                }
                ArrayItem::End => {
                    self.stopped = true;
                    result = Ok(Flow::Stop);
                    break;
                }
            }
        }
        items.clear();
        self.items = items;
        result
    }

    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError> {
        if !self.scanner.is_complete() && self.scanner.has_started() {
            tracing::warn!(
                err = %StreamError::TruncatedStream { vendor: Vendor::Gemini },
                "body ended before the closing bracket"
            );
        }
        if self.buffering {
            self.finish_buffered(out);
            return Ok(());
        }

        let finish_reason = self.turn_finish_reason();
        if self.text.has_text() {
            out.push(ChatResult::append_full_assistant_message(
                self.text.take(),
                finish_reason,
                self.usage,
            ));
        }
        out.push(ChatResult::finish_data(finish_reason, self.usage));
        Ok(())
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn usage(&self) -> Option<ChatUsage> {
        self.usage
    }
}
