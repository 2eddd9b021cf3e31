use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;

use super::{
    AnthropicBlockDeltaEvent, AnthropicBlockStartEvent, AnthropicBlockStopEvent,
    AnthropicContentBlock, AnthropicDelta, AnthropicErrorEvent, AnthropicMessageDeltaEvent,
    AnthropicMessageStartEvent,
};
use crate::config::LimitsConfig;
use crate::error::StreamError;
use crate::protocol::accumulator::{AccumulatorKey, ToolCallAccumulator, ToolCallSeed};
use crate::protocol::mapping::{anthropic_usage_to_unified, merge_usage, NormalizerTables, Vendor};
use crate::protocol::result::{ChatMessage, ChatResult, ChatUsage, FinishReason, Role, ToolCall};
use crate::stream::{Flow, LineDecoder, LineFramed};
use crate::util::vendor_error;

/// What the next `data:` line means, as announced by the last `event:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Read,
    MsgStart,
    MsgDelta,
    BlockStart,
    BlockDelta,
    BlockStop,
    Skip,
    Error,
}

impl ReadState {
    fn after_event(name: &str) -> Self {
        match name {
            "message_start" => ReadState::MsgStart,
            "message_delta" => ReadState::MsgDelta,
            "content_block_start" => ReadState::BlockStart,
            "content_block_delta" => ReadState::BlockDelta,
            "content_block_stop" => ReadState::BlockStop,
            "error" => ReadState::Error,
            "ping" | "message_stop" => ReadState::Skip,
            other => {
                tracing::debug!(event = other, "skipping unrecognized event");
                ReadState::Skip
            }
        }
    }
}

fn parse_payload<T: DeserializeOwned>(payload: &str) -> Result<T, StreamError> {
    serde_json::from_str(payload).map_err(|e| StreamError::malformed(Vendor::Anthropic, e.to_string()))
}

/// Decoder for named `event:`/`data:` pairs.
///
/// Each `event:` line selects a state; the following `data:` line is decoded
/// in that state and the decoder returns to `Read`. Only text and thinking
/// deltas are yielded as they arrive; tool-use blocks are accumulated by
/// block index and delivered in the terminal event.
pub struct AnthropicStreamDecoder {
    tables: Arc<NormalizerTables>,
    state: ReadState,
    text: ChatMessage,
    tools: ToolCallAccumulator,
    closed_calls: Vec<ToolCall>,
    block_inputs: FxHashMap<u32, String>,
    usage: Option<ChatUsage>,
    stop_reason: Option<String>,
    message_stopped: bool,
}

impl AnthropicStreamDecoder {
    #[must_use]
    pub fn new(tables: Arc<NormalizerTables>) -> Self {
        Self {
            tables,
            state: ReadState::Read,
            text: ChatMessage::new(Role::Assistant),
            tools: ToolCallAccumulator::new(),
            closed_calls: Vec::new(),
            block_inputs: FxHashMap::default(),
            usage: None,
            stop_reason: None,
            message_stopped: false,
        }
    }

    #[must_use]
    pub fn framed(self, limits: &LimitsConfig) -> LineFramed<Self> {
        LineFramed::new(self, limits.max_line_bytes)
    }

    fn merge_usage_value(&mut self, value: &serde_json::Value) {
        let partial = anthropic_usage_to_unified(value);
        self.usage = Some(merge_usage(&partial, &self.usage.unwrap_or_default()));
    }

    fn handle_data(
        &mut self,
        state: ReadState,
        payload: &str,
        out: &mut Vec<ChatResult>,
    ) -> Result<(), StreamError> {
        match state {
            ReadState::Read => {
                tracing::debug!("data line without a preceding event line");
            }
            ReadState::Skip => {}
            ReadState::MsgStart => {
                let event: AnthropicMessageStartEvent = parse_payload(payload)?;
                if let Some(usage) = &event.message.usage {
                    self.merge_usage_value(usage);
                }
            }
            ReadState::MsgDelta => {
                let event: AnthropicMessageDeltaEvent = parse_payload(payload)?;
                if let Some(reason) = event.delta.stop_reason {
                    self.stop_reason = Some(reason);
                }
                if let Some(usage) = &event.usage {
                    self.merge_usage_value(usage);
                }
            }
            ReadState::BlockStart => {
                let event: AnthropicBlockStartEvent = parse_payload(payload)?;
                if let AnthropicContentBlock::ToolUse { id, name, input } = event.content_block {
                    let input = input
                        .filter(|input| !input.is_null())
                        .map_or_else(|| "{}".to_string(), |input| input.to_string());
                    self.block_inputs.insert(event.index, input);
                    self.tools.open(
                        AccumulatorKey::from_index(event.index),
                        ToolCallSeed {
                            id: Some(id),
                            index: event.index,
                            name,
                        },
                        "",
                    );
                }
            }
            ReadState::BlockDelta => {
                let event: AnthropicBlockDeltaEvent = parse_payload(payload)?;
                self.apply_delta(event, out);
            }
            ReadState::BlockStop => {
                let event: AnthropicBlockStopEvent = parse_payload(payload)?;
                let key = AccumulatorKey::from_index(event.index);
                if self.tools.contains(&key) {
                    let mut call = self.tools.close(&key)?;
                    let input = self.block_inputs.remove(&event.index);
                    // No argument deltas: the block header carries the whole input.
                    if call.function.arguments.trim().is_empty() {
                        call.function.arguments = input.unwrap_or_else(|| "{}".to_string());
                    }
                    self.closed_calls.push(call);
                }
            }
            ReadState::Error => {
                return Err(match serde_json::from_str::<AnthropicErrorEvent>(payload) {
                    Ok(event) => vendor_error(Vendor::Anthropic, &event.error),
                    Err(_) => StreamError::VendorReported {
                        vendor: Vendor::Anthropic,
                        code: "unknown".to_string(),
                        message: payload.to_string(),
                    },
                });
            }
        }
        Ok(())
    }

    fn apply_delta(&mut self, event: AnthropicBlockDeltaEvent, out: &mut Vec<ChatResult>) {
        match event.delta {
            AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                self.text.push_content(&text);
                out.push(ChatResult::delta(
                    0,
                    ChatMessage::assistant_text(text),
                    FinishReason::Unknown,
                ));
            }
            AnthropicDelta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                self.text.push_reasoning(&thinking);
                let mut delta = ChatMessage::new(Role::Assistant);
                delta.reasoning = thinking;
                out.push(ChatResult::delta(0, delta, FinishReason::Unknown));
            }
            AnthropicDelta::InputJsonDelta { partial_json } => {
                let seed = ToolCallSeed {
                    id: None,
                    index: event.index,
                    name: String::new(),
                };
                self.tools
                    .feed_or_open(&AccumulatorKey::from_index(event.index), seed, &partial_json);
            }
            _ => {}
        }
    }

    fn terminal_finish_reason(&self, tool_turn: bool) -> FinishReason {
        if !self.message_stopped {
            return FinishReason::Unknown;
        }
        match self.stop_reason.as_deref() {
            Some(raw) if tool_turn && self.tables.is_tool_finish(Vendor::Anthropic, raw) => {
                FinishReason::ToolCalls
            }
            Some(raw) => self.tables.map_finish_reason(Vendor::Anthropic, raw),
            None if tool_turn => FinishReason::ToolCalls,
            None => FinishReason::Unknown,
        }
    }
}

impl LineDecoder for AnthropicStreamDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Anthropic
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return Ok(Flow::Continue);
        }
        if let Some(name) = line.strip_prefix("event:") {
            let name = name.trim();
            self.state = ReadState::after_event(name);
            if name == "message_stop" {
                self.message_stopped = true;
                return Ok(Flow::Stop);
            }
            return Ok(Flow::Continue);
        }
        if let Some(payload) = line.strip_prefix("data:") {
            let state = std::mem::replace(&mut self.state, ReadState::Read);
            self.handle_data(state, payload.trim(), out)?;
        }
        Ok(Flow::Continue)
    }

    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError> {
        let mut calls = std::mem::take(&mut self.closed_calls);
        let open_calls = self.tools.len();
        calls.extend(self.tools.close_all());
        let truncated = !self.message_stopped && (!calls.is_empty() || self.text.has_text());
        if truncated {
            tracing::warn!(
                err = %StreamError::TruncatedStream { vendor: Vendor::Anthropic },
                open_calls,
                "stream ended before message_stop"
            );
        }

        if !calls.is_empty() {
            let finish_reason = self.terminal_finish_reason(true);
            out.push(ChatResult::tool_calls(calls, finish_reason, self.usage));
        } else if self.text.has_text() {
            let finish_reason = self.terminal_finish_reason(false);
            out.push(ChatResult::append_full_assistant_message(
                self.text.take(),
                finish_reason,
                self.usage,
            ));
        }
        Ok(())
    }

    fn usage(&self) -> Option<ChatUsage> {
        self.usage
    }
}
