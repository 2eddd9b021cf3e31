use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{OpenAiStreamChoice, OpenAiStreamChunk};
use crate::config::LimitsConfig;
use crate::error::StreamError;
use crate::protocol::accumulator::{AccumulatorKey, ToolCallAccumulator, ToolCallSeed};
use crate::protocol::mapping::{merge_usage, openai_usage_to_unified, NormalizerTables, Vendor};
use crate::protocol::request::RequestContext;
use crate::protocol::result::{
    ChatChoice, ChatMessage, ChatResult, ChatUsage, FinishReason, Role, StreamInternalKind,
};
use crate::stream::{Flow, LineDecoder, LineFramed};
use crate::util::{classify_data_line, vendor_error, DataLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Text,
    Tools,
}

/// Decoder for `data: {chunk}` lines terminated by `data: [DONE]`.
///
/// Text chunks pass through as they arrive. Once the first choice carries
/// tool-call fragments the decoder switches to accumulation and emits
/// nothing further until the stream ends, when one tool-call terminal is
/// produced.
pub struct OpenAiStreamDecoder {
    ctx: RequestContext,
    tables: Arc<NormalizerTables>,
    state: ParseState,
    text: ChatMessage,
    tools: ToolCallAccumulator,
    call_ids: FxHashMap<u32, String>,
    usage: Option<ChatUsage>,
    last_finish: Option<String>,
    done: bool,
}

impl OpenAiStreamDecoder {
    #[must_use]
    pub fn new(ctx: RequestContext, tables: Arc<NormalizerTables>) -> Self {
        Self {
            ctx,
            tables,
            state: ParseState::Text,
            text: ChatMessage::new(Role::Assistant),
            tools: ToolCallAccumulator::new(),
            call_ids: FxHashMap::default(),
            usage: None,
            last_finish: None,
            done: false,
        }
    }

    /// Wrap in a line splitter honoring the configured line limit.
    #[must_use]
    pub fn framed(self, limits: &LimitsConfig) -> LineFramed<Self> {
        LineFramed::new(self, limits.max_line_bytes)
    }

    fn map_finish(&self, raw: &str) -> FinishReason {
        self.tables.map_finish_reason(Vendor::OpenAi, raw)
    }

    fn merge_usage_value(&mut self, value: &Value) -> ChatUsage {
        let partial = openai_usage_to_unified(value);
        self.usage = Some(merge_usage(&partial, &self.usage.unwrap_or_default()));
        partial
    }

    fn handle_chunk(
        &mut self,
        chunk: OpenAiStreamChunk,
        out: &mut Vec<ChatResult>,
    ) -> Result<(), StreamError> {
        if let Some(error) = chunk.error.as_ref().filter(|error| !error.is_null()) {
            return Err(vendor_error(Vendor::OpenAi, error));
        }
        let inline_usage = match chunk.usage.as_ref() {
            Some(usage) if usage.is_object() => Some(self.merge_usage_value(usage)),
            _ => None,
        };

        let Some(first) = chunk.choices.first() else {
            // Usage-only event; choice-less chunks without usage (Azure's
            // prompt_filter_results) are dropped.
            if self.state == ParseState::Text && !self.ctx.include_usage && inline_usage.is_some() {
                out.push(ChatResult {
                    choices: Vec::new(),
                    usage: inline_usage,
                    kind: StreamInternalKind::Chunk,
                });
            }
            return Ok(());
        };
        if let Some(raw) = &first.finish_reason {
            self.last_finish = Some(raw.clone());
        }

        match self.state {
            ParseState::Text if first.delta.has_tool_calls() => {
                tracing::debug!("tool-call fragments seen, switching to accumulation");
                self.state = ParseState::Tools;
                self.feed_tool_fragments(first);
            }
            ParseState::Text => self.emit_text_chunk(chunk.choices, inline_usage, out),
            ParseState::Tools => self.feed_tool_fragments(first),
        }
        Ok(())
    }

    fn emit_text_chunk(
        &mut self,
        choices: Vec<OpenAiStreamChoice>,
        usage: Option<ChatUsage>,
        out: &mut Vec<ChatResult>,
    ) {
        let mut unified = Vec::with_capacity(choices.len());
        for (pos, choice) in choices.into_iter().enumerate() {
            let delta = ChatMessage {
                role: Role::Assistant,
                content: choice.delta.content.unwrap_or_default(),
                reasoning: choice.delta.reasoning_content.unwrap_or_default(),
                tool_calls: Vec::new(),
            };
            if pos == 0 {
                self.text.push_content(&delta.content);
                self.text.push_reasoning(&delta.reasoning);
            }
            let finish_reason = choice
                .finish_reason
                .as_deref()
                .map_or(FinishReason::Unknown, |raw| self.map_finish(raw));
            unified.push(ChatChoice {
                index: choice.index,
                delta: Some(delta),
                message: None,
                finish_reason,
            });
        }
        out.push(ChatResult {
            choices: unified,
            usage,
            kind: StreamInternalKind::Chunk,
        });
    }

    fn feed_tool_fragments(&mut self, choice: &OpenAiStreamChoice) {
        let Some(fragments) = &choice.delta.tool_calls else {
            return;
        };
        for fragment in fragments {
            let function = fragment.function.as_ref();
            let name = function.and_then(|f| f.name.as_deref());
            let args = function.and_then(|f| f.arguments.as_deref()).unwrap_or("");
            let id = fragment.id.as_deref().filter(|id| !id.is_empty());
            let seed = ToolCallSeed {
                id: id.map(str::to_string),
                index: fragment.index,
                name: name.unwrap_or_default().to_string(),
            };

            // OpenAI sends `id` only on the first fragment; later fragments
            // route through the id last opened at their `index`.
            let current = self.call_ids.get(&fragment.index).cloned();
            let key = match (id, current.as_deref()) {
                (Some(id), Some(current)) if id == current => AccumulatorKey::from_id(id),
                (Some(id), current) => {
                    if current.is_some() {
                        tracing::debug!(index = fragment.index, id, "new tool call reuses an open index");
                    }
                    self.call_ids.insert(fragment.index, id.to_string());
                    self.tools.open(AccumulatorKey::from_id(id), seed, args);
                    continue;
                }
                (None, Some(current)) => AccumulatorKey::from_id(current),
                (None, None) => AccumulatorKey::from_index(fragment.index),
            };

            if self.tools.contains(&key) {
                self.tools.feed_or_open(&key, seed, args);
                if let Some(name) = name {
                    self.tools.set_name_if_empty(&key, name);
                }
            } else if name.is_some() {
                self.tools.open(key, seed, args);
            } else {
                self.tools.feed_or_open(&key, seed, args);
            }
        }
    }

    fn tool_finish_reason(&self) -> FinishReason {
        match self.last_finish.as_deref() {
            None if !self.done => {
                tracing::warn!(
                    err = %StreamError::TruncatedStream { vendor: Vendor::OpenAi },
                    open_calls = self.tools.len(),
                    "force-closing tool calls"
                );
                FinishReason::Unknown
            }
            None => FinishReason::ToolCalls,
            Some(raw) if self.tables.is_tool_finish(Vendor::OpenAi, raw) => FinishReason::ToolCalls,
            Some(raw) => self.map_finish(raw),
        }
    }
}

impl LineDecoder for OpenAiStreamDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::OpenAi
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<ChatResult>) -> Result<Flow, StreamError> {
        match classify_data_line(line, true) {
            DataLine::Ignore => Ok(Flow::Continue),
            DataLine::Done => {
                self.done = true;
                Ok(Flow::Stop)
            }
            DataLine::Payload(payload) => {
                let chunk: OpenAiStreamChunk = serde_json::from_str(payload)
                    .map_err(|e| StreamError::malformed(Vendor::OpenAi, e.to_string()))?;
                self.handle_chunk(chunk, out)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn finish(&mut self, out: &mut Vec<ChatResult>) -> Result<(), StreamError> {
        match self.state {
            ParseState::Tools => {
                let finish_reason = self.tool_finish_reason();
                let calls = self.tools.close_all();
                self.call_ids.clear();
                out.push(ChatResult::tool_calls(calls, finish_reason, self.usage));
                self.state = ParseState::Text;
            }
            ParseState::Text if self.text.has_text() => {
                let finish_reason = self
                    .last_finish
                    .as_deref()
                    .map_or(FinishReason::Unknown, |raw| self.map_finish(raw));
                out.push(ChatResult::append_full_assistant_message(
                    self.text.take(),
                    finish_reason,
                    self.usage,
                ));
            }
            ParseState::Text => {}
        }
        Ok(())
    }

    fn usage(&self) -> Option<ChatUsage> {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(ctx: RequestContext) -> OpenAiStreamDecoder {
        OpenAiStreamDecoder::new(ctx, Arc::new(NormalizerTables::builtin()))
    }

    fn run(dec: &mut OpenAiStreamDecoder, lines: &[&str]) -> Vec<ChatResult> {
        let mut out = Vec::new();
        for line in lines {
            if dec.decode_line(line, &mut out).unwrap() == Flow::Stop {
                break;
            }
        }
        dec.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn test_text_chunks_pass_through_with_assistant_role() {
        let mut dec = decoder(RequestContext::new());
        let out = run(
            &mut dec,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].delta_text(), "Hel");
        assert_eq!(out[0].choices[0].delta.as_ref().unwrap().role, Role::Assistant);
        assert_eq!(out[1].choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(out[2].kind, StreamInternalKind::AppendFullAssistantMessage);
        let full = out[2].choices[0].message.as_ref().unwrap();
        assert_eq!(full.content, "Hello");
        assert_eq!(out[2].choices[0].finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_tool_fragments_are_consumed_until_end() {
        let mut dec = decoder(RequestContext::new().with_tools(true));
        let out = run(
            &mut dec,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"calc","arguments":""}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":1"}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"ignored","tool_calls":[{"index":0,"function":{"arguments":"234}"}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(out.len(), 1);
        let terminal = &out[0];
        assert_eq!(terminal.choices[0].finish_reason, FinishReason::ToolCalls);
        let message = terminal.choices[0].message.as_ref().unwrap();
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].id.as_deref(), Some("call_abc"));
        assert_eq!(message.tool_calls[0].function.name, "calc");
        assert_eq!(message.tool_calls[0].function.arguments, "{\"a\":1234}");
    }

    #[test]
    fn test_usage_only_event_merged_when_requested() {
        let mut dec = decoder(RequestContext::new().with_usage(true));
        let out = run(
            &mut dec,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"content":"ok"},"finish_reason":"stop"}]}"#,
                r#"data: {"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":1,"total_tokens":10}}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].kind, StreamInternalKind::AppendFullAssistantMessage);
        let usage = out[1].usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(9));
        assert_eq!(usage.total_tokens, Some(10));
        assert_eq!(dec.usage().and_then(|u| u.completion_tokens), Some(1));
    }

    #[test]
    fn test_usage_only_event_yielded_when_not_requested() {
        let mut dec = decoder(RequestContext::new());
        let mut out = Vec::new();
        dec.decode_line(
            r#"data: {"choices":[],"usage":{"prompt_tokens":3}}"#,
            &mut out,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].choices.is_empty());
        assert_eq!(out[0].usage.unwrap().prompt_tokens, Some(3));
    }

    #[test]
    fn test_choiceless_chunk_without_usage_dropped() {
        let mut dec = decoder(RequestContext::new());
        let mut out = Vec::new();
        dec.decode_line(
            r#"data: {"choices":[],"prompt_filter_results":[{"prompt_index":0,"content_filter_results":{}}]}"#,
            &mut out,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_line_is_recoverable() {
        let mut dec = decoder(RequestContext::new());
        let err = dec.decode_line("data: {not json", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, StreamError::MalformedEvent { vendor: Vendor::OpenAi, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_error_chunk_is_vendor_reported() {
        let mut dec = decoder(RequestContext::new());
        let err = dec
            .decode_line(
                r#"data: {"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#,
                &mut Vec::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            StreamError::VendorReported {
                vendor: Vendor::OpenAi,
                code: "rate_limit_exceeded".into(),
                message: "Rate limit reached".into(),
            }
        );
    }

    #[test]
    fn test_truncated_tool_stream_finishes_unknown() {
        let mut dec = decoder(RequestContext::new().with_tools(true));
        let out = run(
            &mut dec,
            &[r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"f","arguments":"{\"q\":"}}]}}]}"#],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices[0].finish_reason, FinishReason::Unknown);
        let call = &out[0].choices[0].message.as_ref().unwrap().tool_calls[0];
        assert_eq!(call.function.arguments, "{\"q\":");
        assert!(!call.has_complete_arguments());
    }

    #[test]
    fn test_reasoning_content_passes_through() {
        let mut dec = decoder(RequestContext::new());
        let out = run(
            &mut dec,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"reasoning_content":"think"}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"answer"}}]}"#,
            ],
        );
        assert_eq!(out[0].choices[0].delta.as_ref().unwrap().reasoning, "think");
        let full = out[2].choices[0].message.as_ref().unwrap();
        assert_eq!(full.reasoning, "think");
        assert_eq!(full.content, "answer");
        assert_eq!(out[2].choices[0].finish_reason, FinishReason::Unknown);
    }

    #[test]
    fn test_parallel_tool_calls_keep_first_open_order() {
        let mut dec = decoder(RequestContext::new().with_tools(true));
        let out = run(
            &mut dec,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"one","arguments":"{}"}},{"index":1,"id":"b","function":{"name":"two","arguments":"["}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"function":{"arguments":"1]"}}]},"finish_reason":"tool_calls"}]}"#,
                "data: [DONE]",
            ],
        );
        let calls = &out[0].choices[0].message.as_ref().unwrap().tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "one");
        assert_eq!(calls[1].function.arguments, "[1]");
    }
}
