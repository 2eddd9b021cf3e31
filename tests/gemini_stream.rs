use std::sync::Arc;

use chatstream::config::LimitsConfig;
use chatstream::error::StreamError;
use chatstream::protocol::gemini::GeminiStreamDecoder;
use chatstream::protocol::mapping::{NormalizerTables, Vendor};
use chatstream::protocol::request::RequestContext;
use chatstream::protocol::result::{ChatResult, FinishReason, Role, StreamInternalKind};
use chatstream::stream::{decode_text_chunks, StreamDecoder};

fn decoder(ctx: RequestContext) -> GeminiStreamDecoder {
    GeminiStreamDecoder::new(ctx, Arc::new(NormalizerTables::builtin()), &LimitsConfig::default())
}

fn collect(ctx: RequestContext, chunks: &[&str]) -> Vec<Result<ChatResult, StreamError>> {
    decode_text_chunks(decoder(ctx), chunks.iter(), None).collect()
}

fn collect_ok(ctx: RequestContext, chunks: &[&str]) -> Vec<ChatResult> {
    collect(ctx, chunks)
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("stream should not fail")
}

/// Synthetic events must be exactly the trailing append-full/finish-data pair.
fn assert_terminal_tail(results: &[ChatResult]) {
    let n = results.len();
    assert!(n >= 2);
    assert!(results[..n - 2].iter().all(|r| !r.is_synthetic()));
    assert_eq!(results[n - 2].kind, StreamInternalKind::AppendFullAssistantMessage);
    assert_eq!(results[n - 1].kind, StreamInternalKind::FinishData);
}

const TEXT_BODY: &str = r#"[{"candidates":[{"content":{"role":"model","parts":[{"text":"Roses are "}]},"index":0}],"modelVersion":"gemini-2.0-flash"}
,{"candidates":[{"content":{"role":"model","parts":[{"text":"red, [brackets] and {braces}"}]},"index":0}]}
,{"candidates":[{"content":{"role":"model","parts":[{"text":" \"quoted\""}]},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":6,"candidatesTokenCount":11,"totalTokenCount":17}}
]"#;

#[test]
fn test_text_stream_with_terminal_pair() {
    let results = collect_ok(RequestContext::new(), &[TEXT_BODY]);
    assert_eq!(results.len(), 5);
    let streamed: String = results[..3].iter().map(ChatResult::delta_text).collect();
    assert_eq!(streamed, "Roses are red, [brackets] and {braces} \"quoted\"");
    assert_terminal_tail(&results);

    let full = results[3].choices[0].message.as_ref().expect("message");
    assert_eq!(full.content, streamed);
    assert_eq!(results[3].choices[0].finish_reason, FinishReason::Stop);
    assert_eq!(results[4].choices[0].finish_reason, FinishReason::Stop);
    assert_eq!(results[4].usage.and_then(|u| u.total_tokens), Some(17));
}

#[test]
fn test_any_chunk_split_gives_same_results() {
    let whole = collect_ok(RequestContext::new(), &[TEXT_BODY]);
    for split in 1..TEXT_BODY.len() {
        let (left, right) = TEXT_BODY.split_at(split);
        assert_eq!(
            collect_ok(RequestContext::new(), &[left, right]),
            whole,
            "split at {split}"
        );
    }
}

#[test]
fn test_structured_output_buffered_into_one_tool_call() {
    let body = concat!(
        "[{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"{\\\"x\\\":\"}]}}]},\n",
        "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"42}\"}]},\"finishReason\":\"STOP\"}],",
        "\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":3}}]",
    );
    let results = collect_ok(RequestContext::new().with_strict_schema("extract"), &[body]);
    assert_eq!(results.len(), 1);
    let event = &results[0];
    assert_eq!(event.choices[0].finish_reason, FinishReason::ToolCalls);
    assert_eq!(event.usage.and_then(|u| u.prompt_tokens), Some(4));
    let message = event.choices[0].message.as_ref().expect("message");
    assert_eq!(message.role, Role::Tool);
    assert_eq!(message.tool_calls.len(), 1);
    assert_eq!(message.tool_calls[0].function.name, "extract");
    assert_eq!(message.tool_calls[0].function.arguments, "{\"x\":42}");
    assert!(message.tool_calls[0].has_complete_arguments());
}

#[test]
fn test_strict_tool_without_tools_streams_normally() {
    let mut ctx = RequestContext::new().with_strict_tool("extract");
    ctx.tools_requested = false;
    let results = collect_ok(ctx, &[TEXT_BODY]);
    assert_eq!(results.len(), 5);
    assert_terminal_tail(&results);
}

#[test]
fn test_function_call_upgrades_stop() {
    let body = r#"[{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_time","args":{"tz":"UTC"}}}]},"finishReason":"STOP"}]}]"#;
    let results = collect_ok(RequestContext::new().with_tools(true), &[body]);
    // Function call chunk, then finish-data; no text means no append-full.
    assert_eq!(results.len(), 2);
    let call_choice = &results[0].choices[0];
    assert_eq!(call_choice.finish_reason, FinishReason::ToolCalls);
    let call = &call_choice.delta.as_ref().expect("delta").tool_calls[0];
    assert_eq!(call.function.name, "get_time");
    assert_eq!(call.function.arguments, "{\"tz\":\"UTC\"}");
    assert!(call.id.as_deref().is_some_and(|id| id.starts_with("call_")));
    assert_eq!(results[1].kind, StreamInternalKind::FinishData);
    assert_eq!(results[1].choices[0].finish_reason, FinishReason::ToolCalls);
}

#[test]
fn test_truncated_array_recovers_with_unknown_finish() {
    let body = r#"[{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]},{"candidates":[{"content":{"parts":[{"text":" lost"#;
    let results = collect_ok(RequestContext::new(), &[body]);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].delta_text(), "partial");
    assert_terminal_tail(&results);
    assert_eq!(results[1].choices[0].message.as_ref().expect("message").content, "partial");
    assert_eq!(results[2].choices[0].finish_reason, FinishReason::Unknown);
}

#[test]
fn test_bare_error_object_reported() {
    let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
    let results = collect(RequestContext::new(), &[body]);
    assert_eq!(
        results,
        vec![Err(StreamError::VendorReported {
            vendor: Vendor::Gemini,
            code: "429".into(),
            message: "Resource has been exhausted".into(),
        })]
    );
}

#[test]
fn test_malformed_and_oversized_elements_skipped() {
    let limits = LimitsConfig {
        max_element_bytes: 128,
        ..LimitsConfig::default()
    };
    let huge = format!(
        r#"{{"candidates":[{{"content":{{"parts":[{{"text":"{}"}}]}}}}]}}"#,
        "z".repeat(200)
    );
    let body = format!(
        r#"[{{"candidates":"nope"}},{huge},{{"candidates":[{{"content":{{"parts":[{{"text":"fine"}}]}},"finishReason":"MAX_TOKENS"}}]}}]"#
    );
    let mut dec = GeminiStreamDecoder::new(RequestContext::new(), Arc::new(NormalizerTables::builtin()), &limits);
    let mut out = Vec::new();
    dec.feed(&body, &mut out).expect("feed");
    dec.finish(&mut out).expect("finish");

    assert_eq!(dec.stats().units, 3);
    assert_eq!(dec.stats().malformed, 2);
    assert_eq!(out[0].delta_text(), "fine");
    assert_eq!(out.last().expect("finish").choices[0].finish_reason, FinishReason::Length);
}
