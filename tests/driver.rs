use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use chatstream::config::LimitsConfig;
use chatstream::error::StreamError;
use chatstream::protocol::mapping::{NormalizerTables, Vendor};
use chatstream::protocol::request::RequestContext;
use chatstream::protocol::result::{ChatResult, FinishReason};
use chatstream::protocol::stream_decoder;
use chatstream::stream::{decode_byte_stream, decode_text_chunks};

type Chunk = Result<Bytes, std::io::Error>;

fn decoder(vendor: Vendor) -> Box<dyn chatstream::stream::StreamDecoder + Send> {
    stream_decoder(
        vendor,
        RequestContext::new(),
        Arc::new(NormalizerTables::builtin()),
        &LimitsConfig::default(),
    )
}

fn byte_chunks(body: &[u8], size: usize) -> Vec<Chunk> {
    body.chunks(size)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

async fn drain(
    vendor: Vendor,
    source: impl futures_util::Stream<Item = Chunk> + Send + 'static,
    cancel: CancellationToken,
) -> Vec<Result<ChatResult, StreamError>> {
    decode_byte_stream(decoder(vendor), source, cancel)
        .collect()
        .await
}

fn full_text(results: &[Result<ChatResult, StreamError>]) -> String {
    results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .filter(|r| !r.is_synthetic())
        .map(ChatResult::delta_text)
        .collect()
}

const OPENAI_UNICODE: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"h\u{00e9}llo \"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"\u{1f30d} \u{2603}\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn test_multibyte_characters_split_across_chunks() {
    for size in [1, 2, 3, 5, 7] {
        let source = futures_util::stream::iter(byte_chunks(OPENAI_UNICODE.as_bytes(), size));
        let results = drain(Vendor::OpenAi, source, CancellationToken::new()).await;
        assert!(results.iter().all(Result::is_ok), "chunk size {size}");
        assert_eq!(full_text(&results), "h\u{00e9}llo \u{1f30d} \u{2603}");
        let terminal = results.last().expect("terminal").as_ref().expect("ok");
        assert_eq!(terminal.choices[0].finish_reason, FinishReason::Stop);
    }
}

#[tokio::test]
async fn test_each_vendor_through_factory() {
    let bodies = [
        (
            Vendor::OpenAi,
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n",
        ),
        (
            Vendor::Anthropic,
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ),
        (
            Vendor::Gemini,
            "[{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hi\"}]},\"finishReason\":\"STOP\"}]}]",
        ),
    ];
    for (vendor, body) in bodies {
        let source = futures_util::stream::iter(byte_chunks(body.as_bytes(), 9));
        let results = drain(vendor, source, CancellationToken::new()).await;
        assert!(results.iter().all(Result::is_ok), "{vendor}");
        assert_eq!(full_text(&results), "hi", "{vendor}");
        let terminal = results.last().expect("terminal").as_ref().expect("ok");
        assert!(terminal.is_synthetic(), "{vendor}");
    }
}

#[tokio::test]
async fn test_source_not_polled_after_terminator() {
    let mut chunks = byte_chunks(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: [DONE]\n", 64);
    chunks.push(Err(std::io::Error::other("connection reset")));
    let results = drain(Vendor::OpenAi, futures_util::stream::iter(chunks), CancellationToken::new()).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(full_text(&results), "a");
}

#[tokio::test]
async fn test_transport_error_ends_stream() {
    let chunks: Vec<Chunk> = vec![
        Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
        Err(std::io::Error::other("connection reset")),
        Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n")),
    ];
    let results = drain(Vendor::OpenAi, futures_util::stream::iter(chunks), CancellationToken::new()).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().expect("delta").delta_text(), "a");
    assert!(matches!(&results[1], Err(StreamError::Transport(msg)) if msg.contains("connection reset")));
}

#[tokio::test]
async fn test_cancel_before_start_yields_only_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let source = futures_util::stream::iter(byte_chunks(OPENAI_UNICODE.as_bytes(), 16));
    let results = drain(Vendor::OpenAi, source, cancel).await;
    assert_eq!(results, vec![Err(StreamError::Cancelled)]);
}

#[tokio::test]
async fn test_cancel_while_waiting_on_source() {
    let first: Vec<Chunk> = vec![Ok(Bytes::from_static(
        b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
    ))];
    let source = futures_util::stream::iter(first).chain(futures_util::stream::pending());
    let cancel = CancellationToken::new();
    let mut results = Box::pin(decode_byte_stream(decoder(Vendor::OpenAi), source, cancel.clone()));

    let first = results.next().await.expect("first item").expect("ok");
    assert_eq!(first.delta_text(), "a");

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    assert_eq!(results.next().await, Some(Err(StreamError::Cancelled)));
    assert_eq!(results.next().await, None);
}

#[test]
fn test_sync_iterator_honors_cancellation() {
    let cancel = CancellationToken::new();
    let chunks = [
        "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
    ];
    let mut iter = decode_text_chunks(decoder(Vendor::OpenAi), chunks, Some(cancel.clone()));
    assert_eq!(iter.next().expect("first").expect("ok").delta_text(), "a");
    cancel.cancel();
    assert_eq!(iter.next(), Some(Err(StreamError::Cancelled)));
    assert_eq!(iter.next(), None);
}

#[test]
fn test_repeated_decoding_is_idempotent() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"f\",\"arguments\":\"{\\\"a\\\":1\"}}]}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"234}\"}}]}}]}\n",
        "data: [DONE]\n",
    );
    let run = || -> Vec<Result<ChatResult, StreamError>> {
        decode_text_chunks(decoder(Vendor::OpenAi), [body], None).collect()
    };
    let first = run();
    assert_eq!(first, run());
    let call = &first[0].as_ref().expect("ok").choices[0]
        .message
        .as_ref()
        .expect("message")
        .tool_calls[0];
    assert_eq!(call.function.arguments, "{\"a\":1234}");
}
