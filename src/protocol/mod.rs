pub mod accumulator;
pub mod anthropic;
pub mod gemini;
pub mod mapping;
pub mod openai;
pub mod request;
pub mod result;

use std::sync::Arc;

use crate::config::LimitsConfig;
use crate::stream::StreamDecoder;

use self::anthropic::AnthropicStreamDecoder;
use self::gemini::GeminiStreamDecoder;
use self::mapping::{NormalizerTables, Vendor};
use self::openai::OpenAiStreamDecoder;
use self::request::RequestContext;

/// Build the stream decoder for `vendor`, framed and limited per `limits`.
#[must_use]
pub fn stream_decoder(
    vendor: Vendor,
    ctx: RequestContext,
    tables: Arc<NormalizerTables>,
    limits: &LimitsConfig,
) -> Box<dyn StreamDecoder + Send> {
    match vendor {
        Vendor::OpenAi => Box::new(OpenAiStreamDecoder::new(ctx, tables).framed(limits)),
        Vendor::Anthropic => Box::new(AnthropicStreamDecoder::new(tables).framed(limits)),
        Vendor::Gemini => Box::new(GeminiStreamDecoder::new(ctx, tables, limits)),
    }
}
