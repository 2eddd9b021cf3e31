pub mod stream;

pub use stream::OpenAiStreamDecoder;

use serde::Deserialize;

/// One `chat.completion.chunk` as streamed on a `data:` line.
///
/// Only the fields the decoder reads are modelled; everything else is
/// ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

impl OpenAiDelta {
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// A tool call fragment. `id` and `function.name` normally arrive only on
/// the first fragment for an `index`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamToolCall {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAiStreamToolCallFunction>,
}

/// Function delta within a streaming tool call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamToolCallFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}
