pub mod stream;

pub use stream::AnthropicStreamDecoder;

use serde::Deserialize;

/// `data:` payload following `event: message_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageStartEvent {
    pub message: AnthropicMessageStart,
}

/// Message start payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicMessageStart {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

/// `data:` payload following `event: content_block_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicBlockStartEvent {
    pub index: u32,
    pub content_block: AnthropicContentBlock,
}

/// A content block header as announced by `content_block_start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        /// Usually `{}` when streaming; the arguments follow as
        /// `input_json_delta` fragments.
        #[serde(default)]
        input: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

/// `data:` payload following `event: content_block_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicBlockDeltaEvent {
    pub index: u32,
    pub delta: AnthropicDelta,
}

/// Delta variants for content block deltas.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    /// `signature_delta` and anything newer.
    #[serde(other)]
    Other,
}

/// `data:` payload following `event: content_block_stop`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicBlockStopEvent {
    pub index: u32,
}

/// `data:` payload following `event: message_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageDeltaEvent {
    #[serde(default)]
    pub delta: AnthropicMessageDeltaBody,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

/// Message delta body (`stop_reason` etc).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicMessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// `data:` payload following `event: error`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicErrorEvent {
    pub error: serde_json::Value,
}
