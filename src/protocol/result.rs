use serde::{Deserialize, Serialize};

/// Unified message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
    Tool,
}

/// Reason the model stopped generating, normalized across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Unknown,
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// Tag separating decoded wire chunks from parser-synthesized markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamInternalKind {
    #[default]
    Chunk,
    AppendFullAssistantMessage,
    FinishData,
}

/// Token accounting. Every field is optional because vendors report
/// different subsets at different points in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChatUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl ChatUsage {
    /// Reported total, or prompt + completion when the vendor omits it.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total_tokens.or(match (self.prompt_tokens, self.completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == ChatUsage::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub index: u32,
    pub function: FunctionCall,
}

impl ToolCall {
    /// Whether `arguments` holds exactly one complete JSON value.
    #[must_use]
    pub fn has_complete_arguments(&self) -> bool {
        serde_json::from_str::<serde::de::IgnoredAny>(&self.function.arguments).is_ok()
    }
}

/// A message, either incremental (`ChatChoice::delta`) or materialized
/// (`ChatChoice::message`). While a parser assembles a turn, the message
/// doubles as the running text buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            ..Self::default()
        }
    }

    pub fn push_content(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }

    pub fn push_reasoning(&mut self, fragment: &str) {
        self.reasoning.push_str(fragment);
    }

    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.content.is_empty() || !self.reasoning.is_empty()
    }

    /// Move the assembled text out, leaving an empty buffer with the same role.
    #[must_use]
    pub fn take(&mut self) -> ChatMessage {
        std::mem::replace(self, ChatMessage::new(self.role))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    pub finish_reason: FinishReason,
}

/// One unit of normalized streaming output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChatResult {
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
    pub kind: StreamInternalKind,
}

impl ChatResult {
    /// A plain incremental chunk with one delta choice.
    #[must_use]
    pub fn delta(index: u32, delta: ChatMessage, finish_reason: FinishReason) -> Self {
        Self {
            choices: vec![ChatChoice {
                index,
                delta: Some(delta),
                message: None,
                finish_reason,
            }],
            usage: None,
            kind: StreamInternalKind::Chunk,
        }
    }

    /// The synthetic event carrying the fully concatenated assistant text.
    #[must_use]
    pub fn append_full_assistant_message(
        message: ChatMessage,
        finish_reason: FinishReason,
        usage: Option<ChatUsage>,
    ) -> Self {
        Self {
            choices: vec![ChatChoice {
                index: 0,
                delta: None,
                message: Some(message),
                finish_reason,
            }],
            usage,
            kind: StreamInternalKind::AppendFullAssistantMessage,
        }
    }

    /// The end-of-turn marker carrying only finish reason and usage.
    #[must_use]
    pub fn finish_data(finish_reason: FinishReason, usage: Option<ChatUsage>) -> Self {
        Self {
            choices: vec![ChatChoice {
                index: 0,
                delta: None,
                message: None,
                finish_reason,
            }],
            usage,
            kind: StreamInternalKind::FinishData,
        }
    }

    /// The terminal event carrying every reassembled tool call in one
    /// `Tool`-role message.
    #[must_use]
    pub fn tool_calls(
        tool_calls: Vec<ToolCall>,
        finish_reason: FinishReason,
        usage: Option<ChatUsage>,
    ) -> Self {
        let message = ChatMessage {
            role: Role::Tool,
            tool_calls,
            ..ChatMessage::default()
        };
        Self {
            choices: vec![ChatChoice {
                index: 0,
                delta: None,
                message: Some(message),
                finish_reason,
            }],
            usage,
            kind: StreamInternalKind::Chunk,
        }
    }

    /// Produced by a decoder rather than decoded one-to-one from the wire.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.kind != StreamInternalKind::Chunk
            || self.choices.iter().any(|choice| choice.message.is_some())
    }

    #[must_use]
    pub fn first_choice(&self) -> Option<&ChatChoice> {
        self.choices.first()
    }

    /// Text of the first choice's delta, or `""`.
    #[must_use]
    pub fn delta_text(&self) -> &str {
        self.first_choice()
            .and_then(|choice| choice.delta.as_ref())
            .map_or("", |delta| delta.content.as_str())
    }
}
