use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::result::{ChatUsage, FinishReason};
use crate::config::StreamConfig;

/// Upstream vendor dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::OpenAi, Vendor::Anthropic, Vendor::Gemini];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::Gemini => "gemini",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Vendor> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(Vendor::OpenAi),
            "anthropic" => Some(Vendor::Anthropic),
            "gemini" => Some(Vendor::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Finish reason tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct VendorTable {
    reasons: FxHashMap<String, FinishReason>,
    tool_finish: FxHashSet<String>,
}

impl VendorTable {
    fn from_static(reasons: &[(&str, FinishReason)], tool_finish: &[&str]) -> Self {
        Self {
            reasons: reasons
                .iter()
                .map(|(raw, reason)| ((*raw).to_string(), *reason))
                .collect(),
            tool_finish: tool_finish.iter().map(|raw| (*raw).to_string()).collect(),
        }
    }
}

const OPENAI_REASONS: &[(&str, FinishReason)] = &[
    ("stop", FinishReason::Stop),
    ("length", FinishReason::Length),
    ("tool_calls", FinishReason::ToolCalls),
    ("function_call", FinishReason::ToolCalls),
    ("content_filter", FinishReason::ContentFilter),
];
const OPENAI_TOOL_FINISH: &[&str] = &["function_call", "tool_calls"];

const ANTHROPIC_REASONS: &[(&str, FinishReason)] = &[
    ("end_turn", FinishReason::Stop),
    ("stop_sequence", FinishReason::Stop),
    ("max_tokens", FinishReason::Length),
    ("tool_use", FinishReason::ToolCalls),
    ("refusal", FinishReason::ContentFilter),
];
const ANTHROPIC_TOOL_FINISH: &[&str] = &["tool_use"];

const GEMINI_REASONS: &[(&str, FinishReason)] = &[
    ("STOP", FinishReason::Stop),
    ("MAX_TOKENS", FinishReason::Length),
    ("SAFETY", FinishReason::ContentFilter),
    ("RECITATION", FinishReason::ContentFilter),
    ("BLOCKLIST", FinishReason::ContentFilter),
    ("PROHIBITED_CONTENT", FinishReason::ContentFilter),
    ("SPII", FinishReason::ContentFilter),
    ("MALFORMED_FUNCTION_CALL", FinishReason::Error),
];
// Gemini reports STOP for tool turns.
const GEMINI_TOOL_FINISH: &[&str] = &[];

/// Per-vendor finish-reason lookup tables, built once and shared by every
/// decoder instance.
#[derive(Debug, Clone)]
pub struct NormalizerTables {
    openai: VendorTable,
    anthropic: VendorTable,
    gemini: VendorTable,
}

impl NormalizerTables {
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            openai: VendorTable::from_static(OPENAI_REASONS, OPENAI_TOOL_FINISH),
            anthropic: VendorTable::from_static(ANTHROPIC_REASONS, ANTHROPIC_TOOL_FINISH),
            gemini: VendorTable::from_static(GEMINI_REASONS, GEMINI_TOOL_FINISH),
        }
    }

    /// Builtin tables extended with the overrides from `config`.
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        let mut tables = Self::builtin();
        for vendor in Vendor::ALL {
            let table = tables.table_mut(vendor);
            for (raw, reason) in config.finish_reasons.for_vendor(vendor) {
                table.reasons.insert(raw.clone(), *reason);
            }
            for raw in config.tool_finish_reasons.for_vendor(vendor) {
                table.tool_finish.insert(raw.clone());
            }
        }
        tables
    }

    fn table(&self, vendor: Vendor) -> &VendorTable {
        match vendor {
            Vendor::OpenAi => &self.openai,
            Vendor::Anthropic => &self.anthropic,
            Vendor::Gemini => &self.gemini,
        }
    }

    fn table_mut(&mut self, vendor: Vendor) -> &mut VendorTable {
        match vendor {
            Vendor::OpenAi => &mut self.openai,
            Vendor::Anthropic => &mut self.anthropic,
            Vendor::Gemini => &mut self.gemini,
        }
    }

    /// Map a raw vendor finish reason. Unrecognized strings map to
    /// [`FinishReason::Unknown`].
    #[must_use]
    pub fn map_finish_reason(&self, vendor: Vendor, raw: &str) -> FinishReason {
        match self.table(vendor).reasons.get(raw) {
            Some(reason) => *reason,
            None => {
                tracing::debug!(%vendor, raw, "unrecognized finish reason");
                FinishReason::Unknown
            }
        }
    }

    /// Whether `raw` signals that the turn ended in a tool invocation.
    #[must_use]
    pub fn is_tool_finish(&self, vendor: Vendor, raw: &str) -> bool {
        self.table(vendor).tool_finish.contains(raw)
    }
}

impl Default for NormalizerTables {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Usage mappings
// ---------------------------------------------------------------------------

/// Combine a freshly reported usage block into the running total.
///
/// Vendors resend running totals, so a field present in `partial` replaces
/// the accumulated value; absent fields keep theirs.
#[must_use]
pub fn merge_usage(partial: &ChatUsage, accumulated: &ChatUsage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: partial.prompt_tokens.or(accumulated.prompt_tokens),
        completion_tokens: partial.completion_tokens.or(accumulated.completion_tokens),
        total_tokens: partial.total_tokens.or(accumulated.total_tokens),
        cached_tokens: partial.cached_tokens.or(accumulated.cached_tokens),
        cache_creation_tokens: partial
            .cache_creation_tokens
            .or(accumulated.cache_creation_tokens),
        reasoning_tokens: partial.reasoning_tokens.or(accumulated.reasoning_tokens),
    }
}

/// Convert OpenAI-style usage JSON to unified usage.
#[must_use]
pub fn openai_usage_to_unified(val: &serde_json::Value) -> ChatUsage {
    ChatUsage {
        prompt_tokens: val.get("prompt_tokens").and_then(serde_json::Value::as_u64),
        completion_tokens: val
            .get("completion_tokens")
            .and_then(serde_json::Value::as_u64),
        total_tokens: val.get("total_tokens").and_then(serde_json::Value::as_u64),
        cached_tokens: val
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(serde_json::Value::as_u64),
        cache_creation_tokens: None,
        reasoning_tokens: val
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(serde_json::Value::as_u64),
    }
}

/// Convert Anthropic-style usage JSON to unified usage.
///
/// Anthropic never reports a total; [`ChatUsage::total`] derives it.
#[must_use]
pub fn anthropic_usage_to_unified(val: &serde_json::Value) -> ChatUsage {
    ChatUsage {
        prompt_tokens: val.get("input_tokens").and_then(serde_json::Value::as_u64),
        completion_tokens: val.get("output_tokens").and_then(serde_json::Value::as_u64),
        total_tokens: None,
        cached_tokens: val
            .get("cache_read_input_tokens")
            .and_then(serde_json::Value::as_u64),
        cache_creation_tokens: val
            .get("cache_creation_input_tokens")
            .and_then(serde_json::Value::as_u64),
        reasoning_tokens: None,
    }
}

/// Convert Gemini-style `usageMetadata` JSON to unified usage.
#[must_use]
pub fn gemini_usage_to_unified(val: &serde_json::Value) -> ChatUsage {
    ChatUsage {
        prompt_tokens: val
            .get("promptTokenCount")
            .and_then(serde_json::Value::as_u64),
        completion_tokens: val
            .get("candidatesTokenCount")
            .and_then(serde_json::Value::as_u64),
        total_tokens: val
            .get("totalTokenCount")
            .and_then(serde_json::Value::as_u64),
        cached_tokens: val
            .get("cachedContentTokenCount")
            .and_then(serde_json::Value::as_u64),
        cache_creation_tokens: None,
        reasoning_tokens: val
            .get("thoughtsTokenCount")
            .and_then(serde_json::Value::as_u64),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
