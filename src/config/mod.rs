pub mod validation;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::protocol::mapping::Vendor;
use crate::protocol::result::FinishReason;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Buffering limits applied by the stream framers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_max_element_bytes")]
    pub max_element_bytes: usize,
}

fn default_max_line_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_max_element_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            max_element_bytes: default_max_element_bytes(),
        }
    }
}

/// Extra raw finish-reason strings per vendor, layered over the builtin tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinishReasonOverrides {
    #[serde(default)]
    pub openai: FxHashMap<String, FinishReason>,
    #[serde(default)]
    pub anthropic: FxHashMap<String, FinishReason>,
    #[serde(default)]
    pub gemini: FxHashMap<String, FinishReason>,
}

impl FinishReasonOverrides {
    #[must_use]
    pub fn for_vendor(&self, vendor: Vendor) -> &FxHashMap<String, FinishReason> {
        match vendor {
            Vendor::OpenAi => &self.openai,
            Vendor::Anthropic => &self.anthropic,
            Vendor::Gemini => &self.gemini,
        }
    }
}

/// Extra raw strings per vendor that count as a tool-invocation finish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFinishOverrides {
    #[serde(default)]
    pub openai: Vec<String>,
    #[serde(default)]
    pub anthropic: Vec<String>,
    #[serde(default)]
    pub gemini: Vec<String>,
}

impl ToolFinishOverrides {
    #[must_use]
    pub fn for_vendor(&self, vendor: Vendor) -> &[String] {
        match vendor {
            Vendor::OpenAi => &self.openai,
            Vendor::Anthropic => &self.anthropic,
            Vendor::Gemini => &self.gemini,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub finish_reasons: FinishReasonOverrides,
    #[serde(default)]
    pub tool_finish_reasons: ToolFinishOverrides,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            finish_reasons: FinishReasonOverrides::default(),
            tool_finish_reasons: ToolFinishOverrides::default(),
            log_level: default_log_level(),
        }
    }
}

/// Parse configuration from YAML text and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<StreamConfig, ConfigError> {
    // serde_yaml reads an empty document as unit, not an empty mapping.
    let config: StreamConfig = if contents.trim().is_empty() {
        StreamConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<StreamConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
