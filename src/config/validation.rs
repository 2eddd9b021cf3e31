use super::{ConfigError, StreamConfig};
use crate::protocol::mapping::Vendor;

const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the full config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &StreamConfig) -> Result<(), ConfigError> {
    validate_limits(config)?;
    validate_log_level(config)?;
    validate_overrides(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_limits(config: &StreamConfig) -> Result<(), ConfigError> {
    if config.limits.max_line_bytes == 0 {
        return Err(validation_err("limits.max_line_bytes must be greater than 0"));
    }
    if config.limits.max_element_bytes == 0 {
        return Err(validation_err(
            "limits.max_element_bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &StreamConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(())
    } else {
        Err(validation_err(format!(
            "log_level '{}' is not one of {}",
            config.log_level,
            LOG_LEVELS.join(", ")
        )))
    }
}

fn validate_overrides(config: &StreamConfig) -> Result<(), ConfigError> {
    for vendor in Vendor::ALL {
        if config
            .finish_reasons
            .for_vendor(vendor)
            .keys()
            .any(|raw| raw.trim().is_empty())
        {
            return Err(validation_err(format!(
                "finish_reasons.{vendor} contains an empty key"
            )));
        }
        if config
            .tool_finish_reasons
            .for_vendor(vendor)
            .iter()
            .any(|raw| raw.trim().is_empty())
        {
            return Err(validation_err(format!(
                "tool_finish_reasons.{vendor} contains an empty entry"
            )));
        }
    }
    Ok(())
}
