//! Input validation for everything that crosses the session boundary
//!
//! Target names and detection payloads arrive from the UI, from the push
//! route and from scraped metrics. They are checked here before they reach
//! the coordinator or the network.

use anyhow::{anyhow, Result};

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for names (target names, locations)
pub const MAX_NAME_LENGTH: usize = 512;

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate name (target name, camera location, etc.)
pub fn validate_name(name: &str, field_name: &str) -> Result<()> {
    validate_non_empty(name, field_name)?;
    validate_length(name, MAX_NAME_LENGTH, field_name)?;
    Ok(())
}

/// Validate a search target name.
///
/// The match-all sentinel is reserved for the wire format and cannot be used
/// as a concrete name.
pub fn validate_target_name(name: &str) -> Result<()> {
    validate_name(name, "target name")?;
    if name.trim() == crate::sessions::MATCH_ALL_TARGET {
        return Err(anyhow!(
            "target name '{}' is reserved for matching all targets",
            crate::sessions::MATCH_ALL_TARGET
        ));
    }
    Ok(())
}

// ============================================================================
// Numeric Validation
// ============================================================================

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

/// Validate a detection confidence score (finite, 0.0 ..= 1.0)
pub fn validate_confidence(confidence: f32) -> Result<()> {
    if !confidence.is_finite() {
        return Err(anyhow!("confidence must be a finite number"));
    }
    validate_range(confidence, 0.0, 1.0, "confidence")
}

// ============================================================================
// Tests
// ============================================================================
