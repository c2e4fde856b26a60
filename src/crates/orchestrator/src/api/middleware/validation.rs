//! Request validation helpers shared by the plan-submission handler.

use crate::api::error::{ApiError, ApiResult};

/// Validate that a required string field is not empty.
pub fn validate_not_empty(value: &str, field_name: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{} cannot be empty", field_name)));
    }
    Ok(())
}

/// Validate string length constraints.
pub fn validate_string_length(value: &str, field_name: &str, min: usize, max: usize) -> ApiResult<()> {
    if value.len() < min || value.len() > max {
        return Err(ApiError::ValidationError(
            format!("{} must be between {} and {} characters", field_name, min, max)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty_valid() {
        assert!(validate_not_empty("hello", "goal").is_ok());
    }

    #[test]
    fn test_validate_not_empty_empty() {
        assert!(validate_not_empty("   ", "goal").is_err());
    }

    #[test]
    fn test_validate_string_length_valid() {
        assert!(validate_string_length("hello", "goal", 1, 10).is_ok());
    }

    #[test]
    fn test_validate_string_length_too_long() {
        assert!(validate_string_length("very long string", "goal", 1, 5).is_err());
    }
}
