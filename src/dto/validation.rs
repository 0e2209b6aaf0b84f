//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest display name accepted for a captain signup.
pub const MAX_DISPLAY_NAME_LEN: usize = 40;

/// Validates a captain display name: non-blank and at most [`MAX_DISPLAY_NAME_LEN`] characters.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Ana")   // Ok
/// validate_display_name("   ")   // Err - blank
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }

    let len = trimmed.chars().count();
    if len > MAX_DISPLAY_NAME_LEN {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Name must be at most {MAX_DISPLAY_NAME_LEN} characters (got {len})").into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a list of identifiers holds no duplicates.
pub fn validate_unique<T: PartialEq>(values: &[T]) -> Result<(), ValidationError> {
    let duplicated = values
        .iter()
        .enumerate()
        .any(|(index, value)| values[..index].contains(value));
    if duplicated {
        let mut err = ValidationError::new("duplicate_ids");
        err.message = Some("Song ids must be unique".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_accepts_regular_names() {
        assert!(validate_display_name("Ana").is_ok());
        assert!(validate_display_name("  Jean-Luc  ").is_ok());
    }

    #[test]
    fn display_name_rejects_blank_and_long() {
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn unique_detects_duplicates() {
        assert!(validate_unique(&["a", "b"]).is_ok());
        assert!(validate_unique(&["a", "b", "a"]).is_err());
    }
}
