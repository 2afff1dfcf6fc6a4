// Client-side request validation
// Runs before any network call so obviously bad input never leaves the device

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ApiError;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if EMAIL_RE.is_match(email.trim()) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("Invalid email address: {}", email)))
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }
    Ok(())
}

/// Score must lie in `0..=max_score`
pub fn validate_score(score: u32, max_score: u32) -> Result<(), ApiError> {
    if score > max_score {
        return Err(ApiError::Validation(format!(
            "Score must be between 0 and {}",
            max_score
        )));
    }
    Ok(())
}

pub fn validate_name(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{} is required", field)));
    }
    Ok(())
}
