//! Client-side input checks, run before any request is issued.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Enter all {digits} digits of the code")]
    InvalidOtp { digits: usize },
}

/// Trimmed email if it looks deliverable.
pub fn email(value: &str) -> Result<&str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required("Email"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmail);
    }

    let Some((local, domain)) = value.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    let domain_ok = !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        && !domain.ends_with('.');
    if local.is_empty() || !domain_ok {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(value)
}

pub fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required(field));
    }
    Ok(trimmed)
}

pub fn password(value: &str, min: usize) -> Result<&str, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required("Password"));
    }
    if value.chars().count() < min {
        return Err(ValidationError::PasswordTooShort { min });
    }
    Ok(value)
}

pub fn confirmation(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// Exactly `digits` ASCII digits, surrounding whitespace ignored.
pub fn otp(value: &str, digits: usize) -> Result<&str, ValidationError> {
    let value = value.trim();
    if value.len() != digits || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidOtp { digits });
    }
    Ok(value)
}
