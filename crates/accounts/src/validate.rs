//! Input checks shared by the orchestrator and the credential layout.

use crate::error::{Error, Result};

pub const MAX_ACCOUNT_ID_LEN: usize = 50;

/// Account ids become directory and file names, so only `[A-Za-z0-9_-]`.
pub fn validate_account_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ACCOUNT_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "account id must be 1-{MAX_ACCOUNT_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!(
            "account id {id:?} may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Strip an optional leading `+` and check for 10-15 digits.
pub fn normalize_phone(phone: &str) -> Result<String> {
    let digits = phone.trim().strip_prefix('+').unwrap_or(phone.trim());
    if !(10..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "phone number {phone:?} must be 10-15 digits"
        )));
    }
    Ok(digits.to_string())
}
