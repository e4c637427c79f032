//! Resource name validation for topics and subscriptions.
//!
//! Names are kebab-case: lowercase letters, digits and hyphens, starting
//! with a letter and ending with a letter or digit, 1 to 63 characters. A
//! single lowercase letter is a valid name.

use crate::error::NameViolation;

/// Maximum length of a topic or subscription name.
pub const MAX_NAME_LEN: usize = 63;

/// Validate a resource name against the kebab-case rules.
pub fn validate_name(name: &str) -> Result<(), NameViolation> {
    let bytes = name.as_bytes();

    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return Err(NameViolation::Empty);
    };

    if bytes.len() > MAX_NAME_LEN {
        return Err(NameViolation::TooLong {
            len: name.chars().count(),
            max: MAX_NAME_LEN,
        });
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(NameViolation::InvalidCharacter(c));
    }

    if !first.is_ascii_lowercase() {
        return Err(NameViolation::MustStartWithLetter);
    }

    if !(last.is_ascii_lowercase() || last.is_ascii_digit()) {
        return Err(NameViolation::MustEndWithLetterOrDigit);
    }

    Ok(())
}
