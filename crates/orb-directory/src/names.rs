//! Dataset and alias name validation.
//!
//! Valid names:
//! - Must be non-empty and at most 255 bytes
//! - Must not contain whitespace, control characters or `/`
//! - Must not be `.` or `..`

use orb_types::{OrbError, OrbResult};

const MAX_NAME_LEN: usize = 255;

fn validate(kind: &str, name: &str) -> OrbResult<()> {
    let reject = |reason: String| Err(OrbError::InvalidArgument(format!("{kind} {name:?} {reason}")));

    if name.is_empty() {
        return reject("must not be empty".into());
    }
    if name.len() > MAX_NAME_LEN {
        return reject(format!("exceeds {MAX_NAME_LEN} bytes"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || *c == '/')
    {
        return reject(format!("contains forbidden character {ch:?}"));
    }
    if name == "." || name == ".." {
        return reject("is reserved".into());
    }
    Ok(())
}

/// Validate a dataset name.
pub fn validate_dataset(name: &str) -> OrbResult<()> {
    validate("dataset", name)
}

/// Validate an alias.
///
/// ```
/// use orb_directory::names::validate_alias;
///
/// assert!(validate_alias("alice").is_ok());
/// assert!(validate_alias("team.lead-2").is_ok());
/// assert!(validate_alias("").is_err());
/// assert!(validate_alias("a/b").is_err());
/// ```
pub fn validate_alias(name: &str) -> OrbResult<()> {
    validate("alias", name)
}
