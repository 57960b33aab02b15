//! Naming-grammar validation for bus names, object paths, interface,
//! member, and error names.
//!
//! Every filter field of a signal match and every routing field of an
//! outgoing call is validated against these grammars before anything
//! touches the transport, so a malformed name fails fast at construction
//! time rather than producing a rule that can never match.
//!
//! The grammars are the classic bus-daemon ones:
//!
//! - object paths: `/`-rooted, `[A-Za-z0-9_]` elements, no empty element
//! - interface / error names: ≥ 2 dot-separated `[A-Za-z_][A-Za-z0-9_]*`
//!   elements, ≤ 255 bytes
//! - member names: a single `[A-Za-z_][A-Za-z0-9_]*` element, ≤ 255 bytes
//! - bus names: unique (`:`-prefixed, digits allowed to lead an element)
//!   or well-known (no leading digits), `-` permitted, ≤ 255 bytes

use std::fmt;

/// Maximum length in bytes of a bus, interface, error, or member name.
pub const MAX_NAME_LENGTH: usize = 255;

// ---------------------------------------------------------------------------
// InvalidNameError
// ---------------------------------------------------------------------------

/// Which naming grammar a value was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// A bus name (unique or well-known).
    BusName,
    /// An object path.
    ObjectPath,
    /// An interface name.
    InterfaceName,
    /// A member (signal or method) name.
    MemberName,
    /// An error name.
    ErrorName,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NameKind::BusName => "bus name",
            NameKind::ObjectPath => "object path",
            NameKind::InterfaceName => "interface name",
            NameKind::MemberName => "member name",
            NameKind::ErrorName => "error name",
        };
        f.write_str(s)
    }
}

/// A name failed its grammar check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} {name:?}: {reason}")]
pub struct InvalidNameError {
    /// The grammar the value was checked against.
    pub kind: NameKind,
    /// The offending value.
    pub name: String,
    /// What the value violated.
    pub reason: &'static str,
}

impl InvalidNameError {
    fn new(kind: NameKind, name: &str, reason: &'static str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Validates an object path.
///
/// # Errors
///
/// Returns [`InvalidNameError`] if the path is empty, does not start with
/// `/`, contains an empty element, ends with a trailing `/` (other than
/// the root path), or contains a character outside `[A-Za-z0-9_/]`.
pub fn validate_object_path(path: &str) -> Result<(), InvalidNameError> {
    let err = |reason| Err(InvalidNameError::new(NameKind::ObjectPath, path, reason));
    if path.is_empty() {
        return err("must not be empty");
    }
    if !path.starts_with('/') {
        return err("must begin with '/'");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return err("must not end with '/'");
    }
    for element in path[1..].split('/') {
        if element.is_empty() {
            return err("must not contain an empty element");
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return err("element contains a character outside [A-Za-z0-9_]");
        }
    }
    Ok(())
}

/// Validates an interface name.
///
/// # Errors
///
/// Returns [`InvalidNameError`] if the name is over 255 bytes, has fewer
/// than two elements, or any element is not `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_interface_name(name: &str) -> Result<(), InvalidNameError> {
    validate_dotted(NameKind::InterfaceName, name)
}

/// Validates an error name. Error names share the interface-name grammar.
///
/// # Errors
///
/// Returns [`InvalidNameError`] under the same conditions as
/// [`validate_interface_name`].
pub fn validate_error_name(name: &str) -> Result<(), InvalidNameError> {
    validate_dotted(NameKind::ErrorName, name)
}

fn validate_dotted(kind: NameKind, name: &str) -> Result<(), InvalidNameError> {
    let err = |reason| Err(InvalidNameError::new(kind, name, reason));
    if name.is_empty() {
        return err("must not be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return err("exceeds 255 bytes");
    }
    let mut elements = 0usize;
    for element in name.split('.') {
        elements += 1;
        match element.bytes().next() {
            None => return err("must not contain an empty element"),
            Some(b) if b.is_ascii_digit() => {
                return err("element must not begin with a digit");
            }
            Some(_) => {}
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return err("element contains a character outside [A-Za-z0-9_]");
        }
    }
    if elements < 2 {
        return err("must contain at least two elements");
    }
    Ok(())
}

/// Validates a member (signal or method) name.
///
/// # Errors
///
/// Returns [`InvalidNameError`] if the name is empty, over 255 bytes,
/// begins with a digit, or contains a character outside `[A-Za-z0-9_]`.
pub fn validate_member_name(name: &str) -> Result<(), InvalidNameError> {
    let err = |reason| Err(InvalidNameError::new(NameKind::MemberName, name, reason));
    if name.is_empty() {
        return err("must not be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return err("exceeds 255 bytes");
    }
    if name.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return err("must not begin with a digit");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return err("contains a character outside [A-Za-z0-9_]");
    }
    Ok(())
}

/// Validates a bus name, unique (`:1.42`) or well-known (`org.x.Service`).
///
/// # Errors
///
/// Returns [`InvalidNameError`] if the name is empty, over 255 bytes, has
/// fewer than two elements, contains an empty element or a character
/// outside `[A-Za-z0-9_-]`, or (for well-known names only) an element
/// beginning with a digit.
pub fn validate_bus_name(name: &str) -> Result<(), InvalidNameError> {
    let err = |reason| Err(InvalidNameError::new(NameKind::BusName, name, reason));
    if name.is_empty() {
        return err("must not be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return err("exceeds 255 bytes");
    }
    let (unique, body) = match name.strip_prefix(':') {
        Some(rest) => (true, rest),
        None => (false, name),
    };
    let mut elements = 0usize;
    for element in body.split('.') {
        elements += 1;
        match element.bytes().next() {
            None => return err("must not contain an empty element"),
            Some(b) if b.is_ascii_digit() && !unique => {
                return err("element must not begin with a digit");
            }
            Some(_) => {}
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return err("element contains a character outside [A-Za-z0-9_-]");
        }
    }
    if elements < 2 {
        return err("must contain at least two elements");
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // --- Object paths ---

    #[test]
    fn test_object_path_valid() {
        validate_object_path("/").unwrap();
        validate_object_path("/org").unwrap();
        validate_object_path("/org/freedesktop/DBus").unwrap();
        validate_object_path("/a_b/c123").unwrap();
    }

    #[test]
    fn test_object_path_invalid() {
        assert!(validate_object_path("").is_err());
        assert!(validate_object_path("org/x").is_err());
        assert!(validate_object_path("/org/").is_err());
        assert!(validate_object_path("//org").is_err());
        assert!(validate_object_path("/org x").is_err());
        assert!(validate_object_path("/org.x").is_err());
    }

    // --- Interface names ---

    #[test]
    fn test_interface_name_valid() {
        validate_interface_name("org.freedesktop.DBus").unwrap();
        validate_interface_name("a.b").unwrap();
        validate_interface_name("_a._b").unwrap();
    }

    #[test]
    fn test_interface_name_invalid() {
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("noDots").is_err());
        assert!(validate_interface_name("a..b").is_err());
        assert!(validate_interface_name("a.1b").is_err());
        assert!(validate_interface_name("a.b-c").is_err());
        let long = format!("a.{}", "b".repeat(300));
        assert!(validate_interface_name(&long).is_err());
    }

    // --- Member names ---

    #[test]
    fn test_member_name_valid() {
        validate_member_name("PropertiesChanged").unwrap();
        validate_member_name("_x1").unwrap();
    }

    #[test]
    fn test_member_name_invalid() {
        assert!(validate_member_name("").is_err());
        assert!(validate_member_name("1st").is_err());
        assert!(validate_member_name("has.dot").is_err());
        assert!(validate_member_name("has space").is_err());
        assert!(validate_member_name(&"m".repeat(256)).is_err());
    }

    // --- Bus names ---

    #[test]
    fn test_bus_name_well_known() {
        validate_bus_name("org.freedesktop.DBus").unwrap();
        validate_bus_name("com.example.my-service").unwrap();
        assert!(validate_bus_name("org.1bad").is_err());
        assert!(validate_bus_name("nodots").is_err());
    }

    #[test]
    fn test_bus_name_unique() {
        validate_bus_name(":1.42").unwrap();
        validate_bus_name(":1.0").unwrap();
        assert!(validate_bus_name(":").is_err());
        assert!(validate_bus_name(":1").is_err());
        assert!(validate_bus_name(":1..2").is_err());
    }

    #[test]
    fn test_error_name_follows_interface_grammar() {
        validate_error_name("org.freedesktop.DBus.Error.Failed").unwrap();
        let e = validate_error_name("Failed").unwrap_err();
        assert_eq!(e.kind, NameKind::ErrorName);
    }

    #[test]
    fn test_error_display_carries_value() {
        let e = validate_member_name("has.dot").unwrap_err();
        let text = e.to_string();
        assert!(text.contains("member name"));
        assert!(text.contains("has.dot"));
    }
}
