//! Mapping between resource identifiers and claim keys.
//!
//! A resource identifier is either a full CIDR (`address/mask`) or a bare
//! identifier. Its claim lives at `prefix + escaped`, where every `/` is
//! replaced by `::` so the identifier stays a single segment of the
//! hierarchical key space. Identifiers that would make the escape ambiguous
//! are rejected up front by [`validate_cidr`].

use crate::error::ClaimError;

/// Separator between address and mask in a CIDR.
pub const MASK_SEPARATOR: &str = "/";

/// Escape sequence standing in for [`MASK_SEPARATOR`] inside a key.
pub const ESCAPED_SEPARATOR: &str = "::";

/// Build the storage key for `cidr` under `prefix`.
pub fn key_from_cidr(prefix: &str, cidr: &str) -> String {
    format!("{prefix}{}", cidr.replace(MASK_SEPARATOR, ESCAPED_SEPARATOR))
}

/// Recover the resource identifier from a key produced by [`key_from_cidr`].
///
/// A key outside `prefix` is a [`ClaimError::CorruptedKey`].
pub fn cidr_from_key(prefix: &str, key: &str) -> Result<String, ClaimError> {
    match key.strip_prefix(prefix) {
        Some(escaped) if !escaped.is_empty() => Ok(escaped.replace(ESCAPED_SEPARATOR, MASK_SEPARATOR)),
        _ => Err(ClaimError::CorruptedKey {
            key: key.to_string(),
            prefix: prefix.to_string(),
        }),
    }
}

/// Reject identifiers the escape cannot round-trip.
///
/// `::` would decode to `/`, and a `:` next to `/` would fuse with the escape.
pub fn validate_cidr(cidr: &str) -> Result<(), ClaimError> {
    let reason = if cidr.is_empty() {
        "resource identifier must not be empty"
    } else if cidr.contains(ESCAPED_SEPARATOR) {
        "resource identifier must not contain '::'"
    } else if cidr.contains(":/") || cidr.contains("/:") {
        "resource identifier must not place ':' next to '/'"
    } else {
        return Ok(());
    };
    Err(ClaimError::InvalidClaim {
        reason: format!("{reason}: '{cidr}'"),
    })
}

/// Key codec bound to one claim prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimKeyCodec {
    prefix: String,
}

impl ClaimKeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key_from_cidr(&self, cidr: &str) -> String {
        key_from_cidr(&self.prefix, cidr)
    }

    pub fn cidr_from_key(&self, key: &str) -> Result<String, ClaimError> {
        cidr_from_key(&self.prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_to_key() {
        let cases = [
            ("/ips/", "10.10.0.2/24", "/ips/10.10.0.2::24"),
            ("/ips/", "1", "/ips/1"),
            ("/collection/", "10.10.0.2/24", "/collection/10.10.0.2::24"),
        ];

        for (prefix, cidr, key) in cases {
            assert_eq!(key_from_cidr(prefix, cidr), key);
            assert_eq!(cidr_from_key(prefix, key).unwrap(), cidr);
        }
    }

    #[test]
    fn test_key_outside_prefix_is_rejected() {
        let err = cidr_from_key("/ips/", "/other/10.10.0.2::24").unwrap_err();
        assert!(matches!(err, ClaimError::CorruptedKey { .. }));
    }

    #[test]
    fn test_bare_prefix_is_rejected() {
        assert!(cidr_from_key("/ips/", "/ips/").is_err());
    }

    #[test]
    fn test_validate_cidr() {
        assert!(validate_cidr("10.10.0.2/24").is_ok());
        assert!(validate_cidr("node-a").is_ok());
        assert!(validate_cidr("fd00:0:0:0:0:0:0:1/64").is_ok());

        assert!(validate_cidr("").is_err());
        assert!(validate_cidr("fd00::1/64").is_err());
        assert!(validate_cidr("a:/24").is_err());
        assert!(validate_cidr("a/:24").is_err());
    }

    #[test]
    fn test_codec_uses_its_prefix() {
        let codec = ClaimKeyCodec::new("/ips/");
        let key = codec.key_from_cidr("10.0.0.1/32");
        assert_eq!(key, "/ips/10.0.0.1::32");
        assert_eq!(codec.cidr_from_key(&key).unwrap(), "10.0.0.1/32");
        assert_eq!(codec.prefix(), "/ips/");
    }
}
