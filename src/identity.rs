// External Identity
// Strict boundary type for the profile payload returned by the identity
// provider. Parsing fails fast on a missing `id` instead of letting empty
// values leak into reconciliation.

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Identity produced by the provider after the OAuth exchange.
/// Read-only and ephemeral: one per login attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Provider-assigned user identifier
    pub id: String,

    /// Email address, if the user granted access to it
    pub email: Option<String>,

    /// Display name
    pub name: String,

    /// Whether the provider considers the account verified
    pub verified: bool,
}

/// Raw profile shape as the provider returns it. Everything except `id`
/// is optional on the wire.
#[derive(Debug, Deserialize)]
struct RawProfile {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    verified: Option<bool>,
}

impl ExternalIdentity {
    /// Parse a provider profile response, rejecting payloads without a
    /// usable `id`.
    pub fn from_profile_json(value: serde_json::Value) -> Result<Self, GateError> {
        let raw: RawProfile = serde_json::from_value(value)?;

        let id = match raw.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                return Err(GateError::ProviderExchangeFailed(
                    "profile response is missing the user id".to_string(),
                ));
            }
        };

        let email = raw.email.filter(|e| !e.trim().is_empty());
        let name = raw.name.unwrap_or_else(|| id.clone());

        Ok(Self {
            id,
            email,
            name,
            verified: raw.verified.unwrap_or(false),
        })
    }
}

/// Normalize an external username: ASCII-lowercase with all punctuation and
/// whitespace stripped. Matches the provider's own username equivalence
/// rules ("John.Doe" and "johndoe" name the same account).
pub fn cleanse_username(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Derive a local username candidate from a source string, truncated to the
/// host's column width.
pub fn truncate_username(source: &str, max_len: usize) -> String {
    source.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_profile() {
        let identity = ExternalIdentity::from_profile_json(json!({
            "id": "123456",
            "email": "a@x.com",
            "name": "Ada Example",
            "verified": true,
        }))
        .unwrap();

        assert_eq!(identity.id, "123456");
        assert_eq!(identity.email.as_deref(), Some("a@x.com"));
        assert_eq!(identity.name, "Ada Example");
        assert!(identity.verified);
    }

    #[test]
    fn test_parse_missing_id_fails() {
        let result = ExternalIdentity::from_profile_json(json!({
            "email": "a@x.com",
            "name": "Nobody",
        }));
        assert!(matches!(result, Err(GateError::ProviderExchangeFailed(_))));

        let result = ExternalIdentity::from_profile_json(json!({ "id": "  " }));
        assert!(matches!(result, Err(GateError::ProviderExchangeFailed(_))));
    }

    #[test]
    fn test_parse_optional_fields_default() {
        let identity =
            ExternalIdentity::from_profile_json(json!({ "id": "42", "email": "" })).unwrap();

        assert_eq!(identity.email, None);
        assert_eq!(identity.name, "42");
        assert!(!identity.verified);
    }

    #[test]
    fn test_cleanse_idempotent() {
        for input in ["John.Doe", "johndoe", "J O H N-doe", "42", "", "a.b_c!d"] {
            let once = cleanse_username(input);
            assert_eq!(cleanse_username(&once), once);
        }
    }

    #[test]
    fn test_cleanse_case_and_punctuation_insensitive() {
        assert_eq!(cleanse_username("John.Doe"), cleanse_username("johndoe"));
        assert_eq!(cleanse_username("John.Doe"), "johndoe");
    }

    #[test]
    fn test_truncate_username() {
        assert_eq!(truncate_username("abcdef", 4), "abcd");
        assert_eq!(truncate_username("abc", 32), "abc");
    }
}
