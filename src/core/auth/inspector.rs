//! Bearer token inspection
//!
//! Reads the `exp` claim out of a JWT-shaped token (`header.payload.signature`)
//! WITHOUT verifying the signature. This only gates client-side behaviour;
//! the backend stays the authority on whether a token is valid.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Token inspection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(&'static str),
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<serde_json::Value>,
}

/// Extract the `exp` claim (epoch seconds) from a token's payload segment.
///
/// Both base64url (JWT) and standard base64 payloads are accepted, padded or
/// not.
pub fn decode_expiry(token: &str) -> Result<i64, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed("expected three dot-separated segments"));
    }

    let payload = segments[1];
    if payload.is_empty() {
        return Err(TokenError::Malformed("empty payload segment"));
    }

    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|_| TokenError::Malformed("payload is not valid base64"))?;

    let claim: ExpiryClaim = serde_json::from_slice(&bytes)
        .map_err(|_| TokenError::Malformed("payload is not a JSON object"))?;

    match claim.exp {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .ok_or(TokenError::Malformed("exp is out of range")),
        Some(_) => Err(TokenError::Malformed("exp is not a number")),
        None => Err(TokenError::Malformed("missing exp claim")),
    }
}

/// `true` iff `now >= exp`. An undecodable token counts as expired.
pub fn is_expired(token: &str, now: i64) -> bool {
    match decode_expiry(token) {
        Ok(exp) => now >= exp,
        Err(_) => true,
    }
}

/// `true` iff `exp - now <= threshold_secs`. An undecodable token counts as
/// expiring.
pub fn is_expiring_soon(token: &str, now: i64, threshold_secs: i64) -> bool {
    match decode_expiry(token) {
        Ok(exp) => exp.saturating_sub(now) <= threshold_secs,
        Err(_) => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    /// Build `h.<base64 payload>.s` with standard (padded) base64
    pub(crate) fn token_with_payload(payload: &str) -> String {
        format!("h.{}.s", STANDARD.encode(payload))
    }

    pub(crate) fn token_expiring_at(exp: i64) -> String {
        token_with_payload(&format!(r#"{{"exp":{}}}"#, exp))
    }

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        role: String,
        exp: i64,
    }

    fn signed_jwt(exp: i64) -> String {
        let claims = Claims {
            sub: "admin".to_string(),
            role: "DEVELOPER".to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test_secret_key_for_testing_only_32bytes!"),
        )
        .unwrap()
    }

    // ========================================================================
    // decode_expiry Tests
    // ========================================================================

    #[test]
    fn test_decode_expiry_standard_base64() {
        let token = token_expiring_at(1_700_000_000);
        assert_eq!(decode_expiry(&token), Ok(1_700_000_000));
    }

    #[test]
    fn test_decode_expiry_signed_jwt() {
        let token = signed_jwt(1_800_000_000);
        assert_eq!(decode_expiry(&token), Ok(1_800_000_000));
    }

    #[test]
    fn test_decode_expiry_float_exp() {
        let token = token_with_payload(r#"{"exp":1700000000.75}"#);
        assert_eq!(decode_expiry(&token), Ok(1_700_000_000));
    }

    #[test]
    fn test_decode_expiry_unpadded_base64url() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"??>>","exp":42}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_expiry(&token), Ok(42));
    }

    #[test]
    fn test_decode_expiry_wrong_segment_count() {
        assert!(decode_expiry("jwt-token-123").is_err());
        assert!(decode_expiry("a.b").is_err());
        assert!(decode_expiry("a.b.c.d").is_err());
    }

    #[test]
    fn test_decode_expiry_empty_payload() {
        assert_eq!(
            decode_expiry("h..s"),
            Err(TokenError::Malformed("empty payload segment"))
        );
    }

    #[test]
    fn test_decode_expiry_invalid_base64() {
        assert_eq!(
            decode_expiry("h.!!!not-base64!!!.s"),
            Err(TokenError::Malformed("payload is not valid base64"))
        );
    }

    #[test]
    fn test_decode_expiry_invalid_json() {
        let token = format!("h.{}.s", STANDARD.encode("not json"));
        assert_eq!(
            decode_expiry(&token),
            Err(TokenError::Malformed("payload is not a JSON object"))
        );
    }

    #[test]
    fn test_decode_expiry_missing_exp() {
        let token = token_with_payload(r#"{"sub":"admin"}"#);
        assert_eq!(
            decode_expiry(&token),
            Err(TokenError::Malformed("missing exp claim"))
        );
    }

    #[test]
    fn test_decode_expiry_non_numeric_exp() {
        let token = token_with_payload(r#"{"exp":"tomorrow"}"#);
        assert_eq!(
            decode_expiry(&token),
            Err(TokenError::Malformed("exp is not a number"))
        );
    }

    // ========================================================================
    // Expiry predicate Tests
    // ========================================================================

    #[test]
    fn test_is_expired_past_present_future() {
        let now = 1_700_000_000;

        assert!(is_expired(&token_expiring_at(now - 10), now));
        assert!(is_expired(&token_expiring_at(now), now));
        assert!(!is_expired(&token_expiring_at(now + 1), now));
        assert!(!is_expired(&token_expiring_at(now + 3600), now));
    }

    #[test]
    fn test_is_expired_matches_comparison_over_range() {
        let now = 1_000;
        for exp in (now - 50)..(now + 50) {
            assert_eq!(is_expired(&token_expiring_at(exp), now), now >= exp);
        }
    }

    #[test]
    fn test_malformed_token_counts_as_expired() {
        assert!(is_expired("jwt-token", 0));
        assert!(is_expiring_soon("jwt-token", 0, 60));
    }

    #[test]
    fn test_is_expiring_soon_threshold_boundary() {
        let now = 1_700_000_000;

        assert!(is_expiring_soon(&token_expiring_at(now + 60), now, 60));
        assert!(!is_expiring_soon(&token_expiring_at(now + 61), now, 60));
        assert!(is_expiring_soon(&token_expiring_at(now - 5), now, 60));
    }

    #[test]
    fn test_is_expiring_soon_zero_threshold_equals_expired() {
        let now = 500;
        for exp in (now - 3)..(now + 3) {
            assert_eq!(
                is_expiring_soon(&token_expiring_at(exp), now, 0),
                is_expired(&token_expiring_at(exp), now)
            );
        }
    }
}
