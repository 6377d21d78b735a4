//! Unverified JWT payload decoding.
//!
//! Signed attributes are only read here; their signatures are checked by the
//! servers they are sent back to. Do not use this to make trust decisions.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// Decodes the payload segment of `jwt` into `T` without checking the signature.
///
/// # Errors
///
/// Returns [`Error::InvalidJwt`] if there is no payload segment, it is not
/// base64url, or it does not deserialize into `T`.
pub fn decode_payload<T: DeserializeOwned>(jwt: &str) -> Result<T, Error> {
    let payload = jwt.split('.').nth(1).ok_or(Error::InvalidJwt)?;
    let bytes = decode_base64url(payload).map_err(|_| Error::InvalidJwt)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::InvalidJwt)
}

/// Decodes base64url, with or without padding.
pub fn decode_base64url(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))
}

/// Converts base64url (unpadded) into padded standard base64.
#[must_use]
pub fn base64_from_base64url(input: &str) -> String {
    let mut out: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::Value as JsonValue;

    use super::*;

    fn make_jwt(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"EdDSA"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Claims {
        attr_type: String,
        value: String,
    }

    #[test]
    fn decodes_payload_segment() {
        let jwt = make_jwt(r#"{"attr_type":"email-id","value":"alice@example.com"}"#);
        let claims: Claims = decode_payload(&jwt).unwrap();
        assert_eq!(
            claims,
            Claims {
                attr_type: "email-id".into(),
                value: "alice@example.com".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(decode_payload::<JsonValue>("no-dots"), Err(Error::InvalidJwt)));
        assert!(matches!(decode_payload::<JsonValue>("a.!!!.c"), Err(Error::InvalidJwt)));
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(decode_payload::<JsonValue>(&not_json), Err(Error::InvalidJwt)));
    }

    #[test]
    fn base64url_to_standard() {
        assert_eq!(base64_from_base64url("ab-_c"), "ab+/c===");
        assert_eq!(base64_from_base64url("abcd"), "abcd");
        assert_eq!(base64_from_base64url("abcdef"), "abcdef==");
    }

    #[test]
    fn padded_base64url_is_accepted() {
        assert_eq!(decode_base64url("YQ==").unwrap(), b"a");
        assert_eq!(decode_base64url("YQ").unwrap(), b"a");
    }
}
