//! HMAC-SHA256 handshake tokens.
//!
//! A token is `<issuedAtMillis>.<signature>` where the signature is the
//! standard base64 HMAC-SHA256 of the decimal timestamp under the shared secret.
//! A third dot-separated field is tolerated and ignored; any other shape is malformed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;

use crate::error::{token_error, Error, TokenErrorKind};

type HmacSha256 = Hmac<Sha256>;

/// A token split into its signed timestamp and signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedToken<'a> {
    pub issued_at_millis: i64,
    pub signature: &'a str,
}

/// Split a raw token into its fields.
pub fn parse(token: &str) -> Result<ParsedToken<'_>, Error> {
    let fields: Vec<&str> = token.split('.').collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(token_error(
            TokenErrorKind::Malformed,
            &format!("Expected 2 or 3 token fields, found {}", fields.len()),
        ));
    }

    let issued_at_millis = fields[0].parse::<i64>().map_err(|_| {
        token_error(TokenErrorKind::Malformed, "Token timestamp is not a number")
    })?;
    if fields[1].is_empty() {
        return Err(token_error(TokenErrorKind::Malformed, "Token signature is empty"));
    }

    Ok(ParsedToken {
        issued_at_millis,
        signature: fields[1],
    })
}

/// Response body for a freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenGrant {
    pub token: String,
    /// Validity in seconds, as a string.
    pub expires_in: String,
}

/// Signs and verifies handshake tokens with a shared secret.
pub struct TokenSigner {
    secret: SecretString,
}

impl TokenSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
        }
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| token_error(TokenErrorKind::InvalidKey, "Invalid HMAC key"))
    }

    /// Base64 signature over the decimal timestamp.
    pub fn sign(&self, issued_at_millis: i64) -> Result<String, Error> {
        let mut mac = self.mac()?;
        mac.update(issued_at_millis.to_string().as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Mint a token stamped with `now`.
    pub fn issue(&self, now: DateTime<Utc>) -> Result<String, Error> {
        let issued_at_millis = now.timestamp_millis();
        Ok(format!("{}.{}", issued_at_millis, self.sign(issued_at_millis)?))
    }

    /// Constant-time check of a parsed token's signature.
    pub fn verify(&self, token: &ParsedToken<'_>) -> Result<(), Error> {
        let expected = BASE64.decode(token.signature).map_err(|_| {
            token_error(TokenErrorKind::InvalidSignature, "Signature is not valid base64")
        })?;

        let mut mac = self.mac()?;
        mac.update(token.issued_at_millis.to_string().as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| token_error(TokenErrorKind::InvalidSignature, "Signature mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn signer() -> TokenSigner {
        TokenSigner::new("test_secret")
    }

    #[test]
    fn test_sign_matches_hmac_of_timestamp() {
        let mut mac = HmacSha256::new_from_slice(b"test_secret").unwrap();
        mac.update(b"1700000000000");
        let expected = BASE64.encode(mac.finalize().into_bytes());

        assert_eq!(signer().sign(1_700_000_000_000).unwrap(), expected);
    }

    #[test]
    fn test_issued_token_parses_and_verifies() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let token = signer().issue(now).unwrap();

        let parsed = parse(&token).unwrap();
        assert_eq!(parsed.issued_at_millis, 1_700_000_000_123);
        assert!(signer().verify(&parsed).is_ok());
    }

    #[test]
    fn test_third_field_is_ignored() {
        let token = format!("42.{}.extra", signer().sign(42).unwrap());

        let parsed = parse(&token).unwrap();
        assert!(signer().verify(&parsed).is_ok());
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let token = signer().issue(Utc::now()).unwrap();
        let parsed = parse(&token).unwrap();

        let err = TokenSigner::new("other_secret").verify(&parsed).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::InvalidSignature));
    }

    #[test]
    fn test_malformed_shapes_are_rejected() {
        for token in ["", "1700000000000", "a.b.c.d", "abc.sig", "123.", "1700000000000_sig"] {
            let err = parse(token).unwrap_err();
            assert_eq!(
                err.error_kind,
                ErrorKind::Token(TokenErrorKind::Malformed),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn test_non_base64_signature_is_invalid_signature() {
        let parsed = parse("42.***").unwrap();

        let err = signer().verify(&parsed).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::InvalidSignature));
    }

    #[test]
    fn test_grant_serializes_expires_in_as_string() {
        let grant = TokenGrant {
            token: "1.abc".to_string(),
            expires_in: "300".to_string(),
        };

        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["expires_in"], "300");
        assert_eq!(json["token"], "1.abc");
    }
}
