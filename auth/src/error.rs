//! Error types for the `auth` crate.
//!
//! Follows the same pattern as the other layers: a root Error struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the auth crate.
/// Every handshake rejection is an `Error`; the kind carries the reason.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ip(IpErrorKind),
    Token(TokenErrorKind),
    Blacklist(BlacklistErrorKind),
}

/// Errors from remote address filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpErrorKind {
    /// Address matched a blacklist pattern.
    Blacklisted,
    /// Whitelist is non-empty and no pattern matched.
    NotWhitelisted,
    /// A configured pattern could not be parsed.
    InvalidPattern,
}

/// Errors from handshake token validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenErrorKind {
    Missing,
    Malformed,
    Blacklisted,
    Expired,
    NotYetValid,
    InvalidSignature,
    InvalidKey,
}

/// Errors from the token blacklist store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistErrorKind {
    Unavailable,
}

impl Error {
    /// Short machine readable reason, safe to log and to return to a client.
    pub fn reason(&self) -> &'static str {
        match self.error_kind {
            ErrorKind::Ip(IpErrorKind::Blacklisted) => "ip_blacklisted",
            ErrorKind::Ip(IpErrorKind::NotWhitelisted) => "ip_not_whitelisted",
            ErrorKind::Ip(IpErrorKind::InvalidPattern) => "ip_pattern_invalid",
            ErrorKind::Token(TokenErrorKind::Missing) => "token_missing",
            ErrorKind::Token(TokenErrorKind::Malformed) => "token_malformed",
            ErrorKind::Token(TokenErrorKind::Blacklisted) => "token_blacklisted",
            ErrorKind::Token(TokenErrorKind::Expired) => "token_expired",
            ErrorKind::Token(TokenErrorKind::NotYetValid) => "token_not_yet_valid",
            ErrorKind::Token(TokenErrorKind::InvalidSignature) => "token_signature_invalid",
            ErrorKind::Token(TokenErrorKind::InvalidKey) => "token_key_invalid",
            ErrorKind::Blacklist(BlacklistErrorKind::Unavailable) => "blacklist_unavailable",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Ip(kind) => write!(f, "IP error: {:?}", kind)?,
            ErrorKind::Token(kind) => write!(f, "Token error: {:?}", kind)?,
            ErrorKind::Blacklist(kind) => write!(f, "Blacklist error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Helper function to create IP filtering errors.
pub fn ip_error(kind: IpErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Ip(kind),
    }
}

/// Helper function to create token errors.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

/// Helper function to create blacklist store errors.
pub fn blacklist_error(kind: BlacklistErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Blacklist(kind),
    }
}
