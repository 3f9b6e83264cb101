//! # auth
//!
//! Handshake admission for the push service:
//! - IP blacklist and whitelist patterns (exact, trailing wildcard, CIDR)
//! - HMAC-SHA256 signed, time-limited tokens
//! - Revoked-token blacklist with per-entry expiry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth::{HandshakeAuthenticator, IpFilter, MemoryTokenBlacklist, TokenSigner};
//!
//! let authenticator = HandshakeAuthenticator::new(
//!     IpFilter::from_patterns(&whitelist, &blacklist)?,
//!     TokenSigner::new(secret),
//!     Arc::new(MemoryTokenBlacklist::new()),
//! );
//! let admission = authenticator.authenticate(remote_ip, Some(token)).await?;
//! ```

pub mod blacklist;
pub mod error;
pub mod handshake;
pub mod ip_filter;
pub mod token;

// Re-export commonly used types
pub use blacklist::{MemoryTokenBlacklist, TokenBlacklist};
pub use error::{Error, ErrorKind};
pub use handshake::{Admission, HandshakeAuthenticator};
pub use ip_filter::{IpFilter, IpPattern};
pub use token::{TokenGrant, TokenSigner};
