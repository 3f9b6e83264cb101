//! Admission of WebSocket handshakes.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blacklist::TokenBlacklist;
use crate::error::{token_error, Error, TokenErrorKind};
use crate::ip_filter::IpFilter;
use crate::token::{self, TokenGrant, TokenSigner};

const DEFAULT_VALIDITY: Duration = Duration::from_secs(300);
const DEFAULT_MAX_FUTURE_SKEW: Duration = Duration::from_secs(30);

/// Identity handed to an admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub client_id: String,
    pub remote_ip: IpAddr,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

/// Decides whether a handshake may be upgraded.
///
/// Checks run in this order and the first failure wins:
/// IP blacklist, IP whitelist, token presence and shape, token age,
/// signature, revoked-token store.
pub struct HandshakeAuthenticator {
    ip_filter: IpFilter,
    signer: TokenSigner,
    blacklist: Arc<dyn TokenBlacklist>,
    validity: Duration,
    max_future_skew: Duration,
}

impl HandshakeAuthenticator {
    pub fn new(ip_filter: IpFilter, signer: TokenSigner, blacklist: Arc<dyn TokenBlacklist>) -> Self {
        Self {
            ip_filter,
            signer,
            blacklist,
            validity: DEFAULT_VALIDITY,
            max_future_skew: DEFAULT_MAX_FUTURE_SKEW,
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_max_future_skew(mut self, max_future_skew: Duration) -> Self {
        self.max_future_skew = max_future_skew;
        self
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub async fn authenticate(&self, remote_ip: IpAddr, token: Option<&str>) -> Result<Admission, Error> {
        self.authenticate_at(remote_ip, token, Utc::now()).await
    }

    /// Same as [`authenticate`](Self::authenticate) with an explicit clock.
    pub async fn authenticate_at(
        &self,
        remote_ip: IpAddr,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Admission, Error> {
        let result = self.check(remote_ip, token, now).await;
        if let Err(e) = &result {
            warn!("Handshake from {} rejected: {}", remote_ip, e.reason());
        }
        result
    }

    async fn check(&self, remote_ip: IpAddr, token: Option<&str>, now: DateTime<Utc>) -> Result<Admission, Error> {
        self.ip_filter.check(remote_ip)?;

        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| token_error(TokenErrorKind::Missing, "No token supplied"))?;
        let parsed = token::parse(token)?;

        let issued_at = issued_at(parsed.issued_at_millis)?;
        let age_millis = now
            .timestamp_millis()
            .checked_sub(parsed.issued_at_millis)
            .ok_or_else(|| token_error(TokenErrorKind::Malformed, "Token timestamp out of range"))?;
        if age_millis > millis(self.validity) {
            return Err(token_error(
                TokenErrorKind::Expired,
                &format!("Token is {age_millis}ms old"),
            ));
        }
        if age_millis < -millis(self.max_future_skew) {
            return Err(token_error(
                TokenErrorKind::NotYetValid,
                &format!("Token issued {}ms in the future", age_millis.unsigned_abs()),
            ));
        }

        self.signer.verify(&parsed)?;

        if self.blacklist.is_blacklisted(token).await? {
            return Err(token_error(TokenErrorKind::Blacklisted, "Token has been revoked"));
        }

        let client_id = Uuid::new_v4().to_string();
        debug!("Admitted client {} from {}", client_id, remote_ip);

        Ok(Admission {
            client_id,
            remote_ip,
            token: token.to_string(),
            issued_at,
        })
    }

    /// Mint a fresh token stamped with `now`.
    pub fn refresh_at(&self, now: DateTime<Utc>) -> Result<TokenGrant, Error> {
        Ok(TokenGrant {
            token: self.signer.issue(now)?,
            expires_in: self.validity.as_secs().to_string(),
        })
    }

    pub fn refresh(&self) -> Result<TokenGrant, Error> {
        self.refresh_at(Utc::now())
    }

    /// Revoke a token for the rest of its validity window.
    ///
    /// Returns `Ok(false)` when the token has already expired and nothing was stored.
    pub async fn revoke_at(&self, token: &str, now: DateTime<Utc>) -> Result<bool, Error> {
        let parsed = token::parse(token)?;
        issued_at(parsed.issued_at_millis)?;
        let expires_at_millis = parsed.issued_at_millis.saturating_add(millis(self.validity));
        let remaining = expires_at_millis.saturating_sub(now.timestamp_millis());
        if remaining <= 0 {
            return Ok(false);
        }
        self.blacklist
            .insert(token, Duration::from_millis(remaining as u64))
            .await?;
        debug!("Revoked token for {}ms", remaining);
        Ok(true)
    }

    pub async fn revoke(&self, token: &str) -> Result<bool, Error> {
        self.revoke_at(token, Utc::now()).await
    }
}

/// Timestamps outside chrono's range cannot come from a signer and are malformed.
fn issued_at(issued_at_millis: i64) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_millis_opt(issued_at_millis)
        .single()
        .ok_or_else(|| token_error(TokenErrorKind::Malformed, "Token timestamp out of range"))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
