use serde::Serialize;

/// Whether a revocation wrote a blacklist entry; expired tokens need none.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Revocation {
    pub(crate) revoked: bool,
}
