//! Response DTOs for endpoints whose bodies are not a lower-layer type as is.

pub(crate) mod stream;
pub(crate) mod token;
