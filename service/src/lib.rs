//! Ambient service concerns shared by the push service binaries: command line /
//! environment configuration and terminal logging.

pub mod config;
pub mod logging;
