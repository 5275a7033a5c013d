//! Shared domain types for logship: configuration and file identity.

pub mod config;
pub mod fingerprint;

pub use config::Config;
pub use fingerprint::Fingerprint;
