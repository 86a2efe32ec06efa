//! Multisite booking sync
//!
//! A master site serves availability and bookings to child sites over HTTP.
//! Children hold no appointments; every booking goes through the master.

pub mod client;

use std::str::FromStr;

use sha2::{Digest, Sha256};

pub use client::SyncClient;

/// Header carrying the shared secret
pub const SYNC_KEY_HEADER: &str = "x-sync-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Standalone,
    Master,
    Child,
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "standalone" | "off" => Ok(Self::Standalone),
            "master" => Ok(Self::Master),
            "child" => Ok(Self::Child),
            other => Err(format!("unknown sync mode '{}'", other)),
        }
    }
}

/// Compare two secrets through their SHA-256 digests
///
/// Digests have a fixed length, and the byte comparison visits all of them.
pub fn keys_match(expected: &str, provided: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A request must carry the key both in the header and in its parameters
pub fn authorize(expected: &str, header: Option<&str>, param: Option<&str>) -> bool {
    if expected.is_empty() {
        return false;
    }
    match (header, param) {
        (Some(header), Some(param)) => keys_match(expected, header) && keys_match(expected, param),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("master".parse::<SyncMode>().unwrap(), SyncMode::Master);
        assert_eq!(" Child ".parse::<SyncMode>().unwrap(), SyncMode::Child);
        assert_eq!("".parse::<SyncMode>().unwrap(), SyncMode::Standalone);
        assert!("primary".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("s3cret-key", "s3cret-key"));
        assert!(!keys_match("s3cret-key", "s3cret-kez"));
        assert!(!keys_match("s3cret-key", ""));
    }

    #[test]
    fn test_authorize_requires_both_places() {
        assert!(authorize("k", Some("k"), Some("k")));
        assert!(!authorize("k", Some("k"), None));
        assert!(!authorize("k", None, Some("k")));
        assert!(!authorize("k", Some("k"), Some("x")));
        // An unset key never authorizes
        assert!(!authorize("", Some(""), Some("")));
    }
}
