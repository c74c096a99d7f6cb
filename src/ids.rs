//! Validated record identifiers.
//!
//! Every entity is keyed by a positive 64-bit id. Raw path segments are parsed
//! into an [`Id`] once at the handler boundary (see `rest::extract::PathId`),
//! so storage never sees an unchecked string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(NonZeroU64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid id `{0}`: expected a positive integer")]
    Malformed(String),
}

impl Id {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Big-endian key so that Sled iteration follows id order.
    pub fn to_key(self) -> [u8; 8] {
        self.get().to_be_bytes()
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .ok()
            .and_then(Id::new)
            .ok_or_else(|| IdError::Malformed(s.to_owned()))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_integers_only() {
        assert_eq!("42".parse::<Id>().unwrap().get(), 42);
        assert_eq!(" 7 ".parse::<Id>().unwrap().get(), 7);
        assert!("0".parse::<Id>().is_err());
        assert!("-3".parse::<Id>().is_err());
        assert!("abc".parse::<Id>().is_err());
        assert!("".parse::<Id>().is_err());
    }

    #[test]
    fn keys_sort_in_id_order() {
        let small = Id::new(2).unwrap().to_key();
        let large = Id::new(300).unwrap().to_key();
        assert!(small < large);
    }

    #[test]
    fn zero_is_rejected_when_deserializing() {
        assert!(serde_json::from_str::<Id>("0").is_err());
        assert_eq!(serde_json::from_str::<Id>("5").unwrap().get(), 5);
    }
}
