//! Bit-indexed revocation status lists.
//!
//! Each credential is assigned a permanent index in a named list at issuance.
//! Revocation flips that index's bit; publication packs every bit of a list
//! into a base64url bitstring with a content digest so verifiers can cache
//! and compare lists cheaply.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bitstring;
pub mod error;
pub mod list;

pub use error::{Result, StatusListError};
pub use list::{RevocationStatusList, StatusEntry, StatusListConfig, StatusListPublication};

/// Default number of indices in a list (16 KiB of bitstring).
pub const DEFAULT_LIST_CAPACITY: usize = 131_072;
