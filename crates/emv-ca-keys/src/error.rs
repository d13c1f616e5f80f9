//! Trust store error types

use thiserror::Error;

/// A second key with the same (RID, index) was offered to the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("CA public key {rid}/{index:02X} is already present")]
pub struct DuplicateKeyError {
    pub rid: String,
    pub index: u8,
}

/// Reasons a trust-anchor source is rejected
///
/// Loading is fail-closed: any one of these aborts the whole load.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read trust anchors: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed trust-anchor document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("RID {0:?} is not 5 bytes of hex")]
    InvalidRid(String),

    #[error("CA key {rid}/{index:02X}: field {field} is not valid hex")]
    InvalidHex {
        rid: String,
        index: u8,
        field: &'static str,
    },

    #[error("CA key {rid}/{index:02X}: checksum does not match SHA-1(RID || index || modulus || exponent)")]
    ChecksumMismatch { rid: String, index: u8 },

    #[error("CA key {rid}/{index:02X}: unusable RSA key: {reason}")]
    InvalidKey {
        rid: String,
        index: u8,
        reason: String,
    },

    #[error(transparent)]
    Duplicate(#[from] DuplicateKeyError),
}
