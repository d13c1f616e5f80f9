//! EMV CA Keys - Certificate Authority public key management
//!
//! This crate loads CA public keys from a trust-anchor document, verifies the
//! checksum of every key before accepting it, and serves lookups by RID and
//! key index to the certificate-chain validation in `emv-card`.
//!
//! # Example
//! ```
//! use emv_ca_keys::{rids, TrustStore};
//!
//! let store = TrustStore::load("[]").expect("empty document is valid");
//! assert!(store.lookup(rids::MASTERCARD, 0x05).is_none());
//! ```

pub mod anchor;
pub mod error;
pub mod key;
pub mod shared;
pub mod store;

pub use error::{DuplicateKeyError, LoadError};
pub use key::{compute_checksum, CaKeyParts, CaPublicKey, Rid};
pub use shared::SharedTrustStore;
pub use store::TrustStore;

/// Common RIDs for major payment schemes
pub mod rids {
    /// Visa RID
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03];

    /// Mastercard RID
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04];

    /// American Express RID
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x02];

    /// Discover RID
    pub const DISCOVER: &[u8] = &[0xA0, 0x00, 0x00, 0x01, 0x52];

    /// JCB RID
    pub const JCB: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x65];

    /// UnionPay RID
    pub const UNIONPAY: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x33];
}
