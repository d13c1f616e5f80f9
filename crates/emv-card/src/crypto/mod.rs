//! Offline data authentication: certificate chain, signed data and the
//! authentication input assembled from application records

pub mod certificate;
pub mod oda;
pub mod pin;
pub mod recover;
pub mod signed_data;

pub use certificate::{
    IccPinEnciphermentCertificate, IccPublicKeyCertificate, IssuerPublicKeyCertificate, RecoveredPublicKey,
    Validity,
};
pub use oda::build_auth_input;
pub use pin::{encipher_pin_block, plaintext_pin_block, PinDigits};
pub use recover::recover;
pub use signed_data::{IccDynamicData, SignedDynamicApplicationData, SignedStaticApplicationData};

/// First byte of every recovered block
pub(crate) const HEADER: u8 = 0x6A;
/// Last byte of every recovered block
pub(crate) const TRAILER: u8 = 0xBC;
pub(crate) const HASH_LEN: usize = 20;
/// Hash algorithm indicator for SHA-1
pub(crate) const SHA1_INDICATOR: u8 = 0x01;

/// Offline data authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMethod {
    Sda,
    Dda,
    Cda,
    None,
}

impl AuthenticationMethod {
    /// Pick the strongest method both the card (AIP byte 1) and the terminal
    /// (Terminal Capabilities byte 3) support, CDA before DDA before SDA
    pub fn select(aip: &[u8], terminal_capabilities: &[u8; 3]) -> Self {
        let card = aip.first().copied().unwrap_or(0);
        let terminal = terminal_capabilities[2];

        if card & 0x01 != 0 && terminal & 0x08 != 0 {
            AuthenticationMethod::Cda
        } else if card & 0x20 != 0 && terminal & 0x40 != 0 {
            AuthenticationMethod::Dda
        } else if card & 0x40 != 0 && terminal & 0x80 != 0 {
            AuthenticationMethod::Sda
        } else {
            AuthenticationMethod::None
        }
    }
}

impl std::fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthenticationMethod::Sda => "SDA",
            AuthenticationMethod::Dda => "DDA",
            AuthenticationMethod::Cda => "CDA",
            AuthenticationMethod::None => "none",
        })
    }
}
