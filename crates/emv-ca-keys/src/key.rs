//! Certification Authority public keys

use chrono::NaiveDate;
use rsa::{BigUint, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::LoadError;

/// Registered Application Provider Identifier
pub type Rid = [u8; 5];

/// A CA public key whose checksum has been verified
///
/// The only constructor is [`CaPublicKey::new`], which recomputes the
/// SHA-1 checksum, so holding a value of this type means the key passed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaPublicKey {
    rid: Rid,
    index: u8,
    description: String,
    expiration_date: NaiveDate,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
    hash_algorithm_indicator: u8,
    public_key_algorithm_indicator: u8,
    checksum: [u8; 20],
}

/// Unverified key material as read from a trust-anchor source
#[derive(Debug, Clone)]
pub struct CaKeyParts {
    pub rid: Rid,
    pub index: u8,
    pub description: String,
    pub expiration_date: NaiveDate,
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
    pub hash_algorithm_indicator: u8,
    pub public_key_algorithm_indicator: u8,
    pub checksum: Vec<u8>,
}

impl CaPublicKey {
    /// Verify the checksum and RSA parameters of `parts`
    pub fn new(parts: CaKeyParts) -> Result<Self, LoadError> {
        let rid_hex = hex::encode_upper(parts.rid);
        let expected = compute_checksum(&parts.rid, parts.index, &parts.modulus, &parts.exponent);
        if parts.checksum.as_slice() != expected.as_slice() {
            tracing::warn!(rid = %rid_hex, index = parts.index, "CA key checksum mismatch");
            return Err(LoadError::ChecksumMismatch {
                rid: rid_hex,
                index: parts.index,
            });
        }

        if parts.modulus.iter().all(|b| *b == 0) {
            return Err(LoadError::InvalidKey {
                rid: rid_hex,
                index: parts.index,
                reason: "modulus is zero".to_string(),
            });
        }
        RsaPublicKey::new(
            BigUint::from_bytes_be(&parts.modulus),
            BigUint::from_bytes_be(&parts.exponent),
        )
        .map_err(|e| LoadError::InvalidKey {
            rid: rid_hex.clone(),
            index: parts.index,
            reason: e.to_string(),
        })?;

        Ok(Self {
            rid: parts.rid,
            index: parts.index,
            description: parts.description,
            expiration_date: parts.expiration_date,
            modulus: parts.modulus,
            exponent: parts.exponent,
            hash_algorithm_indicator: parts.hash_algorithm_indicator,
            public_key_algorithm_indicator: parts.public_key_algorithm_indicator,
            checksum: expected,
        })
    }

    pub fn rid(&self) -> &Rid {
        &self.rid
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn expiration_date(&self) -> NaiveDate {
        self.expiration_date
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    pub fn hash_algorithm_indicator(&self) -> u8 {
        self.hash_algorithm_indicator
    }

    pub fn public_key_algorithm_indicator(&self) -> u8 {
        self.public_key_algorithm_indicator
    }

    pub fn checksum(&self) -> &[u8; 20] {
        &self.checksum
    }

    /// Key length in bytes (`NCA`)
    pub fn modulus_len(&self) -> usize {
        self.modulus.len()
    }

    /// A key is unusable after the last day of its expiration date
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        today > self.expiration_date
    }

    /// The key as an `rsa` public key, for callers that want key metadata
    pub fn rsa_key(&self) -> Result<RsaPublicKey, rsa::Error> {
        RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.exponent),
        )
    }
}

/// `SHA1(RID || index || modulus || exponent)`
///
/// The index is hashed as its single-byte big-endian encoding.
pub fn compute_checksum(rid: &Rid, index: u8, modulus: &[u8], exponent: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(rid);
    hasher.update([index]);
    hasher.update(modulus);
    hasher.update(exponent);
    let digest = hasher.finalize();

    let mut out = [0u8; 20];
    out.copy_from_slice(digest.as_slice());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(checksum: Vec<u8>) -> CaKeyParts {
        CaKeyParts {
            rid: [0xA0, 0x00, 0x00, 0x09, 0x99],
            index: 0x01,
            description: "test".to_string(),
            expiration_date: NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
            modulus: vec![0xC3; 64],
            exponent: vec![0x03],
            hash_algorithm_indicator: 0x01,
            public_key_algorithm_indicator: 0x01,
            checksum,
        }
    }

    #[test]
    fn test_checksum_accepted() {
        let rid = [0xA0, 0x00, 0x00, 0x09, 0x99];
        let sum = compute_checksum(&rid, 0x01, &[0xC3; 64], &[0x03]);
        let key = CaPublicKey::new(parts(sum.to_vec())).expect("valid key");
        assert_eq!(key.checksum(), &sum);
        assert_eq!(key.modulus_len(), 64);
    }

    #[test]
    fn test_checksum_rejected() {
        let rid = [0xA0, 0x00, 0x00, 0x09, 0x99];
        let mut sum = compute_checksum(&rid, 0x01, &[0xC3; 64], &[0x03]);
        sum[19] ^= 0x01;
        let err = CaPublicKey::new(parts(sum.to_vec())).unwrap_err();
        assert!(matches!(err, LoadError::ChecksumMismatch { index: 0x01, .. }));
    }

    #[test]
    fn test_checksum_covers_index() {
        let rid = [0xA0, 0x00, 0x00, 0x09, 0x99];
        assert_ne!(
            compute_checksum(&rid, 0x01, &[0xC3; 64], &[0x03]),
            compute_checksum(&rid, 0x02, &[0xC3; 64], &[0x03])
        );
    }

    #[test]
    fn test_expiry() {
        let rid = [0xA0, 0x00, 0x00, 0x09, 0x99];
        let sum = compute_checksum(&rid, 0x01, &[0xC3; 64], &[0x03]);
        let key = CaPublicKey::new(parts(sum.to_vec())).unwrap();
        assert!(!key.is_expired(NaiveDate::from_ymd_opt(2030, 12, 31).unwrap()));
        assert!(key.is_expired(NaiveDate::from_ymd_opt(2031, 1, 1).unwrap()));
    }
}
