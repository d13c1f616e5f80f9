//! Signed Static Application Data (93) and Signed Dynamic Application Data (9F4B)

use std::cell::OnceCell;

use sha1::{Digest, Sha1};

use super::certificate::{RecoveredPublicKey, Validity};
use super::recover::recover;
use super::{HASH_LEN, HEADER, SHA1_INDICATOR, TRAILER};
use crate::error::{SignedDataError, SignedDataKind};

const SSAD_FORMAT: u8 = 0x03;
const SDAD_FORMAT: u8 = 0x05;

/// Recover `signed` and check the fixed frame shared by both formats
///
/// Returns the recovered block once header, format, hash algorithm, hash
/// (over `recovered[1..hash]` followed by `extra`) and trailer all check out.
/// Padding is hashed as recovered and its bytes are not required to be `BB`.
fn validate_frame(
    kind: SignedDataKind,
    format: u8,
    min_fields: usize,
    signed: &[u8],
    key: &RecoveredPublicKey,
    extra: &[u8],
) -> Result<Vec<u8>, SignedDataError> {
    if signed.len() != key.modulus.len() {
        return Err(SignedDataError::LengthMismatch {
            kind,
            expected: key.modulus.len(),
            actual: signed.len(),
        });
    }

    let recovered = recover(signed, &key.exponent, &key.modulus);
    if recovered.len() < min_fields + HASH_LEN + 1 {
        return Err(SignedDataError::Truncated { kind });
    }

    if recovered[0] != HEADER {
        return Err(SignedDataError::BadHeader {
            kind,
            found: recovered[0],
        });
    }
    if recovered[1] != format {
        return Err(SignedDataError::BadFormat {
            kind,
            expected: format,
            found: recovered[1],
        });
    }
    if recovered[2] != SHA1_INDICATOR {
        return Err(SignedDataError::UnsupportedHashAlgorithm {
            kind,
            indicator: recovered[2],
        });
    }

    let hash_start = recovered.len() - HASH_LEN - 1;
    let mut hasher = Sha1::new();
    hasher.update(&recovered[1..hash_start]);
    hasher.update(extra);
    if hasher.finalize().as_slice() != &recovered[hash_start..hash_start + HASH_LEN] {
        return Err(SignedDataError::HashMismatch { kind });
    }

    let trailer = recovered[recovered.len() - 1];
    if trailer != TRAILER {
        return Err(SignedDataError::BadTrailer { kind, found: trailer });
    }

    Ok(recovered)
}

fn validity_of<T>(cell: &OnceCell<Result<T, SignedDataError>>) -> Validity {
    match cell.get() {
        None => Validity::Unvalidated,
        Some(Ok(_)) => Validity::Valid,
        Some(Err(_)) => Validity::Invalid,
    }
}

/// Signed Static Application Data, verified with the issuer key (SDA)
#[derive(Debug)]
pub struct SignedStaticApplicationData {
    signed: Vec<u8>,
    outcome: OnceCell<Result<[u8; 2], SignedDataError>>,
}

impl SignedStaticApplicationData {
    pub fn new(signed: Vec<u8>) -> Self {
        Self {
            signed,
            outcome: OnceCell::new(),
        }
    }

    pub fn signed_bytes(&self) -> &[u8] {
        &self.signed
    }

    /// Validate against the issuer key and the offline data authentication input
    ///
    /// Layout: `6A 03 <hash algo> <DAC:2> <BB padding> <hash:20> BC`. The
    /// length check happens before any RSA operation. Returns the Data
    /// Authentication Code. Memoized.
    pub fn validate(&self, issuer_key: &RecoveredPublicKey, oda_input: &[u8]) -> Result<[u8; 2], SignedDataError> {
        self.outcome
            .get_or_init(|| {
                let outcome = validate_frame(
                    SignedDataKind::Static,
                    SSAD_FORMAT,
                    5,
                    &self.signed,
                    issuer_key,
                    oda_input,
                )
                .map(|recovered| [recovered[3], recovered[4]]);
                if let Err(e) = &outcome {
                    tracing::warn!(error = %e, "Signed static application data invalid");
                }
                outcome
            })
            .clone()
    }

    pub fn validity(&self) -> Validity {
        validity_of(&self.outcome)
    }

    /// Data Authentication Code (9F45), once validated
    pub fn data_authentication_code(&self) -> Option<[u8; 2]> {
        self.outcome.get().and_then(|r| r.as_ref().ok()).copied()
    }
}

/// ICC dynamic data recovered from a valid SDAD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IccDynamicData {
    /// ICC Dynamic Number (9F4C)
    pub icc_dynamic_number: Vec<u8>,
    /// The complete ICC dynamic data field, including the number's length byte
    pub raw: Vec<u8>,
}

/// Signed Dynamic Application Data, verified with the ICC key (DDA)
#[derive(Debug)]
pub struct SignedDynamicApplicationData {
    signed: Vec<u8>,
    outcome: OnceCell<Result<IccDynamicData, SignedDataError>>,
}

impl SignedDynamicApplicationData {
    pub fn new(signed: Vec<u8>) -> Self {
        Self {
            signed,
            outcome: OnceCell::new(),
        }
    }

    /// Validate against the ICC key and the data sent in INTERNAL AUTHENTICATE
    ///
    /// Layout: `6A 05 <hash algo> <LDD> <ICC dynamic data:LDD> <BB padding>
    /// <hash:20> BC`. The dynamic data and its padding are hashed as
    /// recovered, followed by `terminal_dynamic_data`. Memoized.
    pub fn validate(
        &self,
        icc_key: &RecoveredPublicKey,
        terminal_dynamic_data: &[u8],
    ) -> Result<&IccDynamicData, SignedDataError> {
        self.outcome
            .get_or_init(|| {
                let kind = SignedDataKind::Dynamic;
                let outcome = validate_frame(kind, SDAD_FORMAT, 4, &self.signed, icc_key, terminal_dynamic_data)
                    .and_then(|recovered| {
                        let ldd = recovered[3] as usize;
                        let hash_start = recovered.len() - HASH_LEN - 1;
                        if 4 + ldd > hash_start {
                            return Err(SignedDataError::Truncated { kind });
                        }
                        let raw = recovered[4..4 + ldd].to_vec();
                        let number_len = raw.first().copied().unwrap_or(0) as usize;
                        if number_len + 1 > raw.len() {
                            return Err(SignedDataError::Truncated { kind });
                        }
                        Ok(IccDynamicData {
                            icc_dynamic_number: raw[1..1 + number_len].to_vec(),
                            raw,
                        })
                    });
                if let Err(e) = &outcome {
                    tracing::warn!(error = %e, "Signed dynamic application data invalid");
                }
                outcome
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn validity(&self) -> Validity {
        validity_of(&self.outcome)
    }

    pub fn icc_dynamic_data(&self) -> Option<&IccDynamicData> {
        self.outcome.get().and_then(|r| r.as_ref().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(len: usize) -> RecoveredPublicKey {
        RecoveredPublicKey {
            identifier: "4761739001010010".to_string(),
            expiration: [0x12, 0x49],
            serial_number: [0x00, 0x00, 0x01],
            hash_algorithm_indicator: 1,
            public_key_algorithm_indicator: 1,
            modulus: vec![0xC3; len],
            exponent: vec![0x03],
        }
    }

    #[test]
    fn test_ssad_length_precondition() {
        let ssad = SignedStaticApplicationData::new(vec![0x5A; 127]);
        assert_eq!(
            ssad.validate(&key(128), &[]),
            Err(SignedDataError::LengthMismatch {
                kind: SignedDataKind::Static,
                expected: 128,
                actual: 127
            })
        );
        assert_eq!(ssad.validity(), Validity::Invalid);
        assert_eq!(ssad.data_authentication_code(), None);
    }

    #[test]
    fn test_sdad_length_precondition() {
        let sdad = SignedDynamicApplicationData::new(vec![0x5A; 97]);
        assert!(matches!(
            sdad.validate(&key(96), &[0x01, 0x02, 0x03, 0x04]),
            Err(SignedDataError::LengthMismatch { kind: SignedDataKind::Dynamic, .. })
        ));
    }
}
