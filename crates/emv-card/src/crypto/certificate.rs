//! Issuer, ICC and ICC PIN encipherment public key certificates
//!
//! Each certificate is a block signed with the key one level up (CA, then
//! issuer). Recovering it yields the subject's public key, or the leftmost
//! part of it when the key is too long to fit, in which case the rest is
//! carried in a separate remainder data element.
//!
//! Validation is lazy and happens at most once per certificate: the ICC
//! certificates hash the offline data authentication records, so they can
//! only be checked after every AFL record was read.

use std::cell::OnceCell;

use chrono::{Datelike, NaiveDate};
use emv_ca_keys::CaPublicKey;
use emv_common::bcd;
use sha1::{Digest, Sha1};

use super::recover::recover;
use super::{HASH_LEN, HEADER, SHA1_INDICATOR, TRAILER};
use crate::error::{CertError, CertificateType};

const ISSUER_FORMAT: u8 = 0x02;
const ICC_FORMAT: u8 = 0x04;

/// Outcome of lazy validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Unvalidated,
    Valid,
    Invalid,
}

/// Public key recovered from a valid certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPublicKey {
    /// Issuer identifier (issuer certificate) or PAN (ICC certificates), `F` padding stripped
    pub identifier: String,
    /// Certificate expiration date, MMYY
    pub expiration: [u8; 2],
    pub serial_number: [u8; 3],
    pub hash_algorithm_indicator: u8,
    pub public_key_algorithm_indicator: u8,
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

impl RecoveredPublicKey {
    /// Last day of the expiration month
    pub fn expiration_date(&self) -> Option<NaiveDate> {
        month_end(self.expiration)
    }

    /// Certificate expiry as `MMYY`
    pub fn expiration_string(&self) -> String {
        hex::encode_upper(self.expiration)
    }

    pub fn modulus_len(&self) -> usize {
        self.modulus.len()
    }
}

/// Last day of the month of a BCD `MMYY` date
pub(crate) fn month_end(mmyy: [u8; 2]) -> Option<NaiveDate> {
    let month = bcd::n_to_u64(&mmyy[..1])? as u32;
    let yy = bcd::n_to_u64(&mmyy[1..])? as i32;
    let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(first.year(), month + 1, 1)?
    };
    next.pred_opt()
}

/// Signing key of a certificate, either a CA key or a recovered issuer key
struct SignerKey<'a> {
    modulus: &'a [u8],
    exponent: &'a [u8],
}

/// Recover and check one certificate
///
/// `identifier_len` is 4 for the issuer certificate and 10 for ICC
/// certificates. The hash covers everything between the header and the hash
/// field as recovered, including any `BB` padding after the modulus, then
/// the remainder, the exponent and `extra`. Padding bytes are not required
/// to be `BB`; only the hash decides.
#[allow(clippy::too_many_arguments)]
fn validate_structure(
    cert: CertificateType,
    format: u8,
    identifier_len: usize,
    signed: &[u8],
    signer: SignerKey<'_>,
    remainder: &[u8],
    exponent: &[u8],
    extra: &[u8],
) -> Result<RecoveredPublicKey, CertError> {
    if signed.len() != signer.modulus.len() {
        return Err(CertError::LengthMismatch {
            cert,
            expected: signer.modulus.len(),
            actual: signed.len(),
        });
    }

    let recovered = recover(signed, signer.exponent, signer.modulus);

    // header, format, identifier, expiry(2), serial(3), 4 single-byte fields
    let fields_end = 2 + identifier_len + 2 + 3 + 4;
    if recovered.len() < fields_end + HASH_LEN + 1 {
        return Err(CertError::Truncated { cert });
    }

    if recovered[0] != HEADER {
        return Err(CertError::BadHeader {
            cert,
            found: recovered[0],
        });
    }
    if recovered[1] != format {
        return Err(CertError::BadFormat {
            cert,
            expected: format,
            found: recovered[1],
        });
    }

    let id_end = 2 + identifier_len;
    let identifier = &recovered[2..id_end];
    let expiration = [recovered[id_end], recovered[id_end + 1]];
    let serial_number = [recovered[id_end + 2], recovered[id_end + 3], recovered[id_end + 4]];
    let hash_algorithm_indicator = recovered[id_end + 5];
    let public_key_algorithm_indicator = recovered[id_end + 6];
    let modulus_len = recovered[id_end + 7] as usize;

    if hash_algorithm_indicator != SHA1_INDICATOR {
        return Err(CertError::UnsupportedHashAlgorithm {
            cert,
            indicator: hash_algorithm_indicator,
        });
    }

    let hash_start = recovered.len() - HASH_LEN - 1;
    let body = &recovered[fields_end..hash_start];

    let modulus = if modulus_len <= body.len() {
        if !remainder.is_empty() {
            return Err(CertError::ResidualBytes {
                cert,
                count: remainder.len(),
            });
        }
        body[..modulus_len].to_vec()
    } else {
        let needed = modulus_len - body.len();
        if remainder.len() < needed {
            return Err(CertError::MissingRemainder {
                cert,
                missing: needed - remainder.len(),
            });
        }
        if remainder.len() > needed {
            return Err(CertError::ResidualBytes {
                cert,
                count: remainder.len() - needed,
            });
        }
        let mut full = body.to_vec();
        full.extend_from_slice(remainder);
        full
    };

    let mut hasher = Sha1::new();
    hasher.update(&recovered[1..hash_start]);
    hasher.update(remainder);
    hasher.update(exponent);
    hasher.update(extra);
    let digest = hasher.finalize();
    if digest.as_slice() != &recovered[hash_start..hash_start + HASH_LEN] {
        return Err(CertError::HashMismatch { cert });
    }

    let trailer = recovered[recovered.len() - 1];
    if trailer != TRAILER {
        return Err(CertError::BadTrailer { cert, found: trailer });
    }

    // A non-digit before the padding is tolerated; the raw digits are kept.
    let identifier = bcd::cn_digits(identifier).unwrap_or_else(|| hex::encode_upper(identifier));

    Ok(RecoveredPublicKey {
        identifier,
        expiration,
        serial_number,
        hash_algorithm_indicator,
        public_key_algorithm_indicator,
        modulus,
        exponent: exponent.to_vec(),
    })
}

fn log_outcome(cert: CertificateType, outcome: &Result<RecoveredPublicKey, CertError>) {
    match outcome {
        Ok(key) => tracing::debug!(
            %cert,
            identifier = %key.identifier,
            modulus_len = key.modulus.len(),
            "Certificate valid"
        ),
        Err(e) => tracing::warn!(%cert, error = %e, "Certificate invalid"),
    }
}

fn validity_of(cell: &OnceCell<Result<RecoveredPublicKey, CertError>>) -> Validity {
    match cell.get() {
        None => Validity::Unvalidated,
        Some(Ok(_)) => Validity::Valid,
        Some(Err(_)) => Validity::Invalid,
    }
}

/// Issuer Public Key Certificate (90) with exponent (9F32) and remainder (92)
#[derive(Debug)]
pub struct IssuerPublicKeyCertificate {
    ca_key_index: u8,
    signed: Vec<u8>,
    remainder: Vec<u8>,
    exponent: Vec<u8>,
    outcome: OnceCell<Result<RecoveredPublicKey, CertError>>,
}

impl IssuerPublicKeyCertificate {
    pub fn new(ca_key_index: u8, signed: Vec<u8>, remainder: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self {
            ca_key_index,
            signed,
            remainder,
            exponent,
            outcome: OnceCell::new(),
        }
    }

    /// Index of the CA public key that signed this certificate (8F)
    pub fn ca_key_index(&self) -> u8 {
        self.ca_key_index
    }

    pub fn signed_bytes(&self) -> &[u8] {
        &self.signed
    }

    /// Validate against `ca_key`
    ///
    /// The first call decides; later calls return the stored outcome
    /// without recomputing it, whatever key they pass.
    pub fn validate(&self, ca_key: &CaPublicKey) -> Result<&RecoveredPublicKey, CertError> {
        self.outcome
            .get_or_init(|| {
                let outcome = validate_structure(
                    CertificateType::Issuer,
                    ISSUER_FORMAT,
                    4,
                    &self.signed,
                    SignerKey {
                        modulus: ca_key.modulus(),
                        exponent: ca_key.exponent(),
                    },
                    &self.remainder,
                    &self.exponent,
                    &[],
                );
                log_outcome(CertificateType::Issuer, &outcome);
                outcome
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn validity(&self) -> Validity {
        validity_of(&self.outcome)
    }

    /// The recovered key, once validation succeeded
    pub fn public_key(&self) -> Option<&RecoveredPublicKey> {
        self.outcome.get().and_then(|r| r.as_ref().ok())
    }
}

/// Certificate signed by the issuer key whose subject is a key on the card
#[derive(Debug)]
struct IccCertificate {
    cert: CertificateType,
    signed: Vec<u8>,
    remainder: Vec<u8>,
    exponent: Vec<u8>,
    outcome: OnceCell<Result<RecoveredPublicKey, CertError>>,
}

impl IccCertificate {
    fn new(cert: CertificateType, signed: Vec<u8>, remainder: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self {
            cert,
            signed,
            remainder,
            exponent,
            outcome: OnceCell::new(),
        }
    }

    fn validate(&self, issuer_key: &RecoveredPublicKey, oda_input: &[u8]) -> Result<&RecoveredPublicKey, CertError> {
        self.outcome
            .get_or_init(|| {
                let outcome = validate_structure(
                    self.cert,
                    ICC_FORMAT,
                    10,
                    &self.signed,
                    SignerKey {
                        modulus: &issuer_key.modulus,
                        exponent: &issuer_key.exponent,
                    },
                    &self.remainder,
                    &self.exponent,
                    oda_input,
                );
                log_outcome(self.cert, &outcome);
                outcome
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// ICC Public Key Certificate (9F46) with exponent (9F47) and remainder (9F48)
#[derive(Debug)]
pub struct IccPublicKeyCertificate(IccCertificate);

impl IccPublicKeyCertificate {
    pub fn new(signed: Vec<u8>, remainder: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self(IccCertificate::new(CertificateType::Icc, signed, remainder, exponent))
    }

    /// Validate against the recovered issuer key
    ///
    /// `oda_input` must be the complete offline data authentication input of
    /// the application. Memoized like [`IssuerPublicKeyCertificate::validate`].
    pub fn validate(&self, issuer_key: &RecoveredPublicKey, oda_input: &[u8]) -> Result<&RecoveredPublicKey, CertError> {
        self.0.validate(issuer_key, oda_input)
    }

    pub fn validity(&self) -> Validity {
        validity_of(&self.0.outcome)
    }

    pub fn public_key(&self) -> Option<&RecoveredPublicKey> {
        self.0.outcome.get().and_then(|r| r.as_ref().ok())
    }
}

/// ICC PIN Encipherment Public Key Certificate (9F2D) with exponent (9F2E) and remainder (9F2F)
#[derive(Debug)]
pub struct IccPinEnciphermentCertificate(IccCertificate);

impl IccPinEnciphermentCertificate {
    pub fn new(signed: Vec<u8>, remainder: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self(IccCertificate::new(
            CertificateType::IccPinEncipherment,
            signed,
            remainder,
            exponent,
        ))
    }

    pub fn validate(&self, issuer_key: &RecoveredPublicKey, oda_input: &[u8]) -> Result<&RecoveredPublicKey, CertError> {
        self.0.validate(issuer_key, oda_input)
    }

    pub fn validity(&self) -> Validity {
        validity_of(&self.0.outcome)
    }

    pub fn public_key(&self) -> Option<&RecoveredPublicKey> {
        self.0.outcome.get().and_then(|r| r.as_ref().ok())
    }
}
