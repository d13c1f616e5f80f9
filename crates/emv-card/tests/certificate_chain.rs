//! Certificate chain and signed data against keys issued under the test CA

mod common;

use common::*;
use emv_ca_keys::CaPublicKey;
use emv_card::crypto::{
    recover, IccPinEnciphermentCertificate, IccPublicKeyCertificate, IssuerPublicKeyCertificate, RecoveredPublicKey,
    SignedDynamicApplicationData, SignedStaticApplicationData, Validity,
};
use emv_card::error::{CertificateType, SignedDataKind};
use emv_card::{CertError, SignedDataError};

fn with_ca_key<R>(f: impl FnOnce(&CaPublicKey) -> R) -> R {
    let store = trust_store();
    let key = store.lookup(&bytes(RID), CA_INDEX).expect("test CA key present");
    f(key)
}

fn issuer_certificate(signed: Vec<u8>, remainder: Vec<u8>) -> IssuerPublicKeyCertificate {
    IssuerPublicKeyCertificate::new(CA_INDEX, signed, remainder, vec![0x03])
}

fn issuer_key() -> RecoveredPublicKey {
    with_ca_key(|ca| {
        issuer_certificate(bytes(ISSUER_CERTIFICATE), bytes(ISSUER_REMAINDER))
            .validate(ca)
            .expect("issuer certificate is valid")
            .clone()
    })
}

fn icc_key() -> RecoveredPublicKey {
    RecoveredPublicKey {
        identifier: PAN.to_string(),
        expiration: [0x12, 0x49],
        serial_number: [0x00, 0x00, 0x01],
        hash_algorithm_indicator: 0x01,
        public_key_algorithm_indicator: 0x01,
        modulus: bytes(ICC_MODULUS),
        exponent: vec![0x03],
    }
}

/// Recover the issuer certificate, let `edit` change the block and sign it again
fn resigned_issuer_certificate(edit: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut plain = recover(&bytes(ISSUER_CERTIFICATE), &[0x03], &bytes(CA_MODULUS));
    edit(&mut plain);
    sign(&plain, CA_PRIVATE_EXPONENT, CA_MODULUS)
}

fn oda_input() -> Vec<u8> {
    Personalisation::dda().oda_input()
}

#[test]
fn test_issuer_certificate_recovers_key() {
    with_ca_key(|ca| {
        let cert = issuer_certificate(bytes(ISSUER_CERTIFICATE), bytes(ISSUER_REMAINDER));
        assert_eq!(cert.validity(), Validity::Unvalidated);

        let key = cert.validate(ca).expect("valid");
        assert_eq!(key.identifier, "476173");
        assert_eq!(key.expiration, [0x12, 0x49]);
        assert_eq!(key.serial_number, [0x5A, 0x1B, 0x2C]);
        assert_eq!(key.modulus, bytes(ISSUER_MODULUS));
        assert_eq!(key.exponent, vec![0x03]);
        assert_eq!(key.expiration_string(), "1249");
        assert_eq!(cert.validity(), Validity::Valid);
        assert!(cert.public_key().is_some());
    });
}

#[test]
fn test_issuer_certificate_needs_remainder() {
    with_ca_key(|ca| {
        let cert = issuer_certificate(bytes(ISSUER_CERTIFICATE), Vec::new());
        assert_eq!(
            cert.validate(ca).unwrap_err(),
            CertError::MissingRemainder {
                cert: CertificateType::Issuer,
                missing: 20,
            }
        );
        assert_eq!(cert.validity(), Validity::Invalid);
        assert!(cert.public_key().is_none());
    });
}

#[test]
fn test_issuer_certificate_rejects_extra_remainder() {
    with_ca_key(|ca| {
        let mut remainder = bytes(ISSUER_REMAINDER);
        remainder.push(0x00);
        let cert = issuer_certificate(bytes(ISSUER_CERTIFICATE), remainder);
        assert!(matches!(
            cert.validate(ca),
            Err(CertError::ResidualBytes { count: 1, .. })
        ));
    });
}

#[test]
fn test_tampered_remainder_breaks_hash() {
    with_ca_key(|ca| {
        let mut remainder = bytes(ISSUER_REMAINDER);
        remainder[0] ^= 0x01;
        let cert = issuer_certificate(bytes(ISSUER_CERTIFICATE), remainder);
        assert_eq!(
            cert.validate(ca).unwrap_err(),
            CertError::HashMismatch {
                cert: CertificateType::Issuer
            }
        );
    });
}

#[test]
fn test_wrong_exponent_breaks_hash() {
    with_ca_key(|ca| {
        let cert = IssuerPublicKeyCertificate::new(
            CA_INDEX,
            bytes(ISSUER_CERTIFICATE),
            bytes(ISSUER_REMAINDER),
            vec![0x01, 0x00, 0x01],
        );
        assert!(matches!(cert.validate(ca), Err(CertError::HashMismatch { .. })));
    });
}

#[test]
fn test_certificate_length_must_match_ca_key() {
    with_ca_key(|ca| {
        let mut signed = bytes(ISSUER_CERTIFICATE);
        signed.pop();
        let cert = issuer_certificate(signed, bytes(ISSUER_REMAINDER));
        assert_eq!(
            cert.validate(ca).unwrap_err(),
            CertError::LengthMismatch {
                cert: CertificateType::Issuer,
                expected: 144,
                actual: 143,
            }
        );
    });
}

#[test]
fn test_recovered_frame_checks() {
    with_ca_key(|ca| {
        let header = resigned_issuer_certificate(|plain| plain[0] = 0x6B);
        assert!(matches!(
            issuer_certificate(header, bytes(ISSUER_REMAINDER)).validate(ca),
            Err(CertError::BadHeader { found: 0x6B, .. })
        ));

        let format = resigned_issuer_certificate(|plain| plain[1] = 0x04);
        assert!(matches!(
            issuer_certificate(format, bytes(ISSUER_REMAINDER)).validate(ca),
            Err(CertError::BadFormat {
                expected: 0x02,
                found: 0x04,
                ..
            })
        ));

        let algorithm = resigned_issuer_certificate(|plain| plain[11] = 0x02);
        assert!(matches!(
            issuer_certificate(algorithm, bytes(ISSUER_REMAINDER)).validate(ca),
            Err(CertError::UnsupportedHashAlgorithm { indicator: 0x02, .. })
        ));

        let trailer = resigned_issuer_certificate(|plain| {
            let last = plain.len() - 1;
            plain[last] = 0xBD;
        });
        assert!(matches!(
            issuer_certificate(trailer, bytes(ISSUER_REMAINDER)).validate(ca),
            Err(CertError::BadTrailer { found: 0xBD, .. })
        ));
    });
}

#[test]
fn test_validation_outcome_is_kept() {
    let store = trust_store();
    let ca = store.lookup(&bytes(RID), CA_INDEX).unwrap();
    let cert = issuer_certificate(bytes(ISSUER_CERTIFICATE), bytes(ISSUER_REMAINDER));
    let first = cert.validate(ca).unwrap().clone();

    // A second call does not look at the key again
    let other = CaPublicKey::new(emv_ca_keys::CaKeyParts {
        rid: [0xA0, 0x00, 0x00, 0x09, 0x99],
        index: 0x93,
        description: "Other".to_string(),
        expiration_date: chrono::NaiveDate::from_ymd_opt(2049, 12, 31).unwrap(),
        modulus: bytes(ISSUER_MODULUS),
        exponent: vec![0x03],
        hash_algorithm_indicator: 0x01,
        public_key_algorithm_indicator: 0x01,
        checksum: emv_ca_keys::compute_checksum(
            &[0xA0, 0x00, 0x00, 0x09, 0x99],
            0x93,
            &bytes(ISSUER_MODULUS),
            &[0x03],
        )
        .to_vec(),
    })
    .unwrap();
    assert_eq!(cert.validate(&other).unwrap(), &first);
}

#[test]
fn test_icc_certificate_with_remainder() {
    let issuer = issuer_key();
    let input = oda_input();
    let (signed, remainder) = issue_icc_certificate(&bytes(ICC_MODULUS), PAN, [0x12, 0x49], &input);
    assert_eq!(remainder.len(), 10);

    let cert = IccPublicKeyCertificate::new(signed, remainder, vec![0x03]);
    let key = cert.validate(&issuer, &input).expect("valid");
    assert_eq!(key.identifier, PAN);
    assert_eq!(key.modulus, bytes(ICC_MODULUS));
    assert_eq!(key.modulus_len(), 96);
    assert_eq!(cert.validity(), Validity::Valid);
}

#[test]
fn test_icc_certificate_covers_authentication_input() {
    let issuer = issuer_key();
    let input = oda_input();
    let (signed, remainder) = issue_icc_certificate(&bytes(ICC_MODULUS), PAN, [0x12, 0x49], &input);

    let mut altered = input.clone();
    let last = altered.len() - 1;
    altered[last] ^= 0xFF;

    let cert = IccPublicKeyCertificate::new(signed, remainder, vec![0x03]);
    assert_eq!(
        cert.validate(&issuer, &altered).unwrap_err(),
        CertError::HashMismatch {
            cert: CertificateType::Icc
        }
    );
    // Decided on first use
    assert!(cert.validate(&issuer, &input).is_err());
}

#[test]
fn test_icc_certificate_missing_remainder() {
    let issuer = issuer_key();
    let input = oda_input();
    let (signed, _) = issue_icc_certificate(&bytes(ICC_MODULUS), PAN, [0x12, 0x49], &input);
    let cert = IccPublicKeyCertificate::new(signed, Vec::new(), vec![0x03]);
    assert_eq!(
        cert.validate(&issuer, &input).unwrap_err(),
        CertError::MissingRemainder {
            cert: CertificateType::Icc,
            missing: 10,
        }
    );
}

#[test]
fn test_pin_certificate_fits_without_remainder() {
    let issuer = issuer_key();
    let input = oda_input();
    let (signed, remainder) = issue_icc_certificate(&bytes(PIN_MODULUS), PAN, [0x12, 0x49], &input);
    assert!(remainder.is_empty());

    let cert = IccPinEnciphermentCertificate::new(signed.clone(), Vec::new(), vec![0x03]);
    let key = cert.validate(&issuer, &input).expect("valid");
    assert_eq!(key.modulus, bytes(PIN_MODULUS));

    let padded = IccPinEnciphermentCertificate::new(signed, vec![0xBB], vec![0x03]);
    assert_eq!(
        padded.validate(&issuer, &input).unwrap_err(),
        CertError::ResidualBytes {
            cert: CertificateType::IccPinEncipherment,
            count: 1,
        }
    );
}

#[test]
fn test_static_data_returns_dac() {
    let issuer = issuer_key();
    let input = oda_input();
    let ssad = SignedStaticApplicationData::new(sign_static_data([0xDA, 0xC1], &input));
    assert_eq!(ssad.data_authentication_code(), None);
    assert_eq!(ssad.validate(&issuer, &input), Ok([0xDA, 0xC1]));
    assert_eq!(ssad.data_authentication_code(), Some([0xDA, 0xC1]));
    assert_eq!(ssad.validity(), Validity::Valid);
}

#[test]
fn test_static_data_padding_is_hashed_as_recovered() {
    let issuer = issuer_key();
    let input = oda_input();
    let mut plain = vec![0x6A, 0x03, 0x01, 0xDA, 0xC1];
    plain.resize(bytes(ISSUER_MODULUS).len() - 21, 0x00);
    let hash = digest(&[&plain[1..], &input]);
    plain.extend_from_slice(&hash);
    plain.push(0xBC);

    let ssad = SignedStaticApplicationData::new(sign(&plain, ISSUER_PRIVATE_EXPONENT, ISSUER_MODULUS));
    assert_eq!(ssad.validate(&issuer, &input), Ok([0xDA, 0xC1]));
}

#[test]
fn test_static_data_over_other_records_fails() {
    let issuer = issuer_key();
    let input = oda_input();
    let ssad = SignedStaticApplicationData::new(sign_static_data([0xDA, 0xC1], &input));
    assert_eq!(
        ssad.validate(&issuer, &input[1..]),
        Err(SignedDataError::HashMismatch {
            kind: SignedDataKind::Static
        })
    );
    assert_eq!(ssad.validity(), Validity::Invalid);
}

#[test]
fn test_static_data_length_checked_first() {
    let issuer = issuer_key();
    let ssad = SignedStaticApplicationData::new(vec![0x00; 96]);
    assert_eq!(
        ssad.validate(&issuer, &[]),
        Err(SignedDataError::LengthMismatch {
            kind: SignedDataKind::Static,
            expected: 128,
            actual: 96,
        })
    );
}

#[test]
fn test_dynamic_data_recovers_number() {
    let terminal_data = [0x01, 0x02, 0x03, 0x04];
    let sdad = SignedDynamicApplicationData::new(sign_dynamic_data(&[0xA1, 0xA2, 0xA3, 0xA4], &terminal_data));
    let dynamic = sdad.validate(&icc_key(), &terminal_data).expect("valid");
    assert_eq!(dynamic.icc_dynamic_number, vec![0xA1, 0xA2, 0xA3, 0xA4]);
    assert_eq!(dynamic.raw, vec![0x04, 0xA1, 0xA2, 0xA3, 0xA4]);
    assert!(sdad.icc_dynamic_data().is_some());
}

#[test]
fn test_dynamic_data_bound_to_terminal_data() {
    let sdad = SignedDynamicApplicationData::new(sign_dynamic_data(&[0xA1; 8], &[0x01, 0x02, 0x03, 0x04]));
    assert!(matches!(
        sdad.validate(&icc_key(), &[0x01, 0x02, 0x03, 0x05]),
        Err(SignedDataError::HashMismatch {
            kind: SignedDataKind::Dynamic
        })
    ));
    assert_eq!(sdad.validity(), Validity::Invalid);
    assert!(sdad.icc_dynamic_data().is_none());
}
