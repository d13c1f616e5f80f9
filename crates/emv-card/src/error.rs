//! Error types for the terminal core
//!
//! Structural failures of signed data (`CertError`, `SignedDataError`) are
//! recoverable: they mark the object invalid and set a TVR bit. Data format
//! problems in what the card returned (`SmartCardError`) and unexpected status
//! words abort the current application (`TransactionError`).

use std::fmt;

use emv_common::EmvTag;
use thiserror::Error;

use crate::apdu::StatusWord;
use crate::transaction::TransactionState;

/// Which certificate of the chain an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateType {
    Issuer,
    Icc,
    IccPinEncipherment,
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateType::Issuer => "issuer public key",
            CertificateType::Icc => "ICC public key",
            CertificateType::IccPinEncipherment => "ICC PIN encipherment public key",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertError {
    #[error("{cert} certificate is {actual} bytes but the signing key modulus is {expected} bytes")]
    LengthMismatch {
        cert: CertificateType,
        expected: usize,
        actual: usize,
    },

    #[error("{cert} certificate: recovered header {found:02X}, expected 6A")]
    BadHeader { cert: CertificateType, found: u8 },

    #[error("{cert} certificate: format {found:02X}, expected {expected:02X}")]
    BadFormat {
        cert: CertificateType,
        expected: u8,
        found: u8,
    },

    #[error("{cert} certificate: unsupported hash algorithm indicator {indicator:02X}")]
    UnsupportedHashAlgorithm { cert: CertificateType, indicator: u8 },

    #[error("{cert} certificate: recovered block is too short")]
    Truncated { cert: CertificateType },

    #[error("{cert} certificate: {missing} bytes of public key remainder are missing")]
    MissingRemainder { cert: CertificateType, missing: usize },

    #[error("{cert} certificate: hash result does not match")]
    HashMismatch { cert: CertificateType },

    #[error("{cert} certificate: recovered trailer {found:02X}, expected BC")]
    BadTrailer { cert: CertificateType, found: u8 },

    #[error("{cert} certificate: {count} residual bytes after the trailer")]
    ResidualBytes { cert: CertificateType, count: usize },
}

/// Which signed application data object an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignedDataKind {
    Static,
    Dynamic,
}

impl fmt::Display for SignedDataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignedDataKind::Static => "signed static application data",
            SignedDataKind::Dynamic => "signed dynamic application data",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignedDataError {
    /// Checked before any RSA operation is attempted
    #[error("{kind} is {actual} bytes but the key modulus is {expected} bytes")]
    LengthMismatch {
        kind: SignedDataKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind}: recovered header {found:02X}, expected 6A")]
    BadHeader { kind: SignedDataKind, found: u8 },

    #[error("{kind}: format {found:02X}, expected {expected:02X}")]
    BadFormat {
        kind: SignedDataKind,
        expected: u8,
        found: u8,
    },

    #[error("{kind}: unsupported hash algorithm indicator {indicator:02X}")]
    UnsupportedHashAlgorithm { kind: SignedDataKind, indicator: u8 },

    #[error("{kind}: recovered block is too short")]
    Truncated { kind: SignedDataKind },

    #[error("{kind}: hash result does not match")]
    HashMismatch { kind: SignedDataKind },

    #[error("{kind}: recovered trailer {found:02X}, expected BC")]
    BadTrailer { kind: SignedDataKind, found: u8 },
}

/// An AFL record number was listed twice
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {record} of SFI {sfi} is referenced more than once")]
pub struct DuplicateRecordError {
    pub sfi: u8,
    pub record: u8,
}

/// The card returned data that violates the EMV data format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmartCardError {
    #[error("static data authentication tag list must contain only tag 82, found {0}")]
    InvalidSdaTagList(String),

    #[error("record {record} of SFI {sfi} is not a 70 template")]
    RecordNotTemplate { sfi: u8, record: u8 },

    #[error("record {record} of SFI {sfi} was referenced for authentication but never read")]
    RecordMissing { sfi: u8, record: u8 },

    #[error("malformed application file locator: {0}")]
    InvalidAfl(String),

    #[error(transparent)]
    DuplicateRecord(#[from] DuplicateRecordError),

    #[error("mandatory data element {} ({tag}) is missing", .tag.name())]
    MissingMandatoryData { tag: EmvTag },

    #[error("malformed TLV data in {0}")]
    MalformedTlv(String),
}

/// Failures of the byte-stream link to the card
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("card did not answer before the session timeout")]
    Timeout,

    #[error("response of {0} bytes has no status word")]
    ShortResponse(usize),

    #[error("card communication failed: {0}")]
    Link(String),

    #[error("command data of {0} bytes does not fit a short APDU")]
    CommandTooLong(usize),

    #[error("card kept answering 61xx after {0} GET RESPONSE commands")]
    ResponseChainTooLong(usize),

    #[cfg(feature = "pcsc")]
    #[error(transparent)]
    Pcsc(#[from] pcsc::Error),
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: TransactionState,
    },

    #[error("application not available (SW {0})")]
    ApplicationNotAvailable(StatusWord),

    #[error("conditions of use not satisfied, try the next application")]
    ConditionsNotSatisfied,

    #[error("{command} failed with status {status}")]
    UnexpectedStatus {
        command: &'static str,
        status: StatusWord,
    },

    #[error("READ RECORD {record} of SFI {sfi} failed with status {status}")]
    RecordReadFailed {
        sfi: u8,
        record: u8,
        status: StatusWord,
    },

    #[error("malformed {0} response")]
    MalformedResponse(&'static str),

    #[error(transparent)]
    SmartCard(#[from] SmartCardError),

    #[error(transparent)]
    Dol(#[from] crate::dol::DolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TransactionError {
    /// The card broke the command protocol: unexpected status on a mandatory
    /// command, a failed record read, or data that cannot be parsed
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TransactionError::UnexpectedStatus { .. }
                | TransactionError::RecordReadFailed { .. }
                | TransactionError::MalformedResponse(_)
                | TransactionError::SmartCard(_)
                | TransactionError::Dol(_)
        )
    }
}
