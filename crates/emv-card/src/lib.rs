//! EMV Card - terminal-side EMV processing
//!
//! Validates the issuer and ICC certificate chain against a CA trust store,
//! authenticates static and dynamic application data, runs cardholder
//! verification and terminal risk management, and drives these steps
//! through the EMV transaction sequence while keeping the TVR and TSI.
//!
//! The card itself is reached through [`CardTransport`]; a PC/SC
//! implementation is available with the `pcsc` feature.

pub mod afl;
pub mod apdu;
pub mod application;
pub mod crypto;
pub mod cvm;
pub mod dol;
pub mod error;
pub mod restrictions;
pub mod risk;
pub mod terminal;
pub mod transaction;
pub mod transport;
pub mod tvr;

#[cfg(feature = "pcsc")]
pub mod reader;

pub use apdu::{ApduCommand, ApduResponse, CryptogramType, StatusKind, StatusWord};
pub use application::EmvApplication;
pub use crypto::{AuthenticationMethod, PinDigits, Validity};
pub use cvm::{CvmEngine, CvmList, CvmOutcome, PinEntry};
pub use error::{CertError, SignedDataError, SmartCardError, TransactionError, TransportError};
pub use risk::{LogEntry, RiskManager, TransactionLog};
pub use terminal::{ActionAnalysis, TerminalConfig, TransactionParams, TransactionType};
pub use transaction::{CryptogramResponse, TerminalContext, Transaction, TransactionRecord, TransactionState};
pub use transport::CardTransport;
pub use tvr::{TerminalVerificationResults, TransactionStatusInformation, TsiFlag, TvrFlag};

#[cfg(feature = "pcsc")]
pub use reader::{CardReader, PcscTransport};
