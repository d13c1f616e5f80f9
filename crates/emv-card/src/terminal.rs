//! Terminal configuration and per-transaction parameters

use std::path::Path;

use chrono::{Datelike, NaiveDate};
use emv_common::{bcd, tags};
use serde::{Deserialize, Serialize};

use crate::apdu::CryptogramType;
use crate::dol::DolBuilder;
use crate::tvr::TerminalVerificationResults;

/// Kind of transaction, as far as CVM conditions and usage control care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Goods,
    Services,
    Cash,
    Cashback,
}

impl TransactionType {
    /// Transaction Type (9C)
    pub fn code(self) -> u8 {
        match self {
            TransactionType::Goods | TransactionType::Services => 0x00,
            TransactionType::Cash => 0x01,
            TransactionType::Cashback => 0x09,
        }
    }
}

/// Random transaction selection parameters (amounts in minor units)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomSelection {
    pub threshold: u64,
    pub target_percentage: u8,
    pub max_target_percentage: u8,
}

/// Static terminal parameters, read from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalConfig {
    /// Terminal Type (9F35)
    pub terminal_type: u8,
    /// Terminal Capabilities (9F33)
    #[serde(with = "hex::serde")]
    pub terminal_capabilities: [u8; 3],
    /// Additional Terminal Capabilities (9F40)
    #[serde(with = "hex::serde")]
    pub additional_terminal_capabilities: [u8; 5],
    /// Terminal Country Code (9F1A)
    #[serde(with = "hex::serde")]
    pub terminal_country_code: [u8; 2],
    /// Transaction Currency Code (5F2A)
    #[serde(with = "hex::serde")]
    pub transaction_currency_code: [u8; 2],
    pub transaction_currency_exponent: u8,
    /// Application Version Number supported by the terminal (9F09)
    #[serde(with = "hex::serde")]
    pub application_version: [u8; 2],
    /// Terminal Floor Limit in minor units
    pub floor_limit: u64,
    pub random_selection: RandomSelection,
    /// Used when the card supplies no DDOL
    #[serde(with = "hex::serde")]
    pub default_ddol: Vec<u8>,
    /// Run terminal risk management even when the AIP does not ask for it
    pub force_risk_management: bool,
    /// Proprietary CVM condition codes (80-FF) this terminal recognises
    pub recognised_cvm_conditions: Vec<u8>,
    /// PANs on the terminal exception file
    pub exception_file: Vec<String>,
    #[serde(with = "hex::serde")]
    pub tac_default: [u8; 5],
    #[serde(with = "hex::serde")]
    pub tac_denial: [u8; 5],
    #[serde(with = "hex::serde")]
    pub tac_online: [u8; 5],
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            terminal_type: 0x22,
            terminal_capabilities: [0xE0, 0xF8, 0xC8],
            additional_terminal_capabilities: [0x60, 0x00, 0xF0, 0xA0, 0x01],
            terminal_country_code: [0x08, 0x26],
            transaction_currency_code: [0x08, 0x26],
            transaction_currency_exponent: 2,
            application_version: [0x00, 0x8C],
            floor_limit: 0,
            random_selection: RandomSelection::default(),
            default_ddol: vec![0x9F, 0x37, 0x04],
            force_risk_management: false,
            recognised_cvm_conditions: Vec::new(),
            exception_file: Vec::new(),
            tac_default: [0; 5],
            tac_denial: [0; 5],
            tac_online: [0; 5],
        }
    }
}

impl TerminalConfig {
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn load_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source).map_err(std::io::Error::from)
    }

    /// Terminal types x1, x2, x4 and x5 can go online
    pub fn is_online_capable(&self) -> bool {
        matches!(self.terminal_type & 0x0F, 1 | 2 | 4 | 5)
    }

    /// Terminal types x4, x5 and x6 are unattended
    pub fn is_unattended(&self) -> bool {
        matches!(self.terminal_type & 0x0F, 4..=6)
    }

    /// Unattended terminals operated by a financial institution with cash capability
    pub fn is_atm(&self) -> bool {
        matches!(self.terminal_type, 0x14..=0x16) && self.additional_terminal_capabilities[0] & 0x80 != 0
    }

    pub fn is_on_exception_file(&self, pan: &str) -> bool {
        self.exception_file.iter().any(|p| p == pan)
    }
}

/// What the merchant asks for in one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParams {
    /// Amount, authorised in minor units
    pub amount: u64,
    /// Amount, other (cashback) in minor units
    pub amount_other: u64,
    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    /// Merchant forced the transaction online
    pub force_online: bool,
}

impl TransactionParams {
    pub fn new(amount: u64, date: NaiveDate) -> Self {
        Self {
            amount,
            amount_other: 0,
            transaction_type: TransactionType::Goods,
            date,
            force_online: false,
        }
    }

    /// Transaction Date (9A), YYMMDD
    pub fn date_bytes(&self) -> [u8; 3] {
        let yy = (self.date.year().rem_euclid(100)) as u64;
        let packed = bcd::u64_to_n(yy * 10_000 + u64::from(self.date.month()) * 100 + u64::from(self.date.day()), 3);
        [packed[0], packed[1], packed[2]]
    }
}

/// Terminal data dictionary used to answer PDOL, DDOL and CDOL requests
pub fn terminal_data(
    config: &TerminalConfig,
    params: &TransactionParams,
    unpredictable_number: [u8; 4],
    tvr: &TerminalVerificationResults,
) -> DolBuilder {
    let mut data = DolBuilder::new();
    data.set(tags::AMOUNT_AUTHORISED.bytes(), bcd::u64_to_n(params.amount, 6))
        .set(tags::AMOUNT_OTHER.bytes(), bcd::u64_to_n(params.amount_other, 6))
        .set(tags::TRANSACTION_DATE.bytes(), params.date_bytes().to_vec())
        .set(tags::TRANSACTION_TYPE.bytes(), vec![params.transaction_type.code()])
        .set(tags::TRANSACTION_CURRENCY_CODE.bytes(), config.transaction_currency_code.to_vec())
        .set(tags::TRANSACTION_CURRENCY_EXPONENT.bytes(), vec![config.transaction_currency_exponent])
        .set(tags::TERMINAL_COUNTRY_CODE.bytes(), config.terminal_country_code.to_vec())
        .set(tags::TERMINAL_TYPE.bytes(), vec![config.terminal_type])
        .set(tags::TERMINAL_CAPABILITIES.bytes(), config.terminal_capabilities.to_vec())
        .set(
            tags::ADDITIONAL_TERMINAL_CAPABILITIES.bytes(),
            config.additional_terminal_capabilities.to_vec(),
        )
        .set(tags::TERMINAL_APPLICATION_VERSION_NUMBER.bytes(), config.application_version.to_vec())
        .set(tags::UNPREDICTABLE_NUMBER.bytes(), unpredictable_number.to_vec())
        .set(tags::TERMINAL_VERIFICATION_RESULTS.bytes(), tvr.bytes().to_vec());
    data
}

/// Issuer and terminal action codes alongside the TVR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionCodes {
    pub iac_default: Option<[u8; 5]>,
    pub iac_denial: Option<[u8; 5]>,
    pub iac_online: Option<[u8; 5]>,
    pub tac_default: [u8; 5],
    pub tac_denial: [u8; 5],
    pub tac_online: [u8; 5],
}

/// Terminal action analysis
///
/// Decides which cryptogram to request in the first GENERATE AC from the
/// TVR and the action codes. The core ships no policy; acquirers plug in
/// their own.
pub trait ActionAnalysis {
    fn decide(
        &self,
        tvr: &TerminalVerificationResults,
        codes: &ActionCodes,
        online_capable: bool,
    ) -> CryptogramType;
}
