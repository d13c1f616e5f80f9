//! Cardholder Verification Method list (8E) processing
//!
//! Rules are tried first to last. A rule whose condition does not hold is
//! skipped without side effects; the first rule that verifies the
//! cardholder ends processing. A failed rule ends processing unless its
//! "apply succeeding rule" bit is set.

use thiserror::Error;

use crate::crypto::PinDigits;
use crate::terminal::TransactionType;
use crate::tvr::{TerminalVerificationResults, TransactionStatusInformation, TsiFlag, TvrFlag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CvmListError {
    #[error("CVM list of {0} bytes has no room for amounts X and Y")]
    TooShort(usize),

    #[error("CVM list has a trailing half rule ({0} rule bytes)")]
    OddRuleBytes(usize),
}

/// Method coded in the low six bits of the first rule byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvmMethod {
    FailProcessing,
    PlaintextPin,
    EncipheredPinOnline,
    PlaintextPinAndSignature,
    EncipheredPinOffline,
    EncipheredPinOfflineAndSignature,
    Signature,
    NoCvmRequired,
    Rfu(u8),
    PaymentSystemReserved(u8),
    IssuerReserved(u8),
}

impl CvmMethod {
    pub fn from_code(code: u8) -> Self {
        match code & 0x3F {
            0x00 => CvmMethod::FailProcessing,
            0x01 => CvmMethod::PlaintextPin,
            0x02 => CvmMethod::EncipheredPinOnline,
            0x03 => CvmMethod::PlaintextPinAndSignature,
            0x04 => CvmMethod::EncipheredPinOffline,
            0x05 => CvmMethod::EncipheredPinOfflineAndSignature,
            0x1E => CvmMethod::Signature,
            0x1F => CvmMethod::NoCvmRequired,
            c @ 0x20..=0x2F => CvmMethod::PaymentSystemReserved(c),
            c @ 0x30..=0x3E => CvmMethod::IssuerReserved(c),
            c => CvmMethod::Rfu(c),
        }
    }

    /// Whether the terminal knows how to perform this method at all
    pub fn is_recognised(self) -> bool {
        !matches!(
            self,
            CvmMethod::Rfu(_) | CvmMethod::PaymentSystemReserved(_) | CvmMethod::IssuerReserved(_)
        )
    }

    pub fn is_pin(self) -> bool {
        matches!(
            self,
            CvmMethod::PlaintextPin
                | CvmMethod::EncipheredPinOnline
                | CvmMethod::PlaintextPinAndSignature
                | CvmMethod::EncipheredPinOffline
                | CvmMethod::EncipheredPinOfflineAndSignature
        )
    }

    /// Whether Terminal Capabilities (9F33) byte 2 lists this method
    pub fn is_supported(self, terminal_capabilities: &[u8; 3]) -> bool {
        let cvm = terminal_capabilities[1];
        let plaintext = cvm & 0x80 != 0;
        let online = cvm & 0x40 != 0;
        let signature = cvm & 0x20 != 0;
        let enciphered = cvm & 0x10 != 0;
        let no_cvm = cvm & 0x08 != 0;
        match self {
            CvmMethod::FailProcessing => true,
            CvmMethod::PlaintextPin => plaintext,
            CvmMethod::EncipheredPinOnline => online,
            CvmMethod::PlaintextPinAndSignature => plaintext && signature,
            CvmMethod::EncipheredPinOffline => enciphered,
            CvmMethod::EncipheredPinOfflineAndSignature => enciphered && signature,
            CvmMethod::Signature => signature,
            CvmMethod::NoCvmRequired => no_cvm,
            _ => false,
        }
    }
}

/// Condition coded in the second rule byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvmCondition {
    Always,
    UnattendedCash,
    NotCashOrCashback,
    TerminalSupportsCvm,
    ManualCash,
    PurchaseWithCashback,
    UnderX,
    OverX,
    UnderY,
    OverY,
    Rfu(u8),
    Proprietary(u8),
}

impl CvmCondition {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => CvmCondition::Always,
            0x01 => CvmCondition::UnattendedCash,
            0x02 => CvmCondition::NotCashOrCashback,
            0x03 => CvmCondition::TerminalSupportsCvm,
            0x04 => CvmCondition::ManualCash,
            0x05 => CvmCondition::PurchaseWithCashback,
            0x06 => CvmCondition::UnderX,
            0x07 => CvmCondition::OverX,
            0x08 => CvmCondition::UnderY,
            0x09 => CvmCondition::OverY,
            c @ 0x0A..=0x7F => CvmCondition::Rfu(c),
            c => CvmCondition::Proprietary(c),
        }
    }
}

/// One CV rule: method byte and condition byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvRule {
    pub cvm_code: u8,
    pub condition_code: u8,
    /// Bit 7 of the method byte: apply the succeeding rule if this one fails
    pub continue_on_failure: bool,
    pub method: CvmMethod,
}

impl CvRule {
    pub fn new(cvm_code: u8, condition_code: u8) -> Self {
        Self {
            cvm_code,
            condition_code,
            continue_on_failure: cvm_code & 0x40 != 0,
            method: CvmMethod::from_code(cvm_code),
        }
    }

    pub fn condition(&self) -> CvmCondition {
        CvmCondition::from_code(self.condition_code)
    }
}

/// Parsed CVM list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvmList {
    pub amount_x: u32,
    pub amount_y: u32,
    pub rules: Vec<CvRule>,
}

impl CvmList {
    pub fn parse(data: &[u8]) -> Result<Self, CvmListError> {
        if data.len() < 8 {
            return Err(CvmListError::TooShort(data.len()));
        }
        let rule_bytes = &data[8..];
        if rule_bytes.len() % 2 != 0 {
            return Err(CvmListError::OddRuleBytes(rule_bytes.len()));
        }
        Ok(Self {
            amount_x: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            amount_y: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            rules: rule_bytes.chunks_exact(2).map(|r| CvRule::new(r[0], r[1])).collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Outcome of one PIN attempt reported by the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinResult {
    /// Card accepted the PIN, or an online PIN was captured
    Verified,
    /// Card rejected the PIN and no further attempt is made
    Rejected,
    /// No PIN was entered (cancelled or bypassed)
    NotEntered,
    /// PIN try counter is zero or the method is blocked
    TryLimitExceeded,
    /// PIN pad not present or not working
    PadUnavailable,
}

/// Performs PIN-based methods on behalf of the engine
///
/// Implemented by the transaction, which owns the card link and the PIN pad.
pub trait CardholderVerifier {
    /// Obtain a PIN and VERIFY it against the card
    fn verify_offline_pin(&mut self, enciphered: bool) -> PinResult;

    /// Obtain a PIN to be sent online with the authorisation request
    fn capture_online_pin(&mut self) -> PinResult;
}

/// Source of cardholder PINs
pub trait PinEntry {
    /// Prompt the cardholder; `None` when entry was cancelled or bypassed
    fn request_pin(&mut self) -> Option<PinDigits>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Transaction facts the rule conditions refer to
#[derive(Debug, Clone)]
pub struct CvmContext {
    pub transaction_type: TransactionType,
    /// Amount, authorised in minor units of the transaction currency
    pub amount: u64,
    pub transaction_currency: [u8; 2],
    /// Application Currency Code (9F42), if the card has one
    pub application_currency: Option<[u8; 2]>,
    pub terminal_capabilities: [u8; 3],
    pub unattended: bool,
    pub online_capable: bool,
    /// Proprietary condition codes (80-FF) this terminal treats as satisfied
    pub recognised_conditions: Vec<u8>,
}

impl CvmContext {
    fn is_cash(&self) -> bool {
        self.transaction_type == TransactionType::Cash
    }

    fn amount_condition(&self, threshold: u32, under: bool) -> bool {
        if self.application_currency != Some(self.transaction_currency) {
            return false;
        }
        let threshold = u64::from(threshold);
        if under {
            self.amount < threshold
        } else {
            self.amount > threshold
        }
    }

    fn is_satisfied(&self, rule: &CvRule, list: &CvmList) -> bool {
        match rule.condition() {
            CvmCondition::Always => true,
            CvmCondition::UnattendedCash => self.is_cash() && self.unattended,
            CvmCondition::NotCashOrCashback => {
                !self.is_cash() && self.transaction_type != TransactionType::Cashback
            }
            CvmCondition::TerminalSupportsCvm => rule.method.is_supported(&self.terminal_capabilities),
            CvmCondition::ManualCash => self.is_cash() && !self.unattended,
            CvmCondition::PurchaseWithCashback => self.transaction_type == TransactionType::Cashback,
            CvmCondition::UnderX => self.amount_condition(list.amount_x, true),
            CvmCondition::OverX => self.amount_condition(list.amount_x, false),
            CvmCondition::UnderY => self.amount_condition(list.amount_y, true),
            CvmCondition::OverY => self.amount_condition(list.amount_y, false),
            CvmCondition::Rfu(_) => false,
            CvmCondition::Proprietary(code) => self.recognised_conditions.contains(&code),
        }
    }
}

/// Result of CVM processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvmOutcome {
    Success,
    NotSuccessful,
    NoCvmPerformed,
}

/// Outcome plus the CVM Results (9F34) data element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvmReport {
    pub outcome: CvmOutcome,
    pub cvm_results: [u8; 3],
}

const RESULT_UNKNOWN: u8 = 0x00;
const RESULT_FAILED: u8 = 0x01;
const RESULT_SUCCESSFUL: u8 = 0x02;

enum Attempt {
    Succeeded(u8),
    Failed,
}

/// Evaluates a CVM list for one transaction
#[derive(Debug)]
pub struct CvmEngine<'a> {
    context: &'a CvmContext,
}

impl<'a> CvmEngine<'a> {
    pub fn new(context: &'a CvmContext) -> Self {
        Self { context }
    }

    /// Run cardholder verification
    ///
    /// # Arguments
    /// * `list` - The card's CVM list, `None` if the card has none
    /// * `verifier` - Performs PIN methods against the card and PIN pad
    /// * `tvr`, `tsi` - Ledgers of the current transaction
    pub fn evaluate(
        &self,
        list: Option<&CvmList>,
        verifier: &mut dyn CardholderVerifier,
        tvr: &mut TerminalVerificationResults,
        tsi: &mut TransactionStatusInformation,
    ) -> CvmReport {
        let list = match list {
            Some(list) if !list.is_empty() => list,
            _ => {
                tracing::info!("No CVM list, cardholder verification not performed");
                tvr.set(TvrFlag::IccDataMissing);
                return CvmReport {
                    outcome: CvmOutcome::NoCvmPerformed,
                    cvm_results: [0x3F, 0x00, 0x00],
                };
            }
        };

        tsi.set(TsiFlag::CardholderVerificationPerformed);

        let mut last_attempted: Option<&CvRule> = None;
        for rule in &list.rules {
            if !self.context.is_satisfied(rule, list) {
                tracing::trace!(cvm = rule.cvm_code, condition = rule.condition_code, "CV rule condition not satisfied");
                continue;
            }
            last_attempted = Some(rule);
            tracing::debug!(method = ?rule.method, condition = ?rule.condition(), "Applying CV rule");

            if rule.method == CvmMethod::FailProcessing {
                tvr.set(TvrFlag::CardholderVerificationNotSuccessful);
                return Self::report(CvmOutcome::NotSuccessful, rule, RESULT_FAILED);
            }

            match self.attempt(rule, verifier, tvr) {
                Attempt::Succeeded(result) => return Self::report(CvmOutcome::Success, rule, result),
                Attempt::Failed if !rule.continue_on_failure => {
                    tvr.set(TvrFlag::CardholderVerificationNotSuccessful);
                    return Self::report(CvmOutcome::NotSuccessful, rule, RESULT_FAILED);
                }
                Attempt::Failed => {}
            }
        }

        tvr.set(TvrFlag::CardholderVerificationNotSuccessful);
        match last_attempted {
            Some(rule) => Self::report(CvmOutcome::NotSuccessful, rule, RESULT_FAILED),
            None => CvmReport {
                outcome: CvmOutcome::NotSuccessful,
                cvm_results: [0x3F, 0x00, RESULT_FAILED],
            },
        }
    }

    fn report(outcome: CvmOutcome, rule: &CvRule, result: u8) -> CvmReport {
        CvmReport {
            outcome,
            cvm_results: [rule.cvm_code, rule.condition_code, result],
        }
    }

    fn attempt(
        &self,
        rule: &CvRule,
        verifier: &mut dyn CardholderVerifier,
        tvr: &mut TerminalVerificationResults,
    ) -> Attempt {
        let method = rule.method;
        if !method.is_recognised() {
            tvr.set(TvrFlag::UnrecognisedCvm);
            return Attempt::Failed;
        }
        if !method.is_supported(&self.context.terminal_capabilities) {
            if method.is_pin() {
                tvr.set(TvrFlag::PinPadNotPresent);
            }
            return Attempt::Failed;
        }

        match method {
            CvmMethod::NoCvmRequired => Attempt::Succeeded(RESULT_SUCCESSFUL),
            CvmMethod::Signature => Attempt::Succeeded(RESULT_UNKNOWN),
            CvmMethod::EncipheredPinOnline => {
                if !self.context.online_capable {
                    return Attempt::Failed;
                }
                match verifier.capture_online_pin() {
                    PinResult::Verified => {
                        tvr.set(TvrFlag::OnlinePinEntered);
                        Attempt::Succeeded(RESULT_UNKNOWN)
                    }
                    other => {
                        Self::record_pin_failure(other, tvr);
                        Attempt::Failed
                    }
                }
            }
            CvmMethod::PlaintextPin
            | CvmMethod::EncipheredPinOffline
            | CvmMethod::PlaintextPinAndSignature
            | CvmMethod::EncipheredPinOfflineAndSignature => {
                let enciphered = matches!(
                    method,
                    CvmMethod::EncipheredPinOffline | CvmMethod::EncipheredPinOfflineAndSignature
                );
                match verifier.verify_offline_pin(enciphered) {
                    PinResult::Verified if method == CvmMethod::PlaintextPin || method == CvmMethod::EncipheredPinOffline => {
                        Attempt::Succeeded(RESULT_SUCCESSFUL)
                    }
                    // Signature still has to be checked by the merchant
                    PinResult::Verified => Attempt::Succeeded(RESULT_UNKNOWN),
                    other => {
                        Self::record_pin_failure(other, tvr);
                        Attempt::Failed
                    }
                }
            }
            _ => Attempt::Failed,
        }
    }

    fn record_pin_failure(result: PinResult, tvr: &mut TerminalVerificationResults) {
        match result {
            PinResult::NotEntered => tvr.set(TvrFlag::PinNotEntered),
            PinResult::TryLimitExceeded => tvr.set(TvrFlag::PinTryLimitExceeded),
            PinResult::PadUnavailable => tvr.set(TvrFlag::PinPadNotPresent),
            PinResult::Rejected | PinResult::Verified => {}
        }
    }
}
