//! Candidate selection and the transaction run, independent of the reader

use std::sync::Arc;

use emv_ca_keys::TrustStore;
use emv_card::terminal::ActionCodes;
use emv_card::{
    ActionAnalysis, CardTransport, CryptogramType, PinEntry, TerminalConfig, TerminalContext,
    TerminalVerificationResults, Transaction, TransactionError, TransactionLog, TransactionParams, TransactionRecord,
};

use super::display_tags;
use crate::formatters::{self, FormatMode};

/// Action codes compared bit by bit against the TVR
///
/// Denial codes decline offline. An online-capable terminal goes online on an
/// online code match and an offline-only one declines on a default code match.
/// Absent issuer codes behave as all zeros for denial and all ones otherwise.
pub struct ActionCodePolicy;

impl ActionAnalysis for ActionCodePolicy {
    fn decide(&self, tvr: &TerminalVerificationResults, codes: &ActionCodes, online_capable: bool) -> CryptogramType {
        let hit = |code: [u8; 5]| tvr.bytes().iter().zip(code).any(|(t, c)| t & c != 0);

        if hit(codes.iac_denial.unwrap_or([0; 5])) || hit(codes.tac_denial) {
            return CryptogramType::Aac;
        }
        if online_capable {
            if hit(codes.iac_online.unwrap_or([0xFF; 5])) || hit(codes.tac_online) {
                return CryptogramType::Arqc;
            }
        } else if hit(codes.iac_default.unwrap_or([0xFF; 5])) || hit(codes.tac_default) {
            return CryptogramType::Aac;
        }
        CryptogramType::Tc
    }
}

/// What the terminal brings to every transaction
pub struct Terminal {
    pub config: TerminalConfig,
    pub trust_store: Arc<TrustStore>,
    pub log: TransactionLog,
}

impl Terminal {
    /// Try each candidate application in turn and run the first one the card accepts
    ///
    /// Applications the card does not hold, or refuses with 6985 on SELECT
    /// or GET PROCESSING OPTIONS, are skipped.
    pub fn transact<T: CardTransport, P: PinEntry>(
        &self,
        transport: &mut T,
        pin_entry: &mut P,
        params: &TransactionParams,
        candidates: &[(String, Vec<u8>)],
        mode: FormatMode,
    ) -> anyhow::Result<TransactionRecord> {
        for (name, aid) in candidates {
            let context = TerminalContext {
                config: &self.config,
                trust_store: Arc::clone(&self.trust_store),
                log: &self.log,
                pin_entry: &mut *pin_entry,
            };
            let transaction = match Transaction::select(&mut *transport, context, params.clone(), aid) {
                Ok(transaction) => transaction,
                Err(TransactionError::ApplicationNotAvailable(sw)) => {
                    tracing::debug!(application = %name, %sw, "Application not on card");
                    continue;
                }
                Err(TransactionError::ConditionsNotSatisfied) => {
                    tracing::info!(application = %name, "Application blocked, trying the next one");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            println!("Selected: {} ({})", name, hex::encode_upper(aid));

            match run_selected(transaction, mode) {
                Ok(record) => {
                    tracing::info!(cryptogram = ?record.cryptogram, amount = record.amount, "Transaction complete");
                    return Ok(record);
                }
                Err(TransactionError::ConditionsNotSatisfied) => {
                    tracing::info!(application = %name, "Processing options refused, trying the next application");
                }
                Err(e) => return Err(e.into()),
            }
        }

        anyhow::bail!("no supported application on the card")
    }
}

/// Read, prepare, analyse and request the first cryptogram
fn run_selected<T: CardTransport>(
    mut transaction: Transaction<'_, T>,
    mode: FormatMode,
) -> Result<TransactionRecord, TransactionError> {
    transaction.initiate_processing()?;
    transaction.prepare()?;

    let application = transaction.application();
    if let Some(label) = application.label() {
        println!("Application: {}", label);
    }
    if let Some(pan) = application.pan() {
        println!("PAN: {}", formatters::mask_pan(pan));
    }
    if let Some(expiry) = application.expiration_date() {
        println!("Expires: {}", formatters::format_value(&[0x5F, 0x24], &expiry, mode));
    }
    if mode == FormatMode::Raw {
        for ((sfi, number), raw) in application.records().iter() {
            println!("Record SFI {} #{}:", sfi, number);
            display_tags(emv_card::application::record_body(raw), mode);
        }
    }

    println!("Offline data authentication: {}", transaction.authentication_method());
    if let Some(results) = transaction.cvm_results() {
        println!("CVM Results: {}", formatters::format_cvm_results(results, mode));
    }
    formatters::print_tvr(transaction.tvr(), mode);
    formatters::print_tsi(transaction.tsi(), mode);

    let requested = transaction.analyse_actions(&ActionCodePolicy)?;
    println!("Requesting {:?}", requested);
    let response = transaction.generate_ac(requested)?;
    formatters::print_cryptogram(response, mode);

    transaction.complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use chrono::NaiveDate;
    use emv_card::{ApduCommand, ApduResponse, PinDigits, TransportError, TvrFlag};

    fn codes() -> ActionCodes {
        ActionCodes {
            iac_default: None,
            iac_denial: None,
            iac_online: None,
            tac_default: [0; 5],
            tac_denial: [0; 5],
            tac_online: [0; 5],
        }
    }

    #[test]
    fn test_clean_tvr_approves_offline() {
        let tvr = TerminalVerificationResults::default();
        assert_eq!(ActionCodePolicy.decide(&tvr, &codes(), true), CryptogramType::Tc);
        assert_eq!(ActionCodePolicy.decide(&tvr, &codes(), false), CryptogramType::Tc);
    }

    #[test]
    fn test_denial_code_declines() {
        let mut tvr = TerminalVerificationResults::default();
        tvr.set(TvrFlag::PinTryLimitExceeded);
        let mut codes = codes();
        codes.tac_denial = tvr.bytes();
        assert_eq!(ActionCodePolicy.decide(&tvr, &codes, true), CryptogramType::Aac);
    }

    #[test]
    fn test_missing_issuer_codes_send_any_exception_online() {
        let mut tvr = TerminalVerificationResults::default();
        tvr.set(TvrFlag::FloorLimitExceeded);
        assert_eq!(ActionCodePolicy.decide(&tvr, &codes(), true), CryptogramType::Arqc);
        assert_eq!(ActionCodePolicy.decide(&tvr, &codes(), false), CryptogramType::Aac);
    }

    #[test]
    fn test_issuer_online_code_narrows_online_decision() {
        let mut tvr = TerminalVerificationResults::default();
        tvr.set(TvrFlag::FloorLimitExceeded);
        let mut codes = codes();
        codes.iac_online = Some([0; 5]);
        assert_eq!(ActionCodePolicy.decide(&tvr, &codes, true), CryptogramType::Tc);
    }

    /// Card that plays back raw responses and remembers the instructions it saw
    struct ScriptedCard {
        answers: VecDeque<Vec<u8>>,
        instructions: Vec<u8>,
    }

    impl CardTransport for ScriptedCard {
        fn transmit(&mut self, command: &ApduCommand) -> Result<ApduResponse, TransportError> {
            self.instructions.push(command.ins());
            let answer = self.answers.pop_front().ok_or(TransportError::Timeout)?;
            ApduResponse::from_raw(&answer)
        }
    }

    struct NoPin;

    impl PinEntry for NoPin {
        fn request_pin(&mut self) -> Option<PinDigits> {
            None
        }
    }

    fn terminal() -> Terminal {
        Terminal {
            config: TerminalConfig::default(),
            trust_store: Arc::new(TrustStore::new()),
            log: TransactionLog::new(),
        }
    }

    fn candidates() -> Vec<(String, Vec<u8>)> {
        vec![
            ("First".to_string(), vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10]),
            ("Second".to_string(), vec![0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10]),
        ]
    }

    #[test]
    fn test_refused_processing_options_moves_to_next_candidate() {
        let fci = vec![0x6F, 0x09, 0x84, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x90, 0x00];
        let mut card = ScriptedCard {
            answers: VecDeque::from(vec![fci, vec![0x69, 0x85], vec![0x6A, 0x82]]),
            instructions: Vec::new(),
        };
        let params = TransactionParams::new(100, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());

        let err = terminal()
            .transact(&mut card, &mut NoPin, &params, &candidates(), FormatMode::Raw)
            .unwrap_err();

        // SELECT, GET PROCESSING OPTIONS refused, then SELECT of the second AID
        assert_eq!(card.instructions, vec![0xA4, 0xA8, 0xA4]);
        assert!(err.to_string().contains("no supported application"));
    }

    #[test]
    fn test_other_failures_stop_the_run() {
        let fci = vec![0x6F, 0x09, 0x84, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x90, 0x00];
        let mut card = ScriptedCard {
            answers: VecDeque::from(vec![fci, vec![0x6F, 0x00]]),
            instructions: Vec::new(),
        };
        let params = TransactionParams::new(100, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());

        let err = terminal()
            .transact(&mut card, &mut NoPin, &params, &candidates(), FormatMode::Raw)
            .unwrap_err();

        assert_eq!(card.instructions, vec![0xA4, 0xA8]);
        assert!(matches!(
            err.downcast_ref::<TransactionError>(),
            Some(TransactionError::UnexpectedStatus { .. })
        ));
    }
}
