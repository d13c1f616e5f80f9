//! Transaction flow for one selected application
//!
//! ```text
//! select -> initiate_processing -> prepare -> generate_ac -> complete
//! ```
//!
//! Each phase checks the state the previous one left behind. A fatal
//! failure moves the transaction to [`TransactionState::Aborted`], after
//! which every phase is refused. `6985` from SELECT or GET PROCESSING
//! OPTIONS is reported as [`TransactionError::ConditionsNotSatisfied`] so the
//! caller can move on to its next candidate application.

use std::sync::Arc;

use chrono::NaiveDate;
use emv_ca_keys::TrustStore;
use emv_common::{find_tag, tags, EmvTag};
use rand::RngCore;

use crate::apdu::{commands, ApduCommand, ApduResponse, CryptogramType, StatusKind};
use crate::application::EmvApplication;
use crate::crypto::{
    encipher_pin_block, plaintext_pin_block, AuthenticationMethod, RecoveredPublicKey, SignedDynamicApplicationData,
};
use crate::cvm::{CardholderVerifier, CvmContext, CvmEngine, PinEntry, PinResult};
use crate::dol::DolBuilder;
use crate::error::{SmartCardError, TransactionError, TransportError};
use crate::restrictions::check_processing_restrictions;
use crate::risk::{LogEntry, RiskFacts, RiskManager, TransactionLog};
use crate::terminal::{terminal_data, ActionAnalysis, TerminalConfig, TransactionParams};
use crate::transport::CardTransport;
use crate::tvr::{TerminalVerificationResults, TransactionStatusInformation, TsiFlag, TvrFlag};

/// CVM Results when the card does not support cardholder verification
const NO_CVM_PERFORMED: [u8; 3] = [0x3F, 0x00, 0x00];

/// Phase reached by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Selected,
    ProcessingInitiated,
    TransactionPrepared,
    CryptogramGenerated,
    PostProcessed,
    Aborted,
}

/// Terminal-side collaborators of one transaction
pub struct TerminalContext<'a> {
    pub config: &'a TerminalConfig,
    pub trust_store: Arc<TrustStore>,
    /// Approved transactions, for the floor limit check
    pub log: &'a TransactionLog,
    pub pin_entry: &'a mut dyn PinEntry,
}

/// Fields returned by GENERATE AC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptogramResponse {
    /// Cryptogram Information Data (9F27)
    pub cid: u8,
    /// Application Transaction Counter (9F36)
    pub atc: u16,
    /// Application Cryptogram (9F26)
    pub cryptogram: Vec<u8>,
    /// Issuer Application Data (9F10)
    pub issuer_application_data: Option<Vec<u8>>,
    /// Signed Dynamic Application Data (9F4B), present for CDA
    pub signed_dynamic_data: Option<Vec<u8>>,
}

impl CryptogramResponse {
    /// Cryptogram the card actually returned
    pub fn cryptogram_type(&self) -> Option<CryptogramType> {
        match self.cid & 0xC0 {
            0x00 => Some(CryptogramType::Aac),
            0x40 => Some(CryptogramType::Tc),
            0x80 => Some(CryptogramType::Arqc),
            _ => None,
        }
    }

    /// Parse response format 1 (`80`) or format 2 (`77`)
    pub fn parse(data: &[u8]) -> Result<Self, TransactionError> {
        let malformed = || TransactionError::MalformedResponse("GENERATE AC");

        if let Some(body) = find_tag(data, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1.bytes()) {
            if body.len() < 11 {
                return Err(malformed());
            }
            return Ok(Self {
                cid: body[0],
                atc: u16::from_be_bytes([body[1], body[2]]),
                cryptogram: body[3..11].to_vec(),
                issuer_application_data: (body.len() > 11).then(|| body[11..].to_vec()),
                signed_dynamic_data: None,
            });
        }

        let body = find_tag(data, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2.bytes()).ok_or_else(malformed)?;
        let cid = find_tag(body, tags::CRYPTOGRAM_INFORMATION_DATA.bytes())
            .and_then(|v| v.first().copied())
            .ok_or_else(malformed)?;
        let atc = find_tag(body, tags::APPLICATION_TRANSACTION_COUNTER.bytes())
            .and_then(|v| <[u8; 2]>::try_from(v).ok())
            .map(u16::from_be_bytes)
            .ok_or_else(malformed)?;
        let cryptogram = find_tag(body, tags::APPLICATION_CRYPTOGRAM.bytes()).ok_or_else(malformed)?;

        Ok(Self {
            cid,
            atc,
            cryptogram: cryptogram.to_vec(),
            issuer_application_data: find_tag(body, tags::ISSUER_APPLICATION_DATA.bytes()).map(<[u8]>::to_vec),
            signed_dynamic_data: find_tag(body, tags::SIGNED_DYNAMIC_APPLICATION_DATA.bytes()).map(<[u8]>::to_vec),
        })
    }
}

/// Summary handed back once the transaction is complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub pan: String,
    pub amount: u64,
    pub tvr: TerminalVerificationResults,
    pub tsi: TransactionStatusInformation,
    pub cryptogram: Option<CryptogramType>,
}

impl TransactionRecord {
    /// Entry for the terminal's transaction log
    pub fn log_entry(&self) -> LogEntry {
        LogEntry {
            pan: self.pan.clone(),
            amount: self.amount,
        }
    }
}

/// One transaction against one selected application
pub struct Transaction<'a, T: CardTransport> {
    transport: T,
    config: &'a TerminalConfig,
    trust_store: Arc<TrustStore>,
    log: &'a TransactionLog,
    pin_entry: &'a mut dyn PinEntry,
    params: TransactionParams,
    application: EmvApplication,
    state: TransactionState,
    tvr: TerminalVerificationResults,
    tsi: TransactionStatusInformation,
    unpredictable_number: [u8; 4],
    authentication: AuthenticationMethod,
    signed_dynamic_data: Option<SignedDynamicApplicationData>,
    cvm_results: Option<[u8; 3]>,
    cryptogram: Option<CryptogramResponse>,
}

impl<'a, T: CardTransport> Transaction<'a, T> {
    /// SELECT `aid` and start a transaction with fresh TVR and TSI
    pub fn select(
        mut transport: T,
        terminal: TerminalContext<'a>,
        params: TransactionParams,
        aid: &[u8],
    ) -> Result<Self, TransactionError> {
        let response = commands::select(aid).send(&mut transport)?;
        match response.status().kind() {
            StatusKind::Success => {}
            StatusKind::ConditionsNotSatisfied => return Err(TransactionError::ConditionsNotSatisfied),
            _ => return Err(TransactionError::ApplicationNotAvailable(response.status())),
        }

        let application = EmvApplication::from_fci(aid, &response.data)?;
        tracing::info!(
            aid = %hex::encode_upper(application.aid()),
            label = application.label().unwrap_or(""),
            "Application selected"
        );

        Ok(Self {
            transport,
            config: terminal.config,
            trust_store: terminal.trust_store,
            log: terminal.log,
            pin_entry: terminal.pin_entry,
            params,
            application,
            state: TransactionState::Selected,
            tvr: TerminalVerificationResults::new(),
            tsi: TransactionStatusInformation::new(),
            unpredictable_number: [0; 4],
            authentication: AuthenticationMethod::None,
            signed_dynamic_data: None,
            cvm_results: None,
            cryptogram: None,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn application(&self) -> &EmvApplication {
        &self.application
    }

    pub fn params(&self) -> &TransactionParams {
        &self.params
    }

    pub fn tvr(&self) -> &TerminalVerificationResults {
        &self.tvr
    }

    pub fn tsi(&self) -> &TransactionStatusInformation {
        &self.tsi
    }

    /// Offline data authentication method chosen during preparation
    pub fn authentication_method(&self) -> AuthenticationMethod {
        self.authentication
    }

    /// CVM Results (9F34), once cardholder verification ran
    pub fn cvm_results(&self) -> Option<[u8; 3]> {
        self.cvm_results
    }

    pub fn signed_dynamic_data(&self) -> Option<&SignedDynamicApplicationData> {
        self.signed_dynamic_data.as_ref()
    }

    pub fn cryptogram(&self) -> Option<&CryptogramResponse> {
        self.cryptogram.as_ref()
    }

    fn expect_state(&self, operation: &'static str, expected: TransactionState) -> Result<(), TransactionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn abort(&mut self, error: TransactionError) -> TransactionError {
        tracing::warn!(%error, state = ?self.state, "Transaction aborted");
        self.state = TransactionState::Aborted;
        error
    }

    /// Terminal data dictionary for PDOL, DDOL and CDOL requests
    fn dictionary(&self) -> DolBuilder {
        let mut data = terminal_data(self.config, &self.params, self.unpredictable_number, &self.tvr);
        data.set(tags::TRANSACTION_STATUS_INFORMATION.bytes(), self.tsi.bytes().to_vec());
        if let Some(results) = self.cvm_results {
            data.set(tags::CVM_RESULTS.bytes(), results.to_vec());
        }
        if let Some(dynamic) = self.signed_dynamic_data.as_ref().and_then(|s| s.icc_dynamic_data()) {
            data.set(tags::ICC_DYNAMIC_NUMBER.bytes(), dynamic.icc_dynamic_number.clone());
        }
        data
    }

    /// GET PROCESSING OPTIONS, then read every record the AFL names
    pub fn initiate_processing(&mut self) -> Result<(), TransactionError> {
        self.expect_state("initiate processing", TransactionState::Selected)?;
        match self.read_application_data() {
            Ok(()) => {
                self.state = TransactionState::ProcessingInitiated;
                Ok(())
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    fn read_application_data(&mut self) -> Result<(), TransactionError> {
        rand::thread_rng().fill_bytes(&mut self.unpredictable_number);

        let pdol_data = match self.application.pdol() {
            Some(pdol) => self.dictionary().build_from(pdol)?,
            None => Vec::new(),
        };
        let response = commands::get_processing_options(command_template(&pdol_data)).send(&mut self.transport)?;
        match response.status().kind() {
            StatusKind::Success => {}
            StatusKind::ConditionsNotSatisfied => return Err(TransactionError::ConditionsNotSatisfied),
            _ => {
                return Err(TransactionError::UnexpectedStatus {
                    command: "GET PROCESSING OPTIONS",
                    status: response.status(),
                })
            }
        }
        self.application.apply_processing_options(&response.data)?;

        let afl = self.application.afl().to_vec();
        for entry in &afl {
            for record in entry.records() {
                let response = commands::read_record(record, entry.sfi).send(&mut self.transport)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TransactionError::RecordReadFailed {
                        sfi: entry.sfi,
                        record,
                        status,
                    });
                }
                self.application.ingest_record(entry.sfi, record, response.data)?;
            }
        }
        self.application.finish_records();
        self.application.check_mandatory()?;

        tracing::info!(records = self.application.records().len(), "Application data read");
        Ok(())
    }

    /// Offline data authentication, processing restrictions, cardholder
    /// verification and terminal risk management, in that order
    pub fn prepare(&mut self) -> Result<(), TransactionError> {
        self.expect_state("prepare", TransactionState::ProcessingInitiated)?;
        if !self.application.records_complete() {
            return Err(TransactionError::InvalidState {
                operation: "prepare",
                state: self.state,
            });
        }
        match self.run_preparation() {
            Ok(()) => {
                self.state = TransactionState::TransactionPrepared;
                tracing::info!(tvr = %self.tvr, tsi = %self.tsi, "Transaction prepared");
                Ok(())
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    fn run_preparation(&mut self) -> Result<(), TransactionError> {
        let aip = self.application.aip().unwrap_or_default();
        self.offline_data_authentication()?;
        check_processing_restrictions(&self.application.restriction_data(), self.config, &self.params, &mut self.tvr);

        if aip[0] & 0x10 != 0 {
            self.cardholder_verification()?;
        } else {
            tracing::debug!("Cardholder verification not supported by the card");
            self.cvm_results = Some(NO_CVM_PERFORMED);
        }

        if aip[0] & 0x08 != 0 || self.config.force_risk_management {
            self.terminal_risk_management()?;
        } else {
            tracing::debug!("Terminal risk management not requested by the card");
        }

        if self.params.force_online {
            self.tvr.set(TvrFlag::MerchantForcedOnline);
        }
        Ok(())
    }

    fn offline_data_authentication(&mut self) -> Result<(), TransactionError> {
        let aip = self.application.aip().unwrap_or_default();
        let method = AuthenticationMethod::select(&aip, &self.config.terminal_capabilities);
        self.authentication = method;
        tracing::info!(%method, "Offline data authentication");

        let failed_flag = match method {
            AuthenticationMethod::None => {
                self.tvr.set(TvrFlag::OfflineDataAuthenticationNotPerformed);
                return Ok(());
            }
            AuthenticationMethod::Sda => {
                self.tvr.set(TvrFlag::SdaSelected);
                TvrFlag::SdaFailed
            }
            AuthenticationMethod::Dda => TvrFlag::DdaFailed,
            AuthenticationMethod::Cda => TvrFlag::CdaFailed,
        };

        let oda_input = self.application.offline_auth_input()?;
        let ddol_data = if method == AuthenticationMethod::Dda {
            let ddol = self.application.ddol().unwrap_or(self.config.default_ddol.as_slice());
            self.dictionary().build_from(ddol)?
        } else {
            Vec::new()
        };

        let app = &self.application;
        let today = self.params.date;
        let issuer = recover_issuer_key(app, &self.trust_store, today, &mut self.tvr);
        if let Step::Passed(issuer_key) = &issuer {
            if let Some(cert) = app.pin_certificate() {
                // Failure only matters if an enciphered PIN is attempted later
                let _ = cert.validate(issuer_key, &oda_input);
            }
        }

        let outcome = match method {
            AuthenticationMethod::Sda => issuer.and_then(|key| verify_static_data(app, key, &oda_input, &mut self.tvr)),
            AuthenticationMethod::Cda => issuer
                .and_then(|key| recover_icc_key(app, key, &oda_input, today, &mut self.tvr))
                .map(|_| ()),
            _ => match issuer.and_then(|key| recover_icc_key(app, key, &oda_input, today, &mut self.tvr)) {
                Step::Passed(icc_key) => match internal_authenticate(&mut self.transport, ddol_data.clone())? {
                    Some(signed) => {
                        let sdad = SignedDynamicApplicationData::new(signed);
                        let passed = sdad.validate(icc_key, &ddol_data).is_ok();
                        self.signed_dynamic_data = Some(sdad);
                        if passed {
                            Step::Passed(())
                        } else {
                            Step::Failed
                        }
                    }
                    None => Step::Failed,
                },
                other => other.map(|_| ()),
            },
        };

        match outcome {
            Step::NotPerformed => self.tvr.set(TvrFlag::OfflineDataAuthenticationNotPerformed),
            Step::Passed(()) => {
                tracing::info!(%method, "Offline data authentication succeeded");
                self.tsi.set(TsiFlag::OfflineDataAuthenticationPerformed);
            }
            Step::Failed => {
                tracing::warn!(%method, "Offline data authentication failed");
                self.tsi.set(TsiFlag::OfflineDataAuthenticationPerformed);
                self.tvr.set(failed_flag);
            }
        }
        Ok(())
    }

    fn cardholder_verification(&mut self) -> Result<(), TransactionError> {
        let context = CvmContext {
            transaction_type: self.params.transaction_type,
            amount: self.params.amount,
            transaction_currency: self.config.transaction_currency_code,
            application_currency: self.application.application_currency(),
            terminal_capabilities: self.config.terminal_capabilities,
            unattended: self.config.is_unattended(),
            online_capable: self.config.is_online_capable(),
            recognised_conditions: self.config.recognised_cvm_conditions.clone(),
        };

        // A failed card link abandons the phase with the ledgers it started with
        let ledgers = (self.tvr, self.tsi);
        let mut verifier = CardVerifier {
            transport: &mut self.transport,
            pin_entry: &mut *self.pin_entry,
            application: &self.application,
            pin_try_counter: self.application.pin_try_counter(),
            failure: None,
        };
        let report = CvmEngine::new(&context).evaluate(
            self.application.cvm_list(),
            &mut verifier,
            &mut self.tvr,
            &mut self.tsi,
        );
        if let Some(error) = verifier.failure.take() {
            (self.tvr, self.tsi) = ledgers;
            return Err(error.into());
        }
        let tries = verifier.pin_try_counter;

        if let Some(tries) = tries {
            self.application.set_pin_try_counter(tries);
        }
        tracing::info!(
            outcome = ?report.outcome,
            cvm_results = %hex::encode_upper(report.cvm_results),
            "Cardholder verification"
        );
        self.cvm_results = Some(report.cvm_results);
        Ok(())
    }

    fn terminal_risk_management(&mut self) -> Result<(), TransactionError> {
        let has_limits =
            self.application.lower_offline_limit().is_some() && self.application.upper_offline_limit().is_some();
        if has_limits {
            if self.application.atc().is_none() {
                self.read_card_data(tags::APPLICATION_TRANSACTION_COUNTER)?;
            }
            if self.application.last_online_atc().is_none() {
                self.read_card_data(tags::LAST_ONLINE_ATC_REGISTER)?;
            }
        }

        let app = &self.application;
        let pan = app.pan().unwrap_or_default();
        if self.config.is_on_exception_file(pan) {
            tracing::warn!("Card is on the terminal exception file");
            self.tvr.set(TvrFlag::CardOnExceptionFile);
        }

        let facts = RiskFacts {
            pan,
            amount: self.params.amount,
            atc: app.atc(),
            last_online_atc: app.last_online_atc(),
            lower_limit: app.lower_offline_limit(),
            upper_limit: app.upper_offline_limit(),
        };
        RiskManager::new(self.config, self.log).perform(&facts, &mut self.tvr, &mut self.tsi, &mut rand::thread_rng());
        Ok(())
    }

    fn read_card_data(&mut self, tag: EmvTag) -> Result<(), TransactionError> {
        let response = commands::get_data(tag.bytes()).send(&mut self.transport)?;
        if response.is_success() {
            self.application.ingest_get_data(&response.data)?;
        } else {
            tracing::debug!(%tag, sw = %response.status(), "GET DATA not answered");
        }
        Ok(())
    }

    /// Run a terminal action analysis policy over the prepared transaction
    pub fn analyse_actions(&self, analysis: &dyn ActionAnalysis) -> Result<CryptogramType, TransactionError> {
        self.expect_state("terminal action analysis", TransactionState::TransactionPrepared)?;
        let codes = self
            .application
            .action_codes(self.config.tac_default, self.config.tac_denial, self.config.tac_online);
        Ok(analysis.decide(&self.tvr, &codes, self.config.is_online_capable()))
    }

    /// First GENERATE AC with the CDOL1 data
    pub fn generate_ac(&mut self, requested: CryptogramType) -> Result<&CryptogramResponse, TransactionError> {
        self.expect_state("generate AC", TransactionState::TransactionPrepared)?;
        match self.request_cryptogram(requested) {
            Ok(response) => {
                self.state = TransactionState::CryptogramGenerated;
                let response: &CryptogramResponse = self.cryptogram.insert(response);
                Ok(response)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    fn request_cryptogram(&mut self, requested: CryptogramType) -> Result<CryptogramResponse, TransactionError> {
        let cdol1 = self
            .application
            .cdol1()
            .ok_or(SmartCardError::MissingMandatoryData { tag: tags::CDOL1 })?;
        let data = self.dictionary().build_from(cdol1)?;

        let response = commands::generate_ac(requested, data).send(&mut self.transport)?;
        if !response.is_success() {
            return Err(TransactionError::UnexpectedStatus {
                command: "GENERATE AC",
                status: response.status(),
            });
        }

        let parsed = CryptogramResponse::parse(&response.data)?;
        tracing::info!(
            ?requested,
            returned = ?parsed.cryptogram_type(),
            atc = parsed.atc,
            "Cryptogram generated"
        );
        Ok(parsed)
    }

    /// Finish the transaction and hand back what the terminal should keep
    pub fn complete(&mut self) -> Result<TransactionRecord, TransactionError> {
        self.expect_state("complete", TransactionState::CryptogramGenerated)?;
        self.state = TransactionState::PostProcessed;
        Ok(TransactionRecord {
            pan: self.application.pan().unwrap_or_default().to_string(),
            amount: self.params.amount,
            tvr: self.tvr,
            tsi: self.tsi,
            cryptogram: self.cryptogram.as_ref().and_then(CryptogramResponse::cryptogram_type),
        })
    }
}

/// Wrap PDOL data in the command template (83) GPO expects
fn command_template(data: &[u8]) -> Vec<u8> {
    let mut template = tags::COMMAND_TEMPLATE.bytes().to_vec();
    if data.len() > 0x7F {
        template.push(0x81);
    }
    template.push(data.len() as u8);
    template.extend_from_slice(data);
    template
}

/// Outcome of one step of offline data authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step<K> {
    /// No CA public key for this card
    NotPerformed,
    Failed,
    Passed(K),
}

impl<K> Step<K> {
    fn and_then<U>(self, f: impl FnOnce(K) -> Step<U>) -> Step<U> {
        match self {
            Step::NotPerformed => Step::NotPerformed,
            Step::Failed => Step::Failed,
            Step::Passed(k) => f(k),
        }
    }

    fn map<U>(self, f: impl FnOnce(K) -> U) -> Step<U> {
        self.and_then(|k| Step::Passed(f(k)))
    }
}

fn not_expired(key: &RecoveredPublicKey, today: NaiveDate) -> bool {
    key.expiration_date().map_or(false, |last_day| last_day >= today)
}

/// Recover the issuer public key and check it belongs to this card
fn recover_issuer_key<'k>(
    app: &'k EmvApplication,
    store: &TrustStore,
    today: NaiveDate,
    tvr: &mut TerminalVerificationResults,
) -> Step<&'k RecoveredPublicKey> {
    let (Some(index), Some(cert)) = (app.ca_key_index(), app.issuer_certificate()) else {
        tracing::info!("Issuer public key data missing");
        tvr.set(TvrFlag::IccDataMissing);
        return Step::Failed;
    };
    let Some(ca_key) = store.lookup(app.aid(), index) else {
        tracing::warn!(
            rid = %hex::encode_upper(app.aid().get(..5).unwrap_or_default()),
            index = %format!("{:02X}", index),
            "CA public key not in trust store"
        );
        return Step::NotPerformed;
    };

    let Ok(key) = cert.validate(ca_key) else {
        return Step::Failed;
    };
    let pan = app.pan().unwrap_or_default();
    if key.identifier.is_empty() || !pan.starts_with(&key.identifier) {
        tracing::warn!(issuer = %key.identifier, "Issuer identifier does not match the PAN");
        return Step::Failed;
    }
    if !not_expired(key, today) {
        tracing::warn!(expiry = %key.expiration_string(), "Issuer public key certificate expired");
        return Step::Failed;
    }
    Step::Passed(key)
}

/// Recover the ICC public key and check it was issued for this PAN
fn recover_icc_key<'k>(
    app: &'k EmvApplication,
    issuer_key: &RecoveredPublicKey,
    oda_input: &[u8],
    today: NaiveDate,
    tvr: &mut TerminalVerificationResults,
) -> Step<&'k RecoveredPublicKey> {
    let Some(cert) = app.icc_certificate() else {
        tracing::info!("ICC public key data missing");
        tvr.set(TvrFlag::IccDataMissing);
        return Step::Failed;
    };
    let Ok(key) = cert.validate(issuer_key, oda_input) else {
        return Step::Failed;
    };
    if Some(key.identifier.as_str()) != app.pan() {
        tracing::warn!("ICC public key certificate issued for a different PAN");
        return Step::Failed;
    }
    if !not_expired(key, today) {
        tracing::warn!(expiry = %key.expiration_string(), "ICC public key certificate expired");
        return Step::Failed;
    }
    Step::Passed(key)
}

fn verify_static_data(
    app: &EmvApplication,
    issuer_key: &RecoveredPublicKey,
    oda_input: &[u8],
    tvr: &mut TerminalVerificationResults,
) -> Step<()> {
    let Some(ssad) = app.signed_static_data() else {
        tracing::info!("Signed static application data missing");
        tvr.set(TvrFlag::IccDataMissing);
        return Step::Failed;
    };
    match ssad.validate(issuer_key, oda_input) {
        Ok(dac) => {
            tracing::debug!(dac = %hex::encode_upper(dac), "Data authentication code recovered");
            Step::Passed(())
        }
        Err(_) => Step::Failed,
    }
}

/// INTERNAL AUTHENTICATE; `None` when the card refuses or omits the signature
fn internal_authenticate<T: CardTransport>(
    transport: &mut T,
    ddol_data: Vec<u8>,
) -> Result<Option<Vec<u8>>, TransportError> {
    let response = commands::internal_authenticate(ddol_data).send(transport)?;
    if !response.is_success() {
        tracing::warn!(sw = %response.status(), "INTERNAL AUTHENTICATE refused");
        return Ok(None);
    }
    let signed = find_tag(&response.data, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1.bytes()).or_else(|| {
        find_tag(&response.data, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2.bytes())
            .and_then(|body| find_tag(body, tags::SIGNED_DYNAMIC_APPLICATION_DATA.bytes()))
    });
    Ok(signed.map(<[u8]>::to_vec))
}

/// Key for offline PIN encipherment: the PIN key if the card has one,
/// otherwise the ICC key, and only once validated for this PAN
fn pin_encipherment_key(app: &EmvApplication) -> Option<&RecoveredPublicKey> {
    let issued_here = |key: &&RecoveredPublicKey| Some(key.identifier.as_str()) == app.pan();
    match app.pin_certificate() {
        Some(cert) => cert.public_key().filter(issued_here),
        None => app.icc_certificate().and_then(|c| c.public_key()).filter(issued_here),
    }
}

/// Performs PIN methods for the CVM engine over the transaction's card link
struct CardVerifier<'t, 'p, T> {
    transport: &'t mut T,
    pin_entry: &'t mut (dyn PinEntry + 'p),
    application: &'t EmvApplication,
    pin_try_counter: Option<u8>,
    failure: Option<TransportError>,
}

impl<'t, T: CardTransport> CardVerifier<'t, '_, T> {
    /// Send a command, remembering the first link failure
    fn exchange(&mut self, command: ApduCommand) -> Option<ApduResponse> {
        if self.failure.is_some() {
            return None;
        }
        match command.send(&mut *self.transport) {
            Ok(response) => Some(response),
            Err(e) => {
                self.failure = Some(e);
                None
            }
        }
    }

    fn read_pin_try_counter(&mut self) -> Option<u8> {
        let response = self.exchange(commands::get_data(tags::PIN_TRY_COUNTER.bytes()))?;
        if !response.is_success() {
            return None;
        }
        find_tag(&response.data, tags::PIN_TRY_COUNTER.bytes()).and_then(|v| v.first().copied())
    }
}

impl<T: CardTransport> CardholderVerifier for CardVerifier<'_, '_, T> {
    fn verify_offline_pin(&mut self, enciphered: bool) -> PinResult {
        if !self.pin_entry.is_available() {
            return PinResult::PadUnavailable;
        }
        if let Some(tries) = self.read_pin_try_counter() {
            self.pin_try_counter = Some(tries);
        }
        if self.failure.is_some() {
            return PinResult::Rejected;
        }
        if self.pin_try_counter == Some(0) {
            tracing::info!("PIN try limit already exceeded");
            return PinResult::TryLimitExceeded;
        }

        let key = if enciphered {
            match pin_encipherment_key(self.application) {
                Some(key) => Some(key),
                None => {
                    tracing::warn!("No validated key for offline PIN encipherment");
                    return PinResult::Rejected;
                }
            }
        } else {
            None
        };

        loop {
            let Some(pin) = self.pin_entry.request_pin() else {
                return PinResult::NotEntered;
            };

            let command = match key {
                None => commands::verify_pin(plaintext_pin_block(&pin).to_vec(), commands::PIN_PLAINTEXT),
                Some(key) => {
                    let Some(challenge) = self.exchange(commands::get_challenge()).filter(|r| r.is_success()) else {
                        return PinResult::Rejected;
                    };
                    let Some(block) = encipher_pin_block(&pin, &challenge.data, key, &mut rand::thread_rng()) else {
                        return PinResult::Rejected;
                    };
                    commands::verify_pin(block, commands::PIN_ENCIPHERED)
                }
            };

            let Some(response) = self.exchange(command) else {
                return PinResult::Rejected;
            };
            match response.status().kind() {
                StatusKind::Success => return PinResult::Verified,
                StatusKind::WrongPin { tries_remaining } => {
                    self.pin_try_counter = Some(tries_remaining);
                    if tries_remaining == 0 {
                        return PinResult::TryLimitExceeded;
                    }
                    tracing::info!(tries_remaining, "Wrong PIN");
                }
                StatusKind::MethodBlocked => {
                    self.pin_try_counter = Some(0);
                    return PinResult::TryLimitExceeded;
                }
                _ => {
                    tracing::warn!(sw = %response.status(), "VERIFY failed");
                    return PinResult::Rejected;
                }
            }
        }
    }

    fn capture_online_pin(&mut self) -> PinResult {
        if !self.pin_entry.is_available() {
            return PinResult::PadUnavailable;
        }
        match self.pin_entry.request_pin() {
            Some(_) => PinResult::Verified,
            None => PinResult::NotEntered,
        }
    }
}
