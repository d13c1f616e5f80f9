//! Data model of one selected payment application

use emv_common::{bcd, find_tag, tags, unwrap_template, EmvTag, TlvIter};

use crate::afl::{parse_afl, AflEntry, RecordStore};
use crate::crypto::{
    build_auth_input, IccPinEnciphermentCertificate, IccPublicKeyCertificate, IssuerPublicKeyCertificate,
    SignedStaticApplicationData,
};
use crate::cvm::CvmList;
use crate::error::SmartCardError;
use crate::restrictions::RestrictionData;
use crate::terminal::ActionCodes;

/// Data element the terminal does not interpret, kept for audit and display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledElement {
    pub tag: Vec<u8>,
    pub value: Vec<u8>,
}

/// Certificate parts collected while records arrive in any order
#[derive(Debug, Default)]
struct KeyParts {
    certificate: Option<Vec<u8>>,
    exponent: Option<Vec<u8>>,
    remainder: Option<Vec<u8>>,
}

impl KeyParts {
    fn is_complete(&self) -> bool {
        self.certificate.is_some() && self.exponent.is_some()
    }
}

/// Everything the terminal knows about the selected application
///
/// Lives for one selected application. Certificate objects are built once
/// all AFL records have been read; they validate lazily and memoize, so the
/// application is not meant to be shared across threads.
#[derive(Debug, Default)]
pub struct EmvApplication {
    aid: Vec<u8>,
    label: Option<String>,
    pdol: Option<Vec<u8>>,

    aip: Option<[u8; 2]>,
    afl: Vec<AflEntry>,
    records: RecordStore,
    records_complete: bool,

    pan: Option<String>,
    pan_sequence_number: Option<u8>,
    expiration_date: Option<[u8; 3]>,
    effective_date: Option<[u8; 3]>,
    usage_control: Option<[u8; 2]>,
    application_version: Option<[u8; 2]>,
    application_currency: Option<[u8; 2]>,
    issuer_country: Option<[u8; 2]>,
    track2: Option<Vec<u8>>,
    cardholder_name: Option<String>,

    cvm_list: Option<CvmList>,
    sda_tag_list: Option<Vec<u8>>,
    iac_default: Option<[u8; 5]>,
    iac_denial: Option<[u8; 5]>,
    iac_online: Option<[u8; 5]>,
    cdol1: Option<Vec<u8>>,
    cdol2: Option<Vec<u8>>,
    ddol: Option<Vec<u8>>,

    atc: Option<u16>,
    last_online_atc: Option<u16>,
    pin_try_counter: Option<u8>,
    lower_offline_limit: Option<u8>,
    upper_offline_limit: Option<u8>,

    ca_key_index: Option<u8>,
    issuer_parts: KeyParts,
    icc_parts: KeyParts,
    pin_parts: KeyParts,
    ssad: Option<Vec<u8>>,

    issuer_certificate: Option<IssuerPublicKeyCertificate>,
    icc_certificate: Option<IccPublicKeyCertificate>,
    pin_certificate: Option<IccPinEnciphermentCertificate>,
    signed_static_data: Option<SignedStaticApplicationData>,

    unhandled: Vec<UnhandledElement>,
}

fn fixed<const N: usize>(value: &[u8]) -> Option<[u8; N]> {
    value.try_into().ok()
}

impl EmvApplication {
    pub fn new(aid: &[u8]) -> Self {
        Self {
            aid: aid.to_vec(),
            ..Self::default()
        }
    }

    /// Build from the File Control Information returned by SELECT
    pub fn from_fci(aid: &[u8], fci: &[u8]) -> Result<Self, SmartCardError> {
        let template = find_tag(fci, tags::FCI_TEMPLATE.bytes())
            .ok_or_else(|| SmartCardError::MalformedTlv("FCI template".to_string()))?;

        let mut app = Self::new(aid);
        if let Some(df_name) = find_tag(template, tags::DEDICATED_FILE_NAME.bytes()) {
            app.aid = df_name.to_vec();
        }

        let proprietary = find_tag(template, tags::FCI_PROPRIETARY_TEMPLATE.bytes()).unwrap_or(&[]);
        for tlv in TlvIter::new(proprietary) {
            match tlv.tag {
                [0x50] => app.label = Some(String::from_utf8_lossy(tlv.value).into_owned()),
                [0x9F, 0x38] => app.pdol = Some(tlv.value.to_vec()),
                _ => app.unhandled.push(UnhandledElement {
                    tag: tlv.tag.to_vec(),
                    value: tlv.value.to_vec(),
                }),
            }
        }
        Ok(app)
    }

    /// Take AIP and AFL from a GET PROCESSING OPTIONS response
    ///
    /// Format 1 (`80`) carries AIP followed by AFL, format 2 (`77`) carries
    /// them as tags `82` and `94`.
    pub fn apply_processing_options(&mut self, response: &[u8]) -> Result<(), SmartCardError> {
        let (aip, afl) = if let Some(format1) = find_tag(response, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1.bytes()) {
            if format1.len() < 2 {
                return Err(SmartCardError::MalformedTlv("GPO response format 1".to_string()));
            }
            (&format1[..2], &format1[2..])
        } else if let Some(format2) = find_tag(response, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2.bytes()) {
            let aip = find_tag(format2, tags::AIP.bytes()).ok_or(SmartCardError::MissingMandatoryData { tag: tags::AIP })?;
            let afl = find_tag(format2, tags::AFL.bytes()).ok_or(SmartCardError::MissingMandatoryData { tag: tags::AFL })?;
            (aip, afl)
        } else {
            return Err(SmartCardError::MalformedTlv("GPO response".to_string()));
        };

        self.aip = Some(fixed(aip).ok_or_else(|| SmartCardError::MalformedTlv("AIP".to_string()))?);
        self.afl = parse_afl(afl)?;
        Ok(())
    }

    /// Store one READ RECORD response and pick up the data elements in it
    ///
    /// Records of SFI 1 to 10 must be a `70` template. Records of higher
    /// SFIs are parsed only if they happen to be one.
    pub fn ingest_record(&mut self, sfi: u8, record: u8, raw: Vec<u8>) -> Result<(), SmartCardError> {
        let body = match TlvIter::new(&raw).next() {
            Some(tlv) if tlv.tag == tags::RECORD_TEMPLATE.bytes() => Some(tlv.value.to_vec()),
            _ if sfi <= 10 => return Err(SmartCardError::RecordNotTemplate { sfi, record }),
            _ => None,
        };
        self.records.insert_if_absent(sfi, record, raw)?;

        if let Some(body) = body {
            let mut iter = TlvIter::new(&body);
            for tlv in iter.by_ref() {
                self.ingest_element(tlv.tag, tlv.value)?;
            }
            if iter.is_malformed() {
                return Err(SmartCardError::MalformedTlv(format!("record {} of SFI {}", record, sfi)));
            }
        }
        Ok(())
    }

    /// Store the answer to GET DATA for one of the card counters
    pub fn ingest_get_data(&mut self, response: &[u8]) -> Result<(), SmartCardError> {
        for tlv in TlvIter::new(response) {
            self.ingest_element(tlv.tag, tlv.value)?;
        }
        Ok(())
    }

    fn ingest_element(&mut self, tag: &[u8], value: &[u8]) -> Result<(), SmartCardError> {
        let malformed = |tag: EmvTag| SmartCardError::MalformedTlv(format!("{} ({})", tag.name(), tag));
        match tag {
            [0x5A] => self.pan = bcd::cn_digits(value),
            [0x5F, 0x34] => self.pan_sequence_number = value.first().copied(),
            [0x5F, 0x24] => self.expiration_date = Some(fixed(value).ok_or_else(|| malformed(tags::APPLICATION_EXPIRATION_DATE))?),
            [0x5F, 0x25] => self.effective_date = Some(fixed(value).ok_or_else(|| malformed(tags::APPLICATION_EFFECTIVE_DATE))?),
            [0x9F, 0x07] => self.usage_control = fixed(value),
            [0x9F, 0x08] => self.application_version = fixed(value),
            [0x9F, 0x42] => self.application_currency = fixed(value),
            [0x5F, 0x28] => self.issuer_country = fixed(value),
            [0x57] => self.track2 = Some(value.to_vec()),
            [0x5F, 0x20] => self.cardholder_name = Some(String::from_utf8_lossy(value).trim().to_string()),
            [0x8E] => {
                self.cvm_list = Some(
                    CvmList::parse(value).map_err(|e| SmartCardError::MalformedTlv(format!("CVM list: {}", e)))?,
                )
            }
            [0x9F, 0x4A] => self.sda_tag_list = Some(value.to_vec()),
            [0x9F, 0x0D] => self.iac_default = fixed(value),
            [0x9F, 0x0E] => self.iac_denial = fixed(value),
            [0x9F, 0x0F] => self.iac_online = fixed(value),
            [0x8C] => self.cdol1 = Some(value.to_vec()),
            [0x8D] => self.cdol2 = Some(value.to_vec()),
            [0x9F, 0x49] => self.ddol = Some(value.to_vec()),
            [0x9F, 0x36] => self.atc = fixed(value).map(u16::from_be_bytes),
            [0x9F, 0x13] => self.last_online_atc = fixed(value).map(u16::from_be_bytes),
            [0x9F, 0x17] => self.pin_try_counter = value.first().copied(),
            [0x9F, 0x14] => self.lower_offline_limit = value.first().copied(),
            [0x9F, 0x23] => self.upper_offline_limit = value.first().copied(),
            [0x8F] => self.ca_key_index = value.first().copied(),
            [0x90] => self.issuer_parts.certificate = Some(value.to_vec()),
            [0x9F, 0x32] => self.issuer_parts.exponent = Some(value.to_vec()),
            [0x92] => self.issuer_parts.remainder = Some(value.to_vec()),
            [0x9F, 0x46] => self.icc_parts.certificate = Some(value.to_vec()),
            [0x9F, 0x47] => self.icc_parts.exponent = Some(value.to_vec()),
            [0x9F, 0x48] => self.icc_parts.remainder = Some(value.to_vec()),
            [0x9F, 0x2D] => self.pin_parts.certificate = Some(value.to_vec()),
            [0x9F, 0x2E] => self.pin_parts.exponent = Some(value.to_vec()),
            [0x9F, 0x2F] => self.pin_parts.remainder = Some(value.to_vec()),
            [0x93] => self.ssad = Some(value.to_vec()),
            _ => self.unhandled.push(UnhandledElement {
                tag: tag.to_vec(),
                value: value.to_vec(),
            }),
        }
        Ok(())
    }

    /// Mark record reading as finished and create the certificate objects
    pub fn finish_records(&mut self) {
        if let (Some(index), true) = (self.ca_key_index, self.issuer_parts.is_complete()) {
            let parts = std::mem::take(&mut self.issuer_parts);
            self.issuer_certificate = Some(IssuerPublicKeyCertificate::new(
                index,
                parts.certificate.unwrap_or_default(),
                parts.remainder.unwrap_or_default(),
                parts.exponent.unwrap_or_default(),
            ));
        }
        if self.icc_parts.is_complete() {
            let parts = std::mem::take(&mut self.icc_parts);
            self.icc_certificate = Some(IccPublicKeyCertificate::new(
                parts.certificate.unwrap_or_default(),
                parts.remainder.unwrap_or_default(),
                parts.exponent.unwrap_or_default(),
            ));
        }
        if self.pin_parts.is_complete() {
            let parts = std::mem::take(&mut self.pin_parts);
            self.pin_certificate = Some(IccPinEnciphermentCertificate::new(
                parts.certificate.unwrap_or_default(),
                parts.remainder.unwrap_or_default(),
                parts.exponent.unwrap_or_default(),
            ));
        }
        if let Some(ssad) = self.ssad.take() {
            self.signed_static_data = Some(SignedStaticApplicationData::new(ssad));
        }
        self.records_complete = true;
    }

    /// Fail if a data element every application must have is absent
    pub fn check_mandatory(&self) -> Result<(), SmartCardError> {
        let missing = [
            (self.expiration_date.is_none(), tags::APPLICATION_EXPIRATION_DATE),
            (self.pan.is_none(), tags::APPLICATION_PAN),
            (self.cdol1.is_none(), tags::CDOL1),
            (self.cdol2.is_none(), tags::CDOL2),
        ];
        match missing.into_iter().find(|(absent, _)| *absent) {
            Some((_, tag)) => Err(SmartCardError::MissingMandatoryData { tag }),
            None => Ok(()),
        }
    }

    /// Input to offline data authentication, see [`build_auth_input`]
    pub fn offline_auth_input(&self) -> Result<Vec<u8>, SmartCardError> {
        let aip = self.aip.unwrap_or_default();
        build_auth_input(&self.afl, &self.records, self.sda_tag_list.as_deref(), &aip)
    }

    pub fn aid(&self) -> &[u8] {
        &self.aid
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn pdol(&self) -> Option<&[u8]> {
        self.pdol.as_deref()
    }

    pub fn aip(&self) -> Option<[u8; 2]> {
        self.aip
    }

    pub fn afl(&self) -> &[AflEntry] {
        &self.afl
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_complete(&self) -> bool {
        self.records_complete
    }

    pub fn pan(&self) -> Option<&str> {
        self.pan.as_deref()
    }

    pub fn pan_sequence_number(&self) -> Option<u8> {
        self.pan_sequence_number
    }

    pub fn expiration_date(&self) -> Option<[u8; 3]> {
        self.expiration_date
    }

    pub fn track2(&self) -> Option<&[u8]> {
        self.track2.as_deref()
    }

    pub fn cardholder_name(&self) -> Option<&str> {
        self.cardholder_name.as_deref()
    }

    pub fn application_currency(&self) -> Option<[u8; 2]> {
        self.application_currency
    }

    pub fn cvm_list(&self) -> Option<&CvmList> {
        self.cvm_list.as_ref()
    }

    pub fn sda_tag_list(&self) -> Option<&[u8]> {
        self.sda_tag_list.as_deref()
    }

    pub fn cdol1(&self) -> Option<&[u8]> {
        self.cdol1.as_deref()
    }

    pub fn cdol2(&self) -> Option<&[u8]> {
        self.cdol2.as_deref()
    }

    pub fn ddol(&self) -> Option<&[u8]> {
        self.ddol.as_deref()
    }

    pub fn atc(&self) -> Option<u16> {
        self.atc
    }

    pub fn last_online_atc(&self) -> Option<u16> {
        self.last_online_atc
    }

    pub fn pin_try_counter(&self) -> Option<u8> {
        self.pin_try_counter
    }

    pub fn set_pin_try_counter(&mut self, tries: u8) {
        self.pin_try_counter = Some(tries);
    }

    pub fn lower_offline_limit(&self) -> Option<u8> {
        self.lower_offline_limit
    }

    pub fn upper_offline_limit(&self) -> Option<u8> {
        self.upper_offline_limit
    }

    pub fn ca_key_index(&self) -> Option<u8> {
        self.ca_key_index
    }

    pub fn issuer_certificate(&self) -> Option<&IssuerPublicKeyCertificate> {
        self.issuer_certificate.as_ref()
    }

    pub fn icc_certificate(&self) -> Option<&IccPublicKeyCertificate> {
        self.icc_certificate.as_ref()
    }

    pub fn pin_certificate(&self) -> Option<&IccPinEnciphermentCertificate> {
        self.pin_certificate.as_ref()
    }

    pub fn signed_static_data(&self) -> Option<&SignedStaticApplicationData> {
        self.signed_static_data.as_ref()
    }

    pub fn restriction_data(&self) -> RestrictionData {
        RestrictionData {
            application_version: self.application_version,
            usage_control: self.usage_control,
            issuer_country: self.issuer_country,
            effective_date: self.effective_date,
            expiration_date: self.expiration_date,
        }
    }

    pub fn action_codes(&self, tac_default: [u8; 5], tac_denial: [u8; 5], tac_online: [u8; 5]) -> ActionCodes {
        ActionCodes {
            iac_default: self.iac_default,
            iac_denial: self.iac_denial,
            iac_online: self.iac_online,
            tac_default,
            tac_denial,
            tac_online,
        }
    }

    /// Data elements passed through without interpretation
    pub fn unhandled(&self) -> &[UnhandledElement] {
        &self.unhandled
    }
}

/// Strip a template tag from a record if present, e.g. for display
pub fn record_body(raw: &[u8]) -> &[u8] {
    unwrap_template(raw, tags::RECORD_TEMPLATE.bytes())
}

/// Well-known payment application identifiers
pub mod aids {
    /// Visa credit/debit
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];

    /// Mastercard credit/debit
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];

    /// Maestro
    pub const MAESTRO: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x30, 0x60];

    /// American Express
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x02, 0x50, 0x00];

    /// Tried in this order when the operator names no AID
    pub const CANDIDATES: &[(&str, &[u8])] = &[
        ("Visa", VISA),
        ("Mastercard", MASTERCARD),
        ("Maestro", MAESTRO),
        ("American Express", AMEX),
    ];
}
