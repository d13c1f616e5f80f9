//! EMV Common - Shared data structures and utilities for EMV processing
//!
//! The terminal core treats BER-TLV as an external concern; this crate only
//! provides the small amount of lookup and iteration the higher layers need
//! to pull data elements out of card responses.

pub mod bcd;

/// A single BER-TLV data object borrowed from a response buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// Tag bytes (1 or 2 bytes for EMV tags)
    pub tag: &'a [u8],
    /// Value bytes
    pub value: &'a [u8],
    /// The complete encoding: tag, length and value
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Whether the value holds further TLV objects (bit 6 of the first tag byte)
    pub fn is_constructed(&self) -> bool {
        self.tag.first().map_or(false, |b| b & 0x20 != 0)
    }

    /// Iterate over the children of a constructed object
    pub fn children(&self) -> TlvIter<'a> {
        TlvIter::new(self.value)
    }
}

/// Iterator over consecutive TLV objects at one nesting level
///
/// Padding bytes `0x00` and `0xFF` between objects are skipped. Iteration
/// stops at the first malformed object; [`TlvIter::is_malformed`] reports
/// whether that happened.
#[derive(Debug, Clone)]
pub struct TlvIter<'a> {
    data: &'a [u8],
    pos: usize,
    malformed: bool,
}

impl<'a> TlvIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            malformed: false,
        }
    }

    /// True once the iterator has stopped on bytes that are not valid TLV
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;

        while self.pos < data.len() && (data[self.pos] == 0x00 || data[self.pos] == 0xFF) {
            self.pos += 1;
        }
        if self.pos >= data.len() || self.malformed {
            return None;
        }

        let start = self.pos;
        let mut i = start;

        // Tag: a low nibble of 1F means a subsequent byte follows, and each
        // following byte with bit 8 set is continued again.
        let mut tag_len = 1;
        if data[i] & 0x1F == 0x1F {
            while i + tag_len < data.len() {
                let b = data[i + tag_len];
                tag_len += 1;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }
        if i + tag_len > data.len() {
            self.malformed = true;
            return None;
        }
        let tag = &data[i..i + tag_len];
        i += tag_len;

        // Length
        if i >= data.len() {
            self.malformed = true;
            return None;
        }
        let first = data[i] as usize;
        i += 1;
        let len = if first & 0x80 != 0 {
            let num_len_bytes = first & 0x7F;
            if num_len_bytes == 0 || num_len_bytes > 3 || i + num_len_bytes > data.len() {
                self.malformed = true;
                return None;
            }
            let mut actual = 0usize;
            for j in 0..num_len_bytes {
                actual = (actual << 8) | (data[i + j] as usize);
            }
            i += num_len_bytes;
            actual
        } else {
            first
        };

        if i + len > data.len() {
            self.malformed = true;
            return None;
        }

        self.pos = i + len;
        Some(Tlv {
            tag,
            value: &data[i..i + len],
            raw: &data[start..i + len],
        })
    }
}

/// TLV (Tag-Length-Value) parser for EMV data
///
/// Searches for a specific tag at the top level of EMV-encoded data and
/// returns its value.
///
/// # Arguments
/// * `data` - The EMV-encoded data to search
/// * `tag` - The tag bytes to search for (1 or 2 bytes)
///
/// # Returns
/// * `Some(&[u8])` - The value bytes if tag is found
/// * `None` - If tag is not found or data is malformed before it
pub fn find_tag<'a>(data: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
    TlvIter::new(data).find(|tlv| tlv.tag == tag).map(|tlv| tlv.value)
}

/// Depth-first search through constructed objects for the first occurrence of `tag`
pub fn find_tag_recursive<'a>(data: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
    for tlv in TlvIter::new(data) {
        if tlv.tag == tag {
            return Some(tlv.value);
        }
        if tlv.is_constructed() {
            if let Some(found) = find_tag_recursive(tlv.value, tag) {
                return Some(found);
            }
        }
    }
    None
}

/// Unwrap a template if `data` starts with it, otherwise return `data` unchanged
pub fn unwrap_template<'a>(data: &'a [u8], template: &[u8]) -> &'a [u8] {
    match TlvIter::new(data).next() {
        Some(tlv) if tlv.tag == template => tlv.value,
        _ => data,
    }
}

/// EMV Tag identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmvTag(pub &'static [u8]);

impl EmvTag {
    pub fn bytes(&self) -> &'static [u8] {
        self.0
    }

    pub fn name(&self) -> &'static str {
        get_tag_name(self.0)
    }
}

impl std::fmt::Display for EmvTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Common EMV tags used in payment card processing
pub mod tags {
    use super::EmvTag;

    // Application metadata
    pub const APPLICATION_IDENTIFIER: EmvTag = EmvTag(&[0x4F]);
    pub const APPLICATION_LABEL: EmvTag = EmvTag(&[0x50]);
    pub const APPLICATION_PAN: EmvTag = EmvTag(&[0x5A]);
    pub const APPLICATION_EXPIRATION_DATE: EmvTag = EmvTag(&[0x5F, 0x24]);
    pub const APPLICATION_EFFECTIVE_DATE: EmvTag = EmvTag(&[0x5F, 0x25]);
    pub const APPLICATION_PAN_SEQUENCE_NUMBER: EmvTag = EmvTag(&[0x5F, 0x34]);
    pub const APPLICATION_USAGE_CONTROL: EmvTag = EmvTag(&[0x9F, 0x07]);
    pub const APPLICATION_VERSION_NUMBER: EmvTag = EmvTag(&[0x9F, 0x08]);
    pub const TERMINAL_APPLICATION_VERSION_NUMBER: EmvTag = EmvTag(&[0x9F, 0x09]);
    pub const APPLICATION_CURRENCY_CODE: EmvTag = EmvTag(&[0x9F, 0x42]);
    pub const APPLICATION_CURRENCY_EXPONENT: EmvTag = EmvTag(&[0x9F, 0x44]);
    pub const APPLICATION_PRIORITY_INDICATOR: EmvTag = EmvTag(&[0x87]);
    pub const DEDICATED_FILE_NAME: EmvTag = EmvTag(&[0x84]);

    // Cardholder data
    pub const CARDHOLDER_NAME: EmvTag = EmvTag(&[0x5F, 0x20]);
    pub const TRACK_1_DATA: EmvTag = EmvTag(&[0x56]);
    pub const TRACK_2_EQUIVALENT_DATA: EmvTag = EmvTag(&[0x57]);
    pub const TRACK_2_DATA: EmvTag = EmvTag(&[0x9F, 0x6B]);

    // Issuer data
    pub const ISSUER_COUNTRY_CODE: EmvTag = EmvTag(&[0x5F, 0x28]);
    pub const LANGUAGE_PREFERENCE: EmvTag = EmvTag(&[0x5F, 0x2D]);
    pub const ISSUER_ACTION_CODE_DEFAULT: EmvTag = EmvTag(&[0x9F, 0x0D]);
    pub const ISSUER_ACTION_CODE_DENIAL: EmvTag = EmvTag(&[0x9F, 0x0E]);
    pub const ISSUER_ACTION_CODE_ONLINE: EmvTag = EmvTag(&[0x9F, 0x0F]);

    // Cryptography and certificates
    pub const CA_PUBLIC_KEY_INDEX: EmvTag = EmvTag(&[0x8F]);
    pub const ISSUER_PUBLIC_KEY_CERTIFICATE: EmvTag = EmvTag(&[0x90]);
    pub const ISSUER_PUBLIC_KEY_EXPONENT: EmvTag = EmvTag(&[0x9F, 0x32]);
    pub const ISSUER_PUBLIC_KEY_REMAINDER: EmvTag = EmvTag(&[0x92]);
    pub const ICC_PUBLIC_KEY_CERTIFICATE: EmvTag = EmvTag(&[0x9F, 0x46]);
    pub const ICC_PUBLIC_KEY_EXPONENT: EmvTag = EmvTag(&[0x9F, 0x47]);
    pub const ICC_PUBLIC_KEY_REMAINDER: EmvTag = EmvTag(&[0x9F, 0x48]);
    pub const ICC_PIN_ENCIPHERMENT_PUBLIC_KEY_CERTIFICATE: EmvTag = EmvTag(&[0x9F, 0x2D]);
    pub const ICC_PIN_ENCIPHERMENT_PUBLIC_KEY_EXPONENT: EmvTag = EmvTag(&[0x9F, 0x2E]);
    pub const ICC_PIN_ENCIPHERMENT_PUBLIC_KEY_REMAINDER: EmvTag = EmvTag(&[0x9F, 0x2F]);
    pub const SIGNED_STATIC_APPLICATION_DATA: EmvTag = EmvTag(&[0x93]);
    pub const SIGNED_DYNAMIC_APPLICATION_DATA: EmvTag = EmvTag(&[0x9F, 0x4B]);
    pub const STATIC_DATA_AUTHENTICATION_TAG_LIST: EmvTag = EmvTag(&[0x9F, 0x4A]);
    pub const DATA_AUTHENTICATION_CODE: EmvTag = EmvTag(&[0x9F, 0x45]);
    pub const ICC_DYNAMIC_NUMBER: EmvTag = EmvTag(&[0x9F, 0x4C]);

    // Cardholder verification and risk management
    pub const CVM_LIST: EmvTag = EmvTag(&[0x8E]);
    pub const CVM_RESULTS: EmvTag = EmvTag(&[0x9F, 0x34]);
    pub const PIN_TRY_COUNTER: EmvTag = EmvTag(&[0x9F, 0x17]);
    pub const APPLICATION_TRANSACTION_COUNTER: EmvTag = EmvTag(&[0x9F, 0x36]);
    pub const LAST_ONLINE_ATC_REGISTER: EmvTag = EmvTag(&[0x9F, 0x13]);
    pub const LOWER_CONSECUTIVE_OFFLINE_LIMIT: EmvTag = EmvTag(&[0x9F, 0x14]);
    pub const UPPER_CONSECUTIVE_OFFLINE_LIMIT: EmvTag = EmvTag(&[0x9F, 0x23]);

    // Transaction data
    pub const AMOUNT_AUTHORISED: EmvTag = EmvTag(&[0x9F, 0x02]);
    pub const AMOUNT_OTHER: EmvTag = EmvTag(&[0x9F, 0x03]);
    pub const TRANSACTION_CURRENCY_CODE: EmvTag = EmvTag(&[0x5F, 0x2A]);
    pub const TRANSACTION_CURRENCY_EXPONENT: EmvTag = EmvTag(&[0x5F, 0x36]);
    pub const TRANSACTION_DATE: EmvTag = EmvTag(&[0x9A]);
    pub const TRANSACTION_TYPE: EmvTag = EmvTag(&[0x9C]);
    pub const TERMINAL_COUNTRY_CODE: EmvTag = EmvTag(&[0x9F, 0x1A]);
    pub const TERMINAL_CAPABILITIES: EmvTag = EmvTag(&[0x9F, 0x33]);
    pub const ADDITIONAL_TERMINAL_CAPABILITIES: EmvTag = EmvTag(&[0x9F, 0x40]);
    pub const TERMINAL_TYPE: EmvTag = EmvTag(&[0x9F, 0x35]);
    pub const TERMINAL_FLOOR_LIMIT: EmvTag = EmvTag(&[0x9F, 0x1B]);
    pub const UNPREDICTABLE_NUMBER: EmvTag = EmvTag(&[0x9F, 0x37]);
    pub const TERMINAL_VERIFICATION_RESULTS: EmvTag = EmvTag(&[0x95]);
    pub const TRANSACTION_STATUS_INFORMATION: EmvTag = EmvTag(&[0x9B]);
    pub const PDOL: EmvTag = EmvTag(&[0x9F, 0x38]);
    pub const CDOL1: EmvTag = EmvTag(&[0x8C]);
    pub const CDOL2: EmvTag = EmvTag(&[0x8D]);
    pub const DDOL: EmvTag = EmvTag(&[0x9F, 0x49]);
    pub const AFL: EmvTag = EmvTag(&[0x94]);
    pub const AIP: EmvTag = EmvTag(&[0x82]);
    pub const COMMAND_TEMPLATE: EmvTag = EmvTag(&[0x83]);

    // GENERATE AC response
    pub const CRYPTOGRAM_INFORMATION_DATA: EmvTag = EmvTag(&[0x9F, 0x27]);
    pub const APPLICATION_CRYPTOGRAM: EmvTag = EmvTag(&[0x9F, 0x26]);
    pub const ISSUER_APPLICATION_DATA: EmvTag = EmvTag(&[0x9F, 0x10]);

    // Response templates
    pub const FCI_TEMPLATE: EmvTag = EmvTag(&[0x6F]);
    pub const FCI_PROPRIETARY_TEMPLATE: EmvTag = EmvTag(&[0xA5]);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_1: EmvTag = EmvTag(&[0x80]);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_2: EmvTag = EmvTag(&[0x77]);
    pub const RECORD_TEMPLATE: EmvTag = EmvTag(&[0x70]);
}

/// Get a human-readable name for an EMV tag
pub fn get_tag_name(tag: &[u8]) -> &'static str {
    match tag {
        [0x4F] => "Application Identifier (AID)",
        [0x50] => "Application Label",
        [0x56] => "Track 1 Data",
        [0x57] => "Track 2 Equivalent Data",
        [0x5A] => "Application PAN",
        [0x5F, 0x20] => "Cardholder Name",
        [0x5F, 0x24] => "Application Expiration Date",
        [0x5F, 0x25] => "Application Effective Date",
        [0x5F, 0x28] => "Issuer Country Code",
        [0x5F, 0x2A] => "Transaction Currency Code",
        [0x5F, 0x2D] => "Language Preference",
        [0x5F, 0x34] => "Application PAN Sequence Number",
        [0x5F, 0x36] => "Transaction Currency Exponent",
        [0x82] => "Application Interchange Profile",
        [0x84] => "Dedicated File (DF) Name",
        [0x87] => "Application Priority Indicator",
        [0x8C] => "CDOL1",
        [0x8D] => "CDOL2",
        [0x8E] => "Cardholder Verification Method (CVM) List",
        [0x8F] => "CA Public Key Index",
        [0x90] => "Issuer Public Key Certificate",
        [0x92] => "Issuer Public Key Remainder",
        [0x93] => "Signed Static Application Data",
        [0x94] => "Application File Locator",
        [0x95] => "Terminal Verification Results",
        [0x9A] => "Transaction Date",
        [0x9B] => "Transaction Status Information",
        [0x9C] => "Transaction Type",
        [0x9F, 0x02] => "Amount, Authorised",
        [0x9F, 0x03] => "Amount, Other",
        [0x9F, 0x07] => "Application Usage Control",
        [0x9F, 0x08] => "Application Version Number (Card)",
        [0x9F, 0x09] => "Application Version Number (Terminal)",
        [0x9F, 0x0D] => "Issuer Action Code - Default",
        [0x9F, 0x0E] => "Issuer Action Code - Denial",
        [0x9F, 0x0F] => "Issuer Action Code - Online",
        [0x9F, 0x10] => "Issuer Application Data",
        [0x9F, 0x13] => "Last Online ATC Register",
        [0x9F, 0x14] => "Lower Consecutive Offline Limit",
        [0x9F, 0x17] => "PIN Try Counter",
        [0x9F, 0x1A] => "Terminal Country Code",
        [0x9F, 0x1B] => "Terminal Floor Limit",
        [0x9F, 0x23] => "Upper Consecutive Offline Limit",
        [0x9F, 0x26] => "Application Cryptogram",
        [0x9F, 0x27] => "Cryptogram Information Data",
        [0x9F, 0x2D] => "ICC PIN Encipherment Public Key Certificate",
        [0x9F, 0x2E] => "ICC PIN Encipherment Public Key Exponent",
        [0x9F, 0x2F] => "ICC PIN Encipherment Public Key Remainder",
        [0x9F, 0x32] => "Issuer Public Key Exponent",
        [0x9F, 0x33] => "Terminal Capabilities",
        [0x9F, 0x34] => "CVM Results",
        [0x9F, 0x35] => "Terminal Type",
        [0x9F, 0x36] => "Application Transaction Counter (ATC)",
        [0x9F, 0x37] => "Unpredictable Number",
        [0x9F, 0x38] => "PDOL",
        [0x9F, 0x40] => "Additional Terminal Capabilities",
        [0x9F, 0x42] => "Application Currency Code",
        [0x9F, 0x44] => "Application Currency Exponent",
        [0x9F, 0x45] => "Data Authentication Code",
        [0x9F, 0x46] => "ICC Public Key Certificate",
        [0x9F, 0x47] => "ICC Public Key Exponent",
        [0x9F, 0x48] => "ICC Public Key Remainder",
        [0x9F, 0x49] => "DDOL",
        [0x9F, 0x4A] => "Static Data Authentication Tag List",
        [0x9F, 0x4B] => "Signed Dynamic Application Data",
        [0x9F, 0x4C] => "ICC Dynamic Number",
        [0x9F, 0x6B] => "Track 2 Data",
        _ => "Unknown Tag",
    }
}
