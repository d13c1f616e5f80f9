//! Field formatters for human-readable output
#![cfg_attr(not(feature = "pcsc"), allow(dead_code))]

use clap::ValueEnum;
use emv_card::{CryptogramResponse, TerminalVerificationResults, TransactionStatusInformation};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

/// Format a data element value based on its tag
pub fn format_value(tag: &[u8], value: &[u8], mode: FormatMode) -> String {
    if mode == FormatMode::Raw {
        return hex::encode_upper(value);
    }

    match tag {
        // Application Label, Application Preferred Name
        [0x50] | [0x9F, 0x12] => String::from_utf8(value.to_vec()).unwrap_or_else(|_| hex::encode_upper(value)),

        [0x5A] => mask_pan(hex::encode_upper(value).trim_end_matches('F')),

        // Cardholder Name
        [0x5F, 0x20] => String::from_utf8(value.to_vec())
            .unwrap_or_else(|_| hex::encode_upper(value))
            .trim()
            .to_string(),

        [0x5F, 0x24] | [0x5F, 0x25] => format_date(value),

        // Issuer Country Code
        [0x5F, 0x28] => match numeric_code(value) {
            Some(code) => match country_name(code) {
                Some(country) => format!("{} ({})", code, country),
                None => code.to_string(),
            },
            None => hex::encode_upper(value),
        },

        // Currency codes
        [0x5F, 0x2A] | [0x9F, 0x42] => match numeric_code(value) {
            Some(code) => currency_name(code)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Currency Code {}", code)),
            None => hex::encode_upper(value),
        },

        [0x8F] | [0x5F, 0x34] | [0x9F, 0x17] if value.len() == 1 => format!("{:02X} (decimal: {})", value[0], value[0]),

        // Exponents
        [0x9F, 0x32] | [0x9F, 0x47] | [0x9F, 0x2E] if value.len() <= 3 => {
            let exponent = value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            format!("{} (0x{})", exponent, hex::encode_upper(value))
        }

        // Certificates, remainders and signatures
        [0x90] | [0x92] | [0x93] | [0x9F, 0x46] | [0x9F, 0x48] | [0x9F, 0x2D] | [0x9F, 0x4B] if value.len() > 32 => {
            format!("{} ... ({} bytes total)", hex::encode_upper(&value[..32]), value.len())
        }

        // Track 2 equivalent data; the PAN in front of the separator is masked
        [0x57] | [0x9F, 0x6B] => {
            let track = hex::encode_upper(value);
            match track.split_once('D') {
                Some((pan, rest)) => format!("{} | {}", mask_pan(pan), rest.trim_end_matches('F')),
                None => track,
            }
        }

        _ => hex::encode_upper(value),
    }
}

/// Keep the first six and last four digits
pub fn mask_pan(pan: &str) -> String {
    if pan.len() <= 10 {
        return pan.to_string();
    }
    let hidden = pan.len() - 10;
    format!("{}{}{}", &pan[..6], "*".repeat(hidden), &pan[pan.len() - 4..])
}

/// `YYMMDD` in BCD
fn format_date(value: &[u8]) -> String {
    match value {
        [yy, mm, dd] => format!("20{:02X}-{:02X}-{:02X}", yy, mm, dd),
        _ => hex::encode_upper(value),
    }
}

/// ISO numeric codes are BCD, three digits right-aligned in two bytes
fn numeric_code(value: &[u8]) -> Option<u16> {
    let digits = hex::encode(value);
    if value.len() != 2 || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn print_tvr(tvr: &TerminalVerificationResults, mode: FormatMode) {
    println!("TVR: {}", tvr);
    if mode == FormatMode::Human {
        for flag in tvr.flags() {
            println!("  - {}", flag.description());
        }
    }
}

pub fn print_tsi(tsi: &TransactionStatusInformation, mode: FormatMode) {
    println!("TSI: {}", tsi);
    if mode == FormatMode::Human {
        for flag in tsi.flags() {
            println!("  - {}", flag.description());
        }
    }
}

/// CVM Results (9F34): performed CVM, condition, result
pub fn format_cvm_results(results: [u8; 3], mode: FormatMode) -> String {
    let raw = hex::encode_upper(results);
    if mode == FormatMode::Raw {
        return raw;
    }
    let outcome = match results[2] {
        0x00 => "unknown",
        0x01 => "failed",
        0x02 => "successful",
        _ => "RFU",
    };
    let method = match results[0] & 0x3F {
        0x00 => "fail CVM processing",
        0x01 => "plaintext PIN verified by ICC",
        0x02 => "enciphered PIN verified online",
        0x03 => "plaintext PIN verified by ICC and signature",
        0x04 => "enciphered PIN verified by ICC",
        0x05 => "enciphered PIN verified by ICC and signature",
        0x1E => "signature",
        0x1F => "no CVM required",
        0x3F => "no CVM performed",
        _ => "other",
    };
    format!("{} ({}, {})", raw, method, outcome)
}

pub fn print_cryptogram(response: &CryptogramResponse, mode: FormatMode) {
    match (mode, response.cryptogram_type()) {
        (FormatMode::Human, Some(kind)) => println!("Cryptogram: {:?} (CID {:02X})", kind, response.cid),
        _ => println!("CID: {:02X}", response.cid),
    }
    println!("ATC: {:04X}", response.atc);
    println!("Application Cryptogram: {}", hex::encode_upper(&response.cryptogram));
    if let Some(iad) = &response.issuer_application_data {
        println!("Issuer Application Data: {}", hex::encode_upper(iad));
    }
}

/// ISO 3166-1 numeric country codes (subset)
fn country_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("Canada"),
        840 => Some("United States"),
        826 => Some("United Kingdom"),
        276 => Some("Germany"),
        250 => Some("France"),
        380 => Some("Italy"),
        724 => Some("Spain"),
        528 => Some("Netherlands"),
        156 => Some("China"),
        392 => Some("Japan"),
        _ => None,
    }
}

/// ISO 4217 numeric currency codes (subset)
fn currency_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("CAD (Canadian Dollar)"),
        840 => Some("USD (US Dollar)"),
        978 => Some("EUR (Euro)"),
        826 => Some("GBP (Pound Sterling)"),
        392 => Some("JPY (Japanese Yen)"),
        156 => Some("CNY (Chinese Yuan)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_pan() {
        assert_eq!(mask_pan("4761739001010010"), "476173******0010");
        assert_eq!(mask_pan("1234567890"), "1234567890");
    }

    #[test]
    fn test_track2_pan_is_masked() {
        let track = hex::decode("4761739001010010D49122010000000000000F").unwrap();
        assert_eq!(
            format_value(&[0x57], &track, FormatMode::Human),
            "476173******0010 | 49122010000000000000"
        );
    }

    #[test]
    fn test_country_and_currency() {
        assert_eq!(format_value(&[0x5F, 0x28], &[0x08, 0x26], FormatMode::Human), "826 (United Kingdom)");
        assert_eq!(format_value(&[0x9F, 0x42], &[0x09, 0x78], FormatMode::Human), "EUR (Euro)");
        assert_eq!(format_value(&[0x9F, 0x42], &[0x09, 0x78], FormatMode::Raw), "0978");
    }

    #[test]
    fn test_cvm_results() {
        assert_eq!(
            format_cvm_results([0x01, 0x00, 0x02], FormatMode::Human),
            "010002 (plaintext PIN verified by ICC, successful)"
        );
        assert_eq!(format_cvm_results([0x1E, 0x00, 0x00], FormatMode::Raw), "1E0000");
    }
}
