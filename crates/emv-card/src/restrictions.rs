//! Processing restrictions: application version, usage control and dates

use chrono::NaiveDate;
use emv_common::bcd;

use crate::terminal::{TerminalConfig, TransactionParams, TransactionType};
use crate::tvr::{TerminalVerificationResults, TvrFlag};

/// Card data elements the restriction checks read
#[derive(Debug, Clone, Copy, Default)]
pub struct RestrictionData {
    /// Application Version Number (9F08)
    pub application_version: Option<[u8; 2]>,
    /// Application Usage Control (9F07)
    pub usage_control: Option<[u8; 2]>,
    /// Issuer Country Code (5F28)
    pub issuer_country: Option<[u8; 2]>,
    /// Application Effective Date (5F25), YYMMDD
    pub effective_date: Option<[u8; 3]>,
    /// Application Expiration Date (5F24), YYMMDD
    pub expiration_date: Option<[u8; 3]>,
}

/// Decode an EMV `YYMMDD` date; years below 50 are in the 2000s
pub fn parse_yymmdd(date: [u8; 3]) -> Option<NaiveDate> {
    let yy = bcd::n_to_u64(&date[..1])? as i32;
    let mm = bcd::n_to_u64(&date[1..2])? as u32;
    let dd = bcd::n_to_u64(&date[2..])? as u32;
    let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, mm, dd)
}

/// Flag differing application versions; absent on the card means no check
pub fn check_version(card: Option<[u8; 2]>, terminal: [u8; 2], tvr: &mut TerminalVerificationResults) {
    if let Some(card) = card {
        if card != terminal {
            tvr.set(TvrFlag::DifferentApplicationVersions);
        }
    }
}

/// Whether the Application Usage Control allows this transaction here
pub fn usage_allowed(
    auc: [u8; 2],
    is_atm: bool,
    domestic: Option<bool>,
    transaction_type: TransactionType,
) -> bool {
    let valid_here = if is_atm { auc[0] & 0x02 != 0 } else { auc[0] & 0x01 != 0 };
    if !valid_here {
        return false;
    }

    // Without an issuer country code only the terminal class is checked
    let Some(domestic) = domestic else {
        return true;
    };
    let (dom, intl) = match transaction_type {
        TransactionType::Cash => (auc[0] & 0x80, auc[0] & 0x40),
        TransactionType::Goods => (auc[0] & 0x20, auc[0] & 0x10),
        TransactionType::Services => (auc[0] & 0x08, auc[0] & 0x04),
        TransactionType::Cashback => {
            let goods = if domestic { auc[0] & 0x20 } else { auc[0] & 0x10 };
            let cashback = if domestic { auc[1] & 0x80 } else { auc[1] & 0x40 };
            return goods != 0 && cashback != 0;
        }
    };
    if domestic {
        dom != 0
    } else {
        intl != 0
    }
}

/// Flag dates outside the application's validity period
///
/// Dates that do not decode are treated as failing the check.
pub fn check_dates(
    effective: Option<[u8; 3]>,
    expiration: Option<[u8; 3]>,
    today: NaiveDate,
    tvr: &mut TerminalVerificationResults,
) {
    if let Some(effective) = effective {
        if parse_yymmdd(effective).map_or(true, |d| d > today) {
            tvr.set(TvrFlag::ApplicationNotYetEffective);
        }
    }
    if let Some(expiration) = expiration {
        if parse_yymmdd(expiration).map_or(true, |d| d < today) {
            tvr.set(TvrFlag::ExpiredApplication);
        }
    }
}

/// Run all processing restriction checks
pub fn check_processing_restrictions(
    data: &RestrictionData,
    config: &TerminalConfig,
    params: &TransactionParams,
    tvr: &mut TerminalVerificationResults,
) {
    check_version(data.application_version, config.application_version, tvr);

    if let Some(auc) = data.usage_control {
        let domestic = data.issuer_country.map(|c| c == config.terminal_country_code);
        if !usage_allowed(auc, config.is_atm(), domestic, params.transaction_type) {
            tracing::info!(auc = %hex::encode_upper(auc), "Service not allowed by application usage control");
            tvr.set(TvrFlag::ServiceNotAllowed);
        }
    }

    check_dates(data.effective_date, data.expiration_date, params.date, tvr);
}
