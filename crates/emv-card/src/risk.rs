//! Terminal risk management: floor limit, random selection and velocity checking

use rand::Rng;

use crate::terminal::{RandomSelection, TerminalConfig};
use crate::tvr::{TerminalVerificationResults, TransactionStatusInformation, TsiFlag, TvrFlag};

/// One approved transaction kept by the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub pan: String,
    /// Amount, authorised in minor units
    pub amount: u64,
}

/// Terminal transaction log, oldest entry first
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    entries: Vec<LogEntry>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Most recent entry for `pan`
    pub fn latest_for(&self, pan: &str) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|e| e.pan == pan)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether the transaction, together with the card's most recent logged
/// transaction, reaches the floor limit
pub fn check_floor_limit(log: &TransactionLog, pan: &str, amount: u64, floor_limit: u64) -> bool {
    let total = match log.latest_for(pan) {
        Some(entry) => entry.amount.saturating_add(amount),
        None => amount,
    };
    total >= floor_limit
}

/// Outcome of velocity checking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VelocityFlags {
    pub lower_exceeded: bool,
    pub upper_exceeded: bool,
    pub new_card: bool,
}

/// Compare the offline transactions since the last online one with the
/// card's consecutive offline limits
///
/// # Arguments
/// * `atc` - Application Transaction Counter (9F36), if the card returned it
/// * `last_online_atc` - Last Online ATC Register (9F13), if the card returned it
/// * `lower` - Lower Consecutive Offline Limit (9F14)
/// * `upper` - Upper Consecutive Offline Limit (9F23)
pub fn check_velocity(atc: Option<u16>, last_online_atc: Option<u16>, lower: u8, upper: u8) -> VelocityFlags {
    let new_card = last_online_atc == Some(0);

    let (atc, last_online) = match (atc, last_online_atc) {
        (Some(atc), Some(last)) if atc > last => (atc, last),
        _ => {
            return VelocityFlags {
                lower_exceeded: true,
                upper_exceeded: true,
                new_card,
            }
        }
    };

    let diff = atc - last_online;
    let lower_exceeded = diff > u16::from(lower);
    VelocityFlags {
        lower_exceeded,
        upper_exceeded: lower_exceeded && diff > u16::from(upper),
        new_card,
    }
}

/// Random transaction selection
///
/// Below the threshold a transaction is selected with the target
/// percentage. Between threshold and floor limit the percentage rises
/// linearly towards the maximum. At or above the floor limit the floor
/// limit check already sends the transaction online.
pub fn select_randomly<R: Rng + ?Sized>(amount: u64, floor_limit: u64, params: &RandomSelection, rng: &mut R) -> bool {
    if amount >= floor_limit {
        return false;
    }

    let percentage = if amount < params.threshold {
        u64::from(params.target_percentage)
    } else {
        let span = floor_limit - params.threshold;
        let extra = u64::from(params.max_target_percentage.saturating_sub(params.target_percentage));
        u64::from(params.target_percentage) + extra * (amount - params.threshold) / span.max(1)
    };

    let draw: u64 = rng.gen_range(1..=99);
    draw <= percentage
}

/// Card counters and limits needed by risk management
#[derive(Debug, Clone, Default)]
pub struct RiskFacts<'a> {
    pub pan: &'a str,
    pub amount: u64,
    pub atc: Option<u16>,
    pub last_online_atc: Option<u16>,
    pub lower_limit: Option<u8>,
    pub upper_limit: Option<u8>,
}

/// Runs all terminal risk management checks and records them in the ledgers
#[derive(Debug)]
pub struct RiskManager<'a> {
    config: &'a TerminalConfig,
    log: &'a TransactionLog,
}

impl<'a> RiskManager<'a> {
    pub fn new(config: &'a TerminalConfig, log: &'a TransactionLog) -> Self {
        Self { config, log }
    }

    pub fn perform<R: Rng + ?Sized>(
        &self,
        facts: &RiskFacts<'_>,
        tvr: &mut TerminalVerificationResults,
        tsi: &mut TransactionStatusInformation,
        rng: &mut R,
    ) {
        if check_floor_limit(self.log, facts.pan, facts.amount, self.config.floor_limit) {
            tvr.set(TvrFlag::FloorLimitExceeded);
        } else if select_randomly(facts.amount, self.config.floor_limit, &self.config.random_selection, rng) {
            tvr.set(TvrFlag::SelectedRandomlyForOnline);
        }

        // Velocity checking only applies when the card carries both limits
        if let (Some(lower), Some(upper)) = (facts.lower_limit, facts.upper_limit) {
            let flags = check_velocity(facts.atc, facts.last_online_atc, lower, upper);
            tracing::debug!(?flags, "Velocity check");
            if flags.lower_exceeded {
                tvr.set(TvrFlag::LowerConsecutiveOfflineLimitExceeded);
            }
            if flags.upper_exceeded {
                tvr.set(TvrFlag::UpperConsecutiveOfflineLimitExceeded);
            }
            if flags.new_card {
                tvr.set(TvrFlag::NewCard);
            }
        }

        tsi.set(TsiFlag::TerminalRiskManagementPerformed);
    }
}
