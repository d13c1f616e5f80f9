//! `transact`: one transaction against the card in the first PC/SC reader

use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use emv_ca_keys::TrustStore;
use emv_card::application::aids;
use emv_card::{CardReader, TerminalConfig, TransactionLog, TransactionParams};

use super::pin::ConsolePin;
use super::session::Terminal;
use super::TransactOptions;
use crate::formatters::FormatMode;

pub fn run(options: TransactOptions, mode: FormatMode) -> anyhow::Result<()> {
    let store = match &options.trust_store {
        Some(path) => TrustStore::load_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::warn!("No trust store given; offline data authentication will not be performed");
            TrustStore::new()
        }
    };

    let config = match &options.config {
        Some(path) => TerminalConfig::load_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => TerminalConfig::default(),
    };

    let candidates: Vec<(String, Vec<u8>)> = match &options.aid {
        Some(aid) => vec![(aid.to_uppercase(), hex::decode(aid).context("AID is not hex")?)],
        None => aids::CANDIDATES
            .iter()
            .map(|(name, aid)| (name.to_string(), aid.to_vec()))
            .collect(),
    };

    let reader = CardReader::new().context("establishing PC/SC context")?;
    let mut transport = reader.connect_first().context("connecting to card")?;
    println!("Reader: {}", transport.reader_name());

    let terminal = Terminal {
        config,
        trust_store: Arc::new(store),
        log: TransactionLog::new(),
    };
    let mut params = TransactionParams::new(options.amount, Local::now().date_naive());
    params.force_online = options.force_online;

    terminal.transact(&mut transport, &mut ConsolePin::stdin(), &params, &candidates, mode)?;
    Ok(())
}
