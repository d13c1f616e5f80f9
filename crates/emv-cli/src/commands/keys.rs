//! `keys`: load a trust-anchor file and list what it holds

use std::path::Path;

use anyhow::Context;
use chrono::Local;
use emv_ca_keys::anchor::parse_rid;
use emv_ca_keys::{CaPublicKey, TrustStore};

use crate::formatters::FormatMode;

pub fn cmd_keys(path: &Path, rid: Option<&str>, mode: FormatMode) -> anyhow::Result<()> {
    // One bad entry rejects the whole file
    let store = TrustStore::load_file(path).with_context(|| format!("loading {}", path.display()))?;
    tracing::info!(keys = store.len(), path = %path.display(), "Trust store loaded");

    let keys: Vec<&CaPublicKey> = match rid {
        Some(rid) => {
            let rid = parse_rid(rid)?;
            store.keys_for_rid(&rid).collect()
        }
        None => store.iter().collect(),
    };

    if keys.is_empty() {
        println!("No CA public keys");
        return Ok(());
    }

    let today = Local::now().date_naive();
    for key in keys {
        print_key(key, today, mode);
    }
    Ok(())
}

fn print_key(key: &CaPublicKey, today: chrono::NaiveDate, mode: FormatMode) {
    let status = if key.is_expired(today) { "EXPIRED" } else { "valid" };
    match mode {
        FormatMode::Raw => println!(
            "{} {:02X} {} {} {} {}",
            hex::encode_upper(key.rid()),
            key.index(),
            key.expiration_date().format("%Y-%m-%d"),
            hex::encode_upper(key.modulus()),
            hex::encode_upper(key.exponent()),
            hex::encode_upper(key.checksum()),
        ),
        FormatMode::Human => {
            println!("RID {} index {:02X}", hex::encode_upper(key.rid()), key.index());
            if !key.description().is_empty() {
                println!("  Description: {}", key.description());
            }
            println!("  Modulus: {} bits", key.modulus_len() * 8);
            println!("  Exponent: {}", hex::encode_upper(key.exponent()));
            println!("  Expires: {} ({})", key.expiration_date().format("%d %b %Y"), status);
            println!("  Checksum: {}", hex::encode_upper(key.checksum()));
        }
    }
}
