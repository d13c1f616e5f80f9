pub mod keys;
#[cfg_attr(not(feature = "pcsc"), allow(dead_code))]
pub mod pin;
#[cfg_attr(not(feature = "pcsc"), allow(dead_code))]
pub mod session;
#[cfg(feature = "pcsc")]
mod transact;

use std::path::PathBuf;

use emv_common::{get_tag_name, TlvIter};

use crate::formatters::{self, FormatMode};

/// Command-line choices for `transact`
#[cfg_attr(not(feature = "pcsc"), allow(dead_code))]
pub struct TransactOptions {
    pub trust_store: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub amount: u64,
    pub aid: Option<String>,
    pub force_online: bool,
}

#[cfg(feature = "pcsc")]
pub fn cmd_transact(options: TransactOptions, mode: FormatMode) -> anyhow::Result<()> {
    transact::run(options, mode)
}

#[cfg(not(feature = "pcsc"))]
pub fn cmd_transact(_options: TransactOptions, _mode: FormatMode) -> anyhow::Result<()> {
    anyhow::bail!("this build has no card reader support; rebuild with `--features pcsc`")
}

/// Display every data element of a record body
#[cfg_attr(not(feature = "pcsc"), allow(dead_code))]
pub(crate) fn display_tags(data: &[u8], mode: FormatMode) {
    for tlv in TlvIter::new(data) {
        println!(
            "  [{}] {}: {}",
            hex::encode_upper(tlv.tag),
            get_tag_name(tlv.tag),
            formatters::format_value(tlv.tag, tlv.value, mode)
        );
    }
}
