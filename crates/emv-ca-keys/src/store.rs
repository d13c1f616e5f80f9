//! Immutable CA public key store

use std::collections::BTreeMap;
use std::path::Path;

use crate::anchor::{self, CaKeyRecord, CaRecord};
use crate::error::{DuplicateKeyError, LoadError};
use crate::key::{CaPublicKey, Rid};

/// CA public keys grouped by RID and key index
///
/// Every key in the store passed its checksum check on the way in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustStore {
    authorities: BTreeMap<Rid, BTreeMap<u8, CaPublicKey>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a trust-anchor document
    ///
    /// The load is all-or-nothing: one malformed, duplicated or
    /// checksum-failing key rejects the whole document.
    pub fn load(source: &str) -> Result<Self, LoadError> {
        let records = anchor::parse_document(source)?;
        let mut store = Self::new();

        for record in &records {
            let rid = anchor::parse_rid(&record.rid)?;
            for key_record in &record.keys {
                let key = key_record.to_key(rid)?;
                store.insert_if_absent(key)?;
            }
        }

        tracing::info!(
            authorities = store.authorities.len(),
            keys = store.len(),
            "Loaded CA trust anchors"
        );
        Ok(store)
    }

    /// Read and parse a trust-anchor document from disk
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::load(&source)
    }

    /// Add a verified key unless its (RID, index) slot is taken
    pub fn insert_if_absent(&mut self, key: CaPublicKey) -> Result<(), DuplicateKeyError> {
        let slot = self.authorities.entry(*key.rid()).or_default();
        if slot.contains_key(&key.index()) {
            return Err(DuplicateKeyError {
                rid: hex::encode_upper(key.rid()),
                index: key.index(),
            });
        }
        slot.insert(key.index(), key);
        Ok(())
    }

    /// Get CA public key by RID and index
    ///
    /// # Arguments
    /// * `rid` - Registered Application Provider Identifier (5 bytes, or a full AID)
    /// * `index` - CA Public Key Index (tag 8F)
    pub fn lookup(&self, rid: &[u8], index: u8) -> Option<&CaPublicKey> {
        let rid: Rid = rid.get(..5)?.try_into().ok()?;
        self.authorities.get(&rid)?.get(&index)
    }

    /// All keys published for a given RID, in index order
    pub fn keys_for_rid<'a>(&'a self, rid: &[u8]) -> impl Iterator<Item = &'a CaPublicKey> + 'a {
        let rid: Option<Rid> = rid.get(..5).and_then(|r| r.try_into().ok());
        rid.and_then(|rid| self.authorities.get(&rid))
            .into_iter()
            .flat_map(|keys| keys.values())
    }

    /// Iterate over every key, ordered by RID then index
    pub fn iter(&self) -> impl Iterator<Item = &CaPublicKey> {
        self.authorities.values().flat_map(|keys| keys.values())
    }

    pub fn len(&self) -> usize {
        self.authorities.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the store as a trust-anchor document
    pub fn to_anchor_json(&self) -> Result<String, serde_json::Error> {
        let records: Vec<CaRecord> = self
            .authorities
            .iter()
            .map(|(rid, keys)| CaRecord {
                rid: hex::encode_upper(rid),
                keys: keys.values().map(CaKeyRecord::from_key).collect(),
            })
            .collect();
        anchor::render_document(&records)
    }
}
