//! Application File Locator (94) and the records it references

use std::collections::BTreeMap;

use crate::error::{DuplicateRecordError, SmartCardError};

/// One 4-byte AFL entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AflEntry {
    /// Short File Identifier, 1..=30
    pub sfi: u8,
    pub first_record: u8,
    pub last_record: u8,
    /// Number of records, starting at `first_record`, involved in offline data authentication
    pub oda_records: u8,
}

impl AflEntry {
    /// Record numbers covered by this entry
    pub fn records(&self) -> impl Iterator<Item = u8> {
        self.first_record..=self.last_record
    }

    /// Record numbers that feed offline data authentication
    pub fn oda_record_numbers(&self) -> impl Iterator<Item = u8> {
        self.records().take(usize::from(self.oda_records))
    }
}

/// Parse the value of tag 94
///
/// Byte 1: SFI in the upper 5 bits, byte 2: first record, byte 3: last
/// record, byte 4: number of records involved in offline data authentication.
pub fn parse_afl(afl: &[u8]) -> Result<Vec<AflEntry>, SmartCardError> {
    if afl.is_empty() || afl.len() % 4 != 0 {
        return Err(SmartCardError::InvalidAfl(format!(
            "length {} is not a positive multiple of 4",
            afl.len()
        )));
    }

    afl.chunks_exact(4)
        .map(|chunk| {
            let entry = AflEntry {
                sfi: chunk[0] >> 3,
                first_record: chunk[1],
                last_record: chunk[2],
                oda_records: chunk[3],
            };
            if entry.sfi == 0 || entry.sfi > 30 {
                return Err(SmartCardError::InvalidAfl(format!("SFI {} out of range", entry.sfi)));
            }
            if entry.first_record == 0 || entry.last_record < entry.first_record {
                return Err(SmartCardError::InvalidAfl(format!(
                    "record range {}..={} of SFI {}",
                    entry.first_record, entry.last_record, entry.sfi
                )));
            }
            let count = entry.last_record - entry.first_record + 1;
            if entry.oda_records > count {
                return Err(SmartCardError::InvalidAfl(format!(
                    "{} authentication records exceed range of {} in SFI {}",
                    entry.oda_records, count, entry.sfi
                )));
            }
            Ok(entry)
        })
        .collect()
}

/// Raw record responses keyed by (SFI, record number)
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<(u8, u8), Vec<u8>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record; a record number that was already read is an error
    pub fn insert_if_absent(&mut self, sfi: u8, record: u8, data: Vec<u8>) -> Result<(), DuplicateRecordError> {
        use std::collections::btree_map::Entry;
        match self.records.entry((sfi, record)) {
            Entry::Occupied(_) => Err(DuplicateRecordError { sfi, record }),
            Entry::Vacant(slot) => {
                slot.insert(data);
                Ok(())
            }
        }
    }

    pub fn get(&self, sfi: u8, record: u8) -> Option<&[u8]> {
        self.records.get(&(sfi, record)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((u8, u8), &[u8])> {
        self.records.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}
