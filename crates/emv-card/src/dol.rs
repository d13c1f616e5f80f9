//! Data Object Lists (PDOL 9F38, CDOL1 8C, CDOL2 8D, DDOL 9F49)
//!
//! A DOL is a list of tag/length pairs without values. The terminal answers
//! with the concatenated values, each fitted to the requested length.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DolError {
    #[error("malformed data object list at offset {0}")]
    Malformed(usize),

    #[error("data object list requests {0} bytes, more than one command can carry")]
    TooLong(usize),
}

/// One requested data object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DolEntry {
    pub tag: Vec<u8>,
    pub length: usize,
}

/// Parse the value of a DOL data element
pub fn parse(dol: &[u8]) -> Result<Vec<DolEntry>, DolError> {
    let mut entries = Vec::new();
    let mut i = 0;
    while i < dol.len() {
        let start = i;
        let mut tag_len = 1;
        if dol[i] & 0x1F == 0x1F {
            loop {
                let b = *dol.get(i + tag_len).ok_or(DolError::Malformed(start))?;
                tag_len += 1;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }
        let tag = dol[i..i + tag_len].to_vec();
        i += tag_len;

        let length = *dol.get(i).ok_or(DolError::Malformed(start))?;
        if length & 0x80 != 0 {
            return Err(DolError::Malformed(start));
        }
        i += 1;
        entries.push(DolEntry {
            tag,
            length: length as usize,
        });
    }
    Ok(entries)
}

/// Data elements with format `n`: right-justified, truncated from the left
const NUMERIC_TAGS: &[&[u8]] = &[
    &[0x9F, 0x02], // amount, authorised
    &[0x9F, 0x03], // amount, other
    &[0x9A],       // transaction date
    &[0x9C],       // transaction type
    &[0x5F, 0x2A], // transaction currency code
    &[0x5F, 0x36], // transaction currency exponent
    &[0x9F, 0x1A], // terminal country code
    &[0x9F, 0x21], // transaction time
    &[0x9F, 0x35], // terminal type
    &[0x9F, 0x41], // transaction sequence counter
];

fn is_numeric(tag: &[u8]) -> bool {
    NUMERIC_TAGS.iter().any(|t| *t == tag)
}

/// Terminal-side data dictionary used to answer DOLs
#[derive(Debug, Clone, Default)]
pub struct DolBuilder {
    values: HashMap<Vec<u8>, Vec<u8>>,
}

impl DolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a data element
    pub fn set(&mut self, tag: &[u8], value: impl Into<Vec<u8>>) -> &mut Self {
        self.values.insert(tag.to_vec(), value.into());
        self
    }

    pub fn get(&self, tag: &[u8]) -> Option<&[u8]> {
        self.values.get(tag).map(Vec::as_slice)
    }

    /// Concatenated values for `entries`
    ///
    /// Unknown tags are filled with zeros. Numeric elements are padded and
    /// truncated on the left, everything else on the right.
    pub fn build(&self, entries: &[DolEntry]) -> Result<Vec<u8>, DolError> {
        let total: usize = entries.iter().map(|e| e.length).sum();
        if total > 252 {
            return Err(DolError::TooLong(total));
        }

        let mut out = Vec::with_capacity(total);
        for entry in entries {
            let value = self.values.get(&entry.tag).map(Vec::as_slice).unwrap_or(&[]);
            let n = entry.length;
            if value.is_empty() {
                tracing::trace!(tag = %hex::encode_upper(&entry.tag), "DOL element unknown, zero filled");
                out.extend(std::iter::repeat(0u8).take(n));
            } else if is_numeric(&entry.tag) {
                if value.len() >= n {
                    out.extend_from_slice(&value[value.len() - n..]);
                } else {
                    out.extend(std::iter::repeat(0u8).take(n - value.len()));
                    out.extend_from_slice(value);
                }
            } else if value.len() >= n {
                out.extend_from_slice(&value[..n]);
            } else {
                out.extend_from_slice(value);
                out.extend(std::iter::repeat(0u8).take(n - value.len()));
            }
        }
        Ok(out)
    }

    /// Parse `dol` and build its data in one step
    pub fn build_from(&self, dol: &[u8]) -> Result<Vec<u8>, DolError> {
        self.build(&parse(dol)?)
    }
}
