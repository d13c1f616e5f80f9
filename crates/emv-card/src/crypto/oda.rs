//! Input to offline data authentication, assembled from AFL records

use emv_common::{tags, TlvIter};

use crate::afl::{AflEntry, RecordStore};
use crate::error::SmartCardError;

/// Concatenate the records flagged for offline data authentication
///
/// For every AFL entry, its first `oda_records` records are appended in AFL
/// order. Records from SFI 1 to 10 contribute the value of their `70`
/// template, records from SFI 11 to 30 contribute their full bytes. A
/// present Static Data Authentication Tag List must be exactly `82`; the
/// AIP value is then appended.
///
/// The same bytes are hashed by the ICC and PIN encipherment certificates
/// and by the signed static application data.
pub fn build_auth_input(
    afl: &[AflEntry],
    records: &RecordStore,
    sda_tag_list: Option<&[u8]>,
    aip: &[u8],
) -> Result<Vec<u8>, SmartCardError> {
    let mut input = Vec::new();

    for entry in afl {
        for record in entry.oda_record_numbers() {
            let raw = records
                .get(entry.sfi, record)
                .ok_or(SmartCardError::RecordMissing { sfi: entry.sfi, record })?;

            if entry.sfi <= 10 {
                let value = match TlvIter::new(raw).next() {
                    Some(tlv) if tlv.tag == tags::RECORD_TEMPLATE.bytes() => tlv.value,
                    _ => return Err(SmartCardError::RecordNotTemplate { sfi: entry.sfi, record }),
                };
                input.extend_from_slice(value);
            } else {
                input.extend_from_slice(raw);
            }
        }
    }

    if let Some(tag_list) = sda_tag_list {
        if tag_list != tags::AIP.bytes() {
            return Err(SmartCardError::InvalidSdaTagList(hex::encode_upper(tag_list)));
        }
        input.extend_from_slice(aip);
    }

    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::afl::parse_afl;

    fn store() -> RecordStore {
        let mut store = RecordStore::new();
        store.insert_if_absent(1, 1, vec![0x70, 0x03, 0x5A, 0x01, 0x11]).unwrap();
        store.insert_if_absent(1, 2, vec![0x70, 0x03, 0x5F, 0x24, 0x00]).unwrap();
        store.insert_if_absent(11, 1, vec![0x70, 0x02, 0x8E, 0x00]).unwrap();
        store
    }

    #[test]
    fn test_short_and_long_sfi() {
        // SFI 1 records 1-2 with one ODA record, SFI 11 record 1 with one
        let afl = parse_afl(&[0x08, 0x01, 0x02, 0x01, 0x58, 0x01, 0x01, 0x01]).unwrap();
        let input = build_auth_input(&afl, &store(), None, &[0x5C, 0x00]).unwrap();
        assert_eq!(input, vec![0x5A, 0x01, 0x11, 0x70, 0x02, 0x8E, 0x00]);
    }

    #[test]
    fn test_appends_aip() {
        let afl = parse_afl(&[0x08, 0x01, 0x01, 0x01]).unwrap();
        let input = build_auth_input(&afl, &store(), Some(&[0x82]), &[0x5C, 0x00]).unwrap();
        assert_eq!(input, vec![0x5A, 0x01, 0x11, 0x5C, 0x00]);
    }

    #[test]
    fn test_rejects_other_tag_lists() {
        let afl = parse_afl(&[0x08, 0x01, 0x01, 0x01]).unwrap();
        assert_eq!(
            build_auth_input(&afl, &store(), Some(&[0x82, 0x5A]), &[0x5C, 0x00]),
            Err(SmartCardError::InvalidSdaTagList("825A".to_string()))
        );
        assert!(build_auth_input(&afl, &store(), Some(&[]), &[0x5C, 0x00]).is_err());
    }

    #[test]
    fn test_short_sfi_needs_template() {
        let mut records = RecordStore::new();
        records.insert_if_absent(2, 1, vec![0x5A, 0x01, 0x11]).unwrap();
        let afl = parse_afl(&[0x10, 0x01, 0x01, 0x01]).unwrap();
        assert_eq!(
            build_auth_input(&afl, &records, None, &[]),
            Err(SmartCardError::RecordNotTemplate { sfi: 2, record: 1 })
        );
    }

    #[test]
    fn test_missing_record() {
        let afl = parse_afl(&[0x18, 0x01, 0x01, 0x01]).unwrap();
        assert_eq!(
            build_auth_input(&afl, &store(), None, &[]),
            Err(SmartCardError::RecordMissing { sfi: 3, record: 1 })
        );
    }
}
