//! Packed BCD helpers for `n` and `cn` formatted data elements

/// Decode compressed-numeric (`cn`) digits, stopping at the first `F` nibble
///
/// Returns `None` if a nibble other than `F` is outside `0..=9`.
pub fn cn_digits(data: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(data.len() * 2);
    for nibble in data.iter().flat_map(|b| [b >> 4, b & 0x0F]) {
        match nibble {
            0x0..=0x9 => out.push(char::from(b'0' + nibble)),
            0xF => return Some(out),
            _ => return None,
        }
    }
    Some(out)
}

/// Decode numeric (`n`) BCD into an integer, e.g. `[0x00, 0x01, 0x50]` -> 150
pub fn n_to_u64(data: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    for b in data {
        let (hi, lo) = (u64::from(b >> 4), u64::from(b & 0x0F));
        if hi > 9 || lo > 9 {
            return None;
        }
        value = value.checked_mul(100)?.checked_add(hi * 10 + lo)?;
    }
    Some(value)
}

/// Encode an integer as right-justified numeric BCD of `len` bytes
///
/// Digits that do not fit are dropped from the left.
pub fn u64_to_n(mut value: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for slot in out.iter_mut().rev() {
        let lo = (value % 10) as u8;
        value /= 10;
        let hi = (value % 10) as u8;
        value /= 10;
        *slot = (hi << 4) | lo;
    }
    out
}

/// Encode ASCII digits as compressed numeric, padded with `F` to `len` bytes
pub fn digits_to_cn(digits: &str, len: usize) -> Option<Vec<u8>> {
    if digits.len() > len * 2 || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut nibbles: Vec<u8> = digits.bytes().map(|c| c - b'0').collect();
    nibbles.resize(len * 2, 0x0F);
    Some(nibbles.chunks(2).map(|p| (p[0] << 4) | p[1]).collect())
}
