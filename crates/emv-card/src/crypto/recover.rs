//! RSA public-key recovery of signed EMV data

use rsa::BigUint;

/// Recover the plaintext block of `signed` with the public key (`exponent`, `modulus`)
///
/// Computes `signed ^ exponent mod modulus`. All operands are read as
/// unsigned big-endian integers. The result is left-padded with zeros, or
/// cut to its rightmost bytes, so it is exactly as long as `signed`.
///
/// A zero modulus has no meaning as a key; the result is then all zeros,
/// which every caller rejects on the header byte.
pub fn recover(signed: &[u8], exponent: &[u8], modulus: &[u8]) -> Vec<u8> {
    let n = BigUint::from_bytes_be(modulus);
    if n == BigUint::from(0u8) {
        return vec![0; signed.len()];
    }

    let c = BigUint::from_bytes_be(signed);
    let e = BigUint::from_bytes_be(exponent);
    let m = c.modpow(&e, &n).to_bytes_be();

    fit(&m, signed.len())
}

/// Big-endian `value` as exactly `len` bytes
pub(crate) fn fit(value: &[u8], len: usize) -> Vec<u8> {
    if value.len() >= len {
        value[value.len() - len..].to_vec()
    } else {
        let mut out = vec![0u8; len - value.len()];
        out.extend_from_slice(value);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_modulus() {
        // 4^3 mod 0xFB = 64
        assert_eq!(recover(&[0x04], &[0x03], &[0xFB]), vec![0x40]);
        // 0x90^3 mod 0xFB: operand with the top bit set stays positive
        let expected = (0x90u32.pow(3) % 0xFB) as u8;
        assert_eq!(recover(&[0x90], &[0x03], &[0xFB]), vec![expected]);
    }

    #[test]
    fn test_left_padding() {
        assert_eq!(recover(&[0x00, 0x02], &[0x03], &[0x00, 0xFB]), vec![0x00, 0x08]);
    }

    #[test]
    fn test_zero_modulus() {
        assert_eq!(recover(&[0x12, 0x34], &[0x03], &[0x00, 0x00]), vec![0x00, 0x00]);
    }

    #[test]
    fn test_fit_truncates_left() {
        assert_eq!(fit(&[0x00, 0x01, 0x02], 2), vec![0x01, 0x02]);
    }
}
