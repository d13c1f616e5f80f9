//! Offline PIN blocks for VERIFY

use std::fmt;

use rand::RngCore;
use rsa::BigUint;

use super::certificate::RecoveredPublicKey;
use super::recover::fit;

/// A PIN of 4 to 12 decimal digits
///
/// `Debug` does not print the digits.
#[derive(Clone, PartialEq, Eq)]
pub struct PinDigits(String);

impl PinDigits {
    pub fn new(digits: impl Into<String>) -> Option<Self> {
        let digits = digits.into();
        if (4..=12).contains(&digits.len()) && digits.bytes().all(|c| c.is_ascii_digit()) {
            Some(Self(digits))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PinDigits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinDigits({} digits)", self.0.len())
    }
}

/// Plaintext offline PIN block: `2N PP PP .. FF`
///
/// Control nibble 2, length nibble, the PIN digits, then `F` filler up to 8 bytes.
pub fn plaintext_pin_block(pin: &PinDigits) -> [u8; 8] {
    let mut nibbles = Vec::with_capacity(16);
    nibbles.push(0x2);
    nibbles.push(pin.0.len() as u8);
    nibbles.extend(pin.0.bytes().map(|c| c - b'0'));
    nibbles.resize(16, 0xF);

    let mut block = [0u8; 8];
    for (slot, pair) in block.iter_mut().zip(nibbles.chunks(2)) {
        *slot = (pair[0] << 4) | pair[1];
    }
    block
}

/// Enciphered offline PIN for VERIFY with P2 = 88
///
/// Encrypts `7F ‖ PIN block ‖ ICC unpredictable number ‖ random padding`
/// with the ICC PIN encipherment key (or the ICC key when the card has no
/// separate one). `challenge` is the 8 bytes returned by GET CHALLENGE.
pub fn encipher_pin_block<R: RngCore + ?Sized>(
    pin: &PinDigits,
    challenge: &[u8],
    key: &RecoveredPublicKey,
    rng: &mut R,
) -> Option<Vec<u8>> {
    let n_len = key.modulus.len();
    if challenge.len() != 8 || n_len < 17 {
        return None;
    }

    let mut block = Vec::with_capacity(n_len);
    block.push(0x7F);
    block.extend_from_slice(&plaintext_pin_block(pin));
    block.extend_from_slice(challenge);
    let mut padding = vec![0u8; n_len - block.len()];
    rng.fill_bytes(&mut padding);
    block.extend_from_slice(&padding);

    let n = BigUint::from_bytes_be(&key.modulus);
    let m = BigUint::from_bytes_be(&block);
    if m >= n {
        return None;
    }
    let c = m.modpow(&BigUint::from_bytes_be(&key.exponent), &n);
    Some(fit(&c.to_bytes_be(), n_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_digits() {
        assert!(PinDigits::new("1234").is_some());
        assert!(PinDigits::new("123456789012").is_some());
        assert!(PinDigits::new("123").is_none());
        assert!(PinDigits::new("12a4").is_none());
        assert_eq!(format!("{:?}", PinDigits::new("1234").unwrap()), "PinDigits(4 digits)");
    }

    #[test]
    fn test_plaintext_block() {
        let pin = PinDigits::new("1234").unwrap();
        assert_eq!(plaintext_pin_block(&pin), [0x24, 0x12, 0x34, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let pin = PinDigits::new("12345").unwrap();
        assert_eq!(plaintext_pin_block(&pin), [0x25, 0x12, 0x34, 0x5F, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encipher_rejects_bad_challenge() {
        let key = RecoveredPublicKey {
            identifier: String::new(),
            expiration: [0x12, 0x49],
            serial_number: [0; 3],
            hash_algorithm_indicator: 1,
            public_key_algorithm_indicator: 1,
            modulus: vec![0xFF; 64],
            exponent: vec![0x03],
        };
        let pin = PinDigits::new("1234").unwrap();
        let mut rng = rand::thread_rng();
        assert!(encipher_pin_block(&pin, &[0; 4], &key, &mut rng).is_none());
        assert_eq!(encipher_pin_block(&pin, &[0; 8], &key, &mut rng).map(|c| c.len()), Some(64));
    }
}
