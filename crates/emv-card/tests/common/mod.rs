//! Test card issued under a test CA: key material, certificate signing and
//! a scripted ICC that answers the commands a terminal sends

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use emv_ca_keys::TrustStore;
use emv_card::crypto::{plaintext_pin_block, recover};
use emv_card::{ApduCommand, ApduResponse, CardTransport, PinDigits, PinEntry, TransportError};
use rsa::BigUint;
use sha1::{Digest, Sha1};

pub const CA_MODULUS: &str = concat!(
    "A96F50ADC46B11FF7754F0B96FE7FBFCCDA75226E25417D2C79B3E0FE3FC2178",
    "18DDECCBB484B2424E1B03C15642A78361A26CCF3AF77529A41050AE4CD09B56",
    "C619AF8583EA05440038D10527E72D6FE355F7E85DF7178F5EF9059AD641DAC4",
    "9A81548A2F7CC96A4AC77977224FF8ACFB98E25CC2245578D358886AFE0349BC",
    "F331BCF5231A0A7D69395BB57EC3ADED",
);

pub const CA_PRIVATE_EXPONENT: &str = concat!(
    "70F4E073D8476154FA38A07B9FEFFD5333C4E16F418D65372FBCD40A97FD6BA5",
    "65E94887CDADCC2C34120280E42C6FACEBC19DDF7CA4F8C66D6035C9888B1239",
    "D9667503AD46AE2C3F63CF0A4145028B67227A86DD6CD0EE9CCB1847BEC1590E",
    "7DEB0FFD4E3E968CB2E729899978EE0804A50141CB6E7D3644541EF78C27D063",
    "67BB45CC2381F30DEE0ACBBC5E432793",
);

pub const ISSUER_MODULUS: &str = concat!(
    "BBDD7EDC2B0DC8C7851C691759BD13B898D0FB63FDEC94E3259D6397434048B2",
    "FC661238C77B37B6CDE468BB70927A5AE5F06BDB3A3E2361516FE4781F664B34",
    "6C3C4C8BF4851A6096F452ADA897FEA099FCEAC1E48D303B2454DB396CF10734",
    "8C74C7F209C5FF638D24693C8D2EF36F87147606878C8C15C08517BE93F7FC61",
);

pub const ISSUER_PRIVATE_EXPONENT: &str = concat!(
    "7D3E5492C75E85DA58BD9B64E67E0D25BB35FCED53F30DECC3BE4264D7803077",
    "52EEB6D084FCCFCF33ED9B27A061A6E743F59D3CD17EC240E0F542FABF998777",
    "236351D947F5AC7D56B7A3A79F0450644C85F5E292406CC6C502344240E7FF3C",
    "78383E7212A92B8C4BB8CBC073CDCFA448FAA446221E5EF88BEEB9FF774CEA83",
);

pub const ICC_MODULUS: &str = concat!(
    "AA24C8B8CB91B1CC38FAB20C5E9C25879F780B26FB43113E2AD61C1F9B71C0C7",
    "1A05CAAB7817983E4DB6C69E173E244F68AEB44BC774FE90E15B4BD87A27431D",
    "7A2FFB899379676ABA5ABCE9B842C256686699EBD093FBC66A7BF475C8974E43",
);

pub const ICC_PRIVATE_EXPONENT: &str = concat!(
    "716DDB25DD0BCBDD7B51CC083F12C3AFBFA55CC4A7820B7EC7396815124BD5DA",
    "115931C7A56510298924846964D41833D9FAA15CC3A0F054C070EB0B68324120",
    "17588845E0782CAF1B0B40AFC754F1B9737F3C66D546260FEDC7D13E44B6AE7B",
);

pub const PIN_MODULUS: &str = concat!(
    "BA1A62A410A87344DC591DBD42AAF83A083B379E50B05EBA47FD5588A9CC534F",
    "D3AD05F60E4FF4E4FC1A46CE19CD93648A1CBB7DCC1C9765CB4204F14035441D",
    "1C3827C84C1504B2DEF7E469712D7E5D",
);

pub const PIN_PRIVATE_EXPONENT: &str = concat!(
    "7C1197180B1AF7833D90BE7E2C71FAD15AD2251435CAE9D185538E5B1BDD8CDF",
    "E273594EB4354DECD90792F1780A8917430B2AC4A300ACB1E4E32E9C59D9BA47",
    "E0F1AA1BA560DD78E67FF8DCD034926B",
);

pub const ISSUER_CERTIFICATE: &str = concat!(
    "4559F3514D8CE24B889120D44AE0ABB55CBF0A11AE26B4F4B90BA9940978CF9E",
    "646EF26EB1E22742BA72075D2E312DDDD087B9629AC5F55FD4B13DA47AEF6F64",
    "6B700C06EC481BA8B0825144A24D38F15BEAE59C371B1505BA93FDBE01E4CAE6",
    "A11D0A0BBE7F95A1778E43B2BB809C21DD3C3EB3AE11B14DA497791B0161D926",
    "1B192651E1BE044FA3262EA660F9D9C3",
);

pub const ISSUER_REMAINDER: &str = concat!(
    "8D2EF36F87147606878C8C15C08517BE93F7FC61",
);

pub const CA_CHECKSUM: &str = "DB48B0E83759211B500035EB5C3B55A1EB6707E9";

pub const RID: &str = "A000000999";
pub const AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x09, 0x99, 0x10, 0x10];
pub const CA_INDEX: u8 = 0x92;
pub const PAN: &str = "4761739001010010";
pub const PIN: &str = "1234";

pub fn bytes(hex: &str) -> Vec<u8> {
    hex::decode(hex).expect("fixture hex")
}

/// Trust anchor document with the test CA key under `index`
pub fn anchor_document(index: u8) -> String {
    format!(
        r#"[{{"rid":"{RID}","keys":[{{"index":{index},"description":"Test CA","expirationDate":"31 Dec 2049","exponent":"03","modulus":"{CA_MODULUS}","hashAlgorithmIndicator":1,"publicKeyAlgorithmIndicator":1,"hash":"{CA_CHECKSUM}"}}]}}]"#
    )
}

pub fn trust_store() -> Arc<TrustStore> {
    Arc::new(TrustStore::load(&anchor_document(CA_INDEX)).expect("test anchors load"))
}

/// Raw RSA with a private exponent, left padded to the modulus length
pub fn sign(plain: &[u8], private_exponent: &str, modulus: &str) -> Vec<u8> {
    let n = bytes(modulus);
    let c = BigUint::from_bytes_be(plain).modpow(
        &BigUint::from_bytes_be(&bytes(private_exponent)),
        &BigUint::from_bytes_be(&n),
    );
    let mut out = c.to_bytes_be();
    while out.len() < n.len() {
        out.insert(0, 0);
    }
    out
}

pub fn digest(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Application PAN as compressed numeric, padded with `F` to `len` bytes
pub fn cn(digits: &str, len: usize) -> Vec<u8> {
    let mut padded = digits.to_string();
    while padded.len() < len * 2 {
        padded.push('F');
    }
    bytes(&padded)
}

/// BER-TLV with short or long form length
pub fn tlv(tag: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = tag.to_vec();
    match value.len() {
        len @ 0..=0x7F => out.push(len as u8),
        len @ 0x80..=0xFF => out.extend_from_slice(&[0x81, len as u8]),
        len => out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]),
    }
    out.extend_from_slice(value);
    out
}

/// Issuer-signed certificate for a key on the card (ICC or PIN encipherment)
///
/// Returns the certificate and the modulus remainder, empty when the whole
/// modulus fits.
pub fn issue_icc_certificate(
    subject_modulus: &[u8],
    pan: &str,
    expiry: [u8; 2],
    oda_input: &[u8],
) -> (Vec<u8>, Vec<u8>) {
    let issuer_len = bytes(ISSUER_MODULUS).len();
    let body_len = issuer_len - 21 - 21;
    let (body, remainder) = if subject_modulus.len() > body_len {
        (subject_modulus[..body_len].to_vec(), subject_modulus[body_len..].to_vec())
    } else {
        let mut body = subject_modulus.to_vec();
        body.resize(body_len, 0xBB);
        (body, Vec::new())
    };

    let mut plain = vec![0x6A, 0x04];
    plain.extend_from_slice(&cn(pan, 10));
    plain.extend_from_slice(&expiry);
    plain.extend_from_slice(&[0x00, 0x00, 0x01]);
    plain.extend_from_slice(&[0x01, 0x01, subject_modulus.len() as u8, 0x01]);
    plain.extend_from_slice(&body);
    let hash = digest(&[&plain[1..], &remainder[..], &[0x03], oda_input]);
    plain.extend_from_slice(&hash);
    plain.push(0xBC);
    assert_eq!(plain.len(), issuer_len);

    (sign(&plain, ISSUER_PRIVATE_EXPONENT, ISSUER_MODULUS), remainder)
}

/// Signed static application data carrying `dac`
pub fn sign_static_data(dac: [u8; 2], oda_input: &[u8]) -> Vec<u8> {
    let issuer_len = bytes(ISSUER_MODULUS).len();
    let mut plain = vec![0x6A, 0x03, 0x01, dac[0], dac[1]];
    plain.resize(issuer_len - 21, 0xBB);
    let hash = digest(&[&plain[1..], oda_input]);
    plain.extend_from_slice(&hash);
    plain.push(0xBC);
    sign(&plain, ISSUER_PRIVATE_EXPONENT, ISSUER_MODULUS)
}

/// Signed dynamic application data over the terminal's DDOL data
pub fn sign_dynamic_data(dynamic_number: &[u8], terminal_data: &[u8]) -> Vec<u8> {
    let icc_len = bytes(ICC_MODULUS).len();
    let mut dynamic = vec![dynamic_number.len() as u8];
    dynamic.extend_from_slice(dynamic_number);

    let mut plain = vec![0x6A, 0x05, 0x01, dynamic.len() as u8];
    plain.extend_from_slice(&dynamic);
    plain.resize(icc_len - 21, 0xBB);
    let hash = digest(&[&plain[1..], terminal_data]);
    plain.extend_from_slice(&hash);
    plain.push(0xBC);
    sign(&plain, ICC_PRIVATE_EXPONENT, ICC_MODULUS)
}

/// What gets written to the card at personalisation
#[derive(Debug, Clone)]
pub struct Personalisation {
    pub aip: [u8; 2],
    pub pan: &'static str,
    /// CVM list value (8E): amount X, amount Y, rules
    pub cvm_list: Vec<u8>,
    /// Extra data elements for the signed record
    pub extra: Vec<u8>,
    pub ca_index: u8,
    pub static_data: bool,
    pub icc_key: bool,
    pub pin_key: bool,
    pub icc_expiry: [u8; 2],
    /// PAN the ICC certificate is issued for
    pub icc_pan: &'static str,
}

impl Personalisation {
    /// Card supporting SDA and cardholder verification, no CVM required
    pub fn sda() -> Self {
        Self {
            aip: [0x50, 0x00],
            pan: PAN,
            cvm_list: bytes("00000000000000001F03"),
            extra: Vec::new(),
            ca_index: CA_INDEX,
            static_data: true,
            icc_key: false,
            pin_key: false,
            icc_expiry: [0x12, 0x49],
            icc_pan: PAN,
        }
    }

    /// Card supporting SDA and DDA with an ICC and a PIN encipherment key
    pub fn dda() -> Self {
        Self {
            aip: [0x70, 0x00],
            static_data: false,
            icc_key: true,
            pin_key: true,
            ..Self::sda()
        }
    }

    /// Value of the single signed record
    fn signed_record(&self) -> Vec<u8> {
        [
            tlv(&[0x5A], &bytes(self.pan)),
            tlv(&[0x5F, 0x24], &[0x49, 0x12, 0x31]),
            tlv(&[0x5F, 0x25], &[0x20, 0x01, 0x01]),
            tlv(&[0x5F, 0x28], &[0x08, 0x26]),
            tlv(&[0x9F, 0x42], &[0x08, 0x26]),
            tlv(&[0x8E], &self.cvm_list),
            tlv(&[0x8C], &bytes("9F02069F03069F1A0295055F2A029A039C019F3704")),
            tlv(&[0x8D], &bytes("8A029F3704")),
            self.extra.clone(),
        ]
        .concat()
    }

    pub fn oda_input(&self) -> Vec<u8> {
        [self.signed_record(), self.aip.to_vec()].concat()
    }

    pub fn issue(&self) -> TestCard {
        let oda_input = self.oda_input();
        let mut records = vec![[
            tlv(&[0x8F], &[self.ca_index]),
            tlv(&[0x90], &bytes(ISSUER_CERTIFICATE)),
            tlv(&[0x92], &bytes(ISSUER_REMAINDER)),
            tlv(&[0x9F, 0x32], &[0x03]),
        ]
        .concat()];

        let mut authentication = [tlv(&[0x9F, 0x4A], &[0x82]), tlv(&[0x9F, 0x49], &[0x9F, 0x37, 0x04])].concat();
        if self.static_data {
            authentication.extend(tlv(&[0x93], &sign_static_data([0xDA, 0xC1], &oda_input)));
        }
        records.push(authentication);

        if self.icc_key {
            let (cert, remainder) =
                issue_icc_certificate(&bytes(ICC_MODULUS), self.icc_pan, self.icc_expiry, &oda_input);
            records.push(
                [
                    tlv(&[0x9F, 0x46], &cert),
                    tlv(&[0x9F, 0x47], &[0x03]),
                    tlv(&[0x9F, 0x48], &remainder),
                ]
                .concat(),
            );
        }
        if self.pin_key {
            let (cert, _) = issue_icc_certificate(&bytes(PIN_MODULUS), self.pan, [0x12, 0x49], &oda_input);
            records.push([tlv(&[0x9F, 0x2D], &cert), tlv(&[0x9F, 0x2E], &[0x03])].concat());
        }

        let mut afl = vec![0x08, 0x01, 0x01, 0x01];
        afl.extend_from_slice(&[0x10, 0x01, records.len() as u8, 0x00]);

        let mut store = BTreeMap::new();
        store.insert((1, 1), tlv(&[0x70], &self.signed_record()));
        for (i, record) in records.iter().enumerate() {
            store.insert((2, i as u8 + 1), tlv(&[0x70], record));
        }

        let fci = tlv(
            &[0x6F],
            &[tlv(&[0x84], &AID), tlv(&[0xA5], &tlv(&[0x50], b"TEST CARD"))].concat(),
        );

        TestCard {
            fci,
            select_status: 0x9000,
            gpo_response: tlv(&[0x80], &[self.aip.to_vec(), afl].concat()),
            gpo_status: 0x9000,
            records: store,
            data_objects: HashMap::new(),
            pin: PIN.to_string(),
            pin_tries: 3,
            sign_dynamic: self.icc_key,
            dynamic_number: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88],
            challenge: [0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7],
            refuse_record: None,
            link_down_on: None,
            commands: Vec::new(),
        }
    }
}

/// Scripted ICC answering from its personalised data
#[derive(Debug, Clone)]
pub struct TestCard {
    pub fci: Vec<u8>,
    pub select_status: u16,
    pub gpo_response: Vec<u8>,
    pub gpo_status: u16,
    /// Raw records by (SFI, record number)
    pub records: BTreeMap<(u8, u8), Vec<u8>>,
    /// GET DATA answers by tag, besides the live PIN try counter
    pub data_objects: HashMap<[u8; 2], Vec<u8>>,
    pub pin: String,
    pub pin_tries: u8,
    /// Answer INTERNAL AUTHENTICATE with data signed by the ICC key
    pub sign_dynamic: bool,
    pub dynamic_number: [u8; 8],
    pub challenge: [u8; 8],
    /// Record answered with 6A83
    pub refuse_record: Option<(u8, u8)>,
    /// Instruction on which the link drops
    pub link_down_on: Option<u8>,
    /// Every command received, in order
    pub commands: Vec<ApduCommand>,
}

impl TestCard {
    pub fn received(&self, ins: u8) -> usize {
        self.commands.iter().filter(|c| c.ins() == ins).count()
    }

    fn respond(&mut self, command: &ApduCommand) -> (Vec<u8>, u16) {
        match command.ins() {
            0xA4 => (self.fci.clone(), self.select_status),
            0xA8 => (self.gpo_response.clone(), self.gpo_status),
            0xB2 => {
                let key = (command.p2() >> 3, command.p1());
                if self.refuse_record == Some(key) {
                    return (Vec::new(), 0x6A83);
                }
                match self.records.get(&key) {
                    Some(record) => (record.clone(), 0x9000),
                    None => (Vec::new(), 0x6A83),
                }
            }
            0xCA => {
                let tag = [command.p1(), command.p2()];
                if tag == [0x9F, 0x17] {
                    return (tlv(&tag, &[self.pin_tries]), 0x9000);
                }
                match self.data_objects.get(&tag) {
                    Some(value) => (tlv(&tag, value), 0x9000),
                    None => (Vec::new(), 0x6A88),
                }
            }
            0x88 if self.sign_dynamic => {
                let signed = sign_dynamic_data(&self.dynamic_number, command.payload());
                (tlv(&[0x80], &signed), 0x9000)
            }
            0x84 => (self.challenge.to_vec(), 0x9000),
            0x20 => self.verify(command),
            0xAE => {
                let cid = command.p1() & 0xC0;
                let mut body = vec![cid, 0x00, 0x01];
                body.extend_from_slice(&[0xAC; 8]);
                body.extend_from_slice(&[0x06, 0x01, 0x0A, 0x03, 0xA0, 0x00, 0x00]);
                (tlv(&[0x80], &body), 0x9000)
            }
            _ => (Vec::new(), 0x6D00),
        }
    }

    fn verify(&mut self, command: &ApduCommand) -> (Vec<u8>, u16) {
        if self.pin_tries == 0 {
            return (Vec::new(), 0x6983);
        }
        let block = match command.p2() {
            0x80 => command.payload().to_vec(),
            0x88 => {
                let clear = recover(command.payload(), &bytes(PIN_PRIVATE_EXPONENT), &bytes(PIN_MODULUS));
                if clear.first() != Some(&0x7F) || clear.get(9..17) != Some(&self.challenge[..]) {
                    return (Vec::new(), 0x6985);
                }
                clear[1..9].to_vec()
            }
            _ => return (Vec::new(), 0x6A86),
        };

        let expected = PinDigits::new(self.pin.as_str()).map(|pin| plaintext_pin_block(&pin).to_vec());
        if Some(block) == expected {
            self.pin_tries = 3;
            (Vec::new(), 0x9000)
        } else {
            self.pin_tries -= 1;
            (Vec::new(), 0x63C0 | u16::from(self.pin_tries))
        }
    }
}

impl CardTransport for TestCard {
    fn transmit(&mut self, command: &ApduCommand) -> Result<ApduResponse, TransportError> {
        self.commands.push(command.clone());
        if self.link_down_on == Some(command.ins()) {
            return Err(TransportError::Timeout);
        }
        let (mut raw, sw) = self.respond(command);
        raw.extend_from_slice(&sw.to_be_bytes());
        ApduResponse::from_raw(&raw)
    }
}

/// Cardholder typing a fixed sequence of PINs; `None` cancels
#[derive(Debug, Default)]
pub struct ScriptedPin {
    entries: VecDeque<Option<&'static str>>,
    pub prompts: usize,
}

impl ScriptedPin {
    pub fn new(entries: &[Option<&'static str>]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
            prompts: 0,
        }
    }
}

impl PinEntry for ScriptedPin {
    fn request_pin(&mut self) -> Option<PinDigits> {
        self.prompts += 1;
        self.entries.pop_front().flatten().and_then(PinDigits::new)
    }
}
