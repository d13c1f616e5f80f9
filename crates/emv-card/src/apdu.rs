//! APDU (Application Protocol Data Unit) command handling

use std::fmt;

use crate::error::TransportError;
use crate::transport::CardTransport;

/// ISO 7816-4 status word (SW1 SW2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

/// How the terminal interprets a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// 9000
    Success,
    /// 63Cx: PIN rejected, `x` tries left
    WrongPin { tries_remaining: u8 },
    /// 6983 / 6984: authentication method blocked or reference data invalidated
    MethodBlocked,
    /// 6985: conditions of use not satisfied
    ConditionsNotSatisfied,
    /// 6A81 / 6A82: function not supported or file not found
    NotFound,
    Other,
}

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord(0x6985);

    pub fn new(sw1: u8, sw2: u8) -> Self {
        StatusWord(u16::from_be_bytes([sw1, sw2]))
    }

    pub fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn sw2(self) -> u8 {
        self.0 as u8
    }

    pub fn kind(self) -> StatusKind {
        match (self.sw1(), self.sw2()) {
            (0x90, 0x00) => StatusKind::Success,
            (0x63, sw2) if sw2 & 0xF0 == 0xC0 => StatusKind::WrongPin {
                tries_remaining: sw2 & 0x0F,
            },
            (0x69, 0x83) | (0x69, 0x84) => StatusKind::MethodBlocked,
            (0x69, 0x85) => StatusKind::ConditionsNotSatisfied,
            (0x6A, 0x81) | (0x6A, 0x82) => StatusKind::NotFound,
            _ => StatusKind::Other,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response into data and trailing status word
    pub fn from_raw(raw: &[u8]) -> Result<Self, TransportError> {
        if raw.len() < 2 {
            return Err(TransportError::ShortResponse(raw.len()));
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    pub fn status(&self) -> StatusWord {
        StatusWord::new(self.sw1, self.sw2)
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        self.status().to_string()
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn ins(&self) -> u8 {
        self.ins
    }

    pub fn p1(&self) -> u8 {
        self.p1
    }

    pub fn p2(&self) -> u8 {
        self.p2
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Build the APDU command bytes
    ///
    /// Only short APDUs are produced, so command data is limited to 255 bytes.
    pub fn build(&self) -> Result<Vec<u8>, TransportError> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len()).map_err(|_| TransportError::CommandTooLong(self.data.len()))?;
            apdu.push(lc);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        Ok(apdu)
    }

    /// Send this command over `transport`
    pub fn send<T: CardTransport + ?Sized>(&self, transport: &mut T) -> Result<ApduResponse, TransportError> {
        let apdu = self.build()?;
        tracing::trace!(apdu = %hex::encode_upper(apdu), "C-APDU");
        let response = transport.transmit(self)?;
        tracing::trace!(
            sw = %response.status(),
            len = response.data.len(),
            "R-APDU"
        );
        Ok(response)
    }
}

/// Cryptogram requested in GENERATE AC (reference control parameter P1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptogramType {
    /// Application Authentication Cryptogram (decline)
    Aac,
    /// Transaction Certificate (approve offline)
    Tc,
    /// Authorisation Request Cryptogram (go online)
    Arqc,
}

impl CryptogramType {
    pub fn p1(self) -> u8 {
        match self {
            CryptogramType::Aac => 0x00,
            CryptogramType::Tc => 0x40,
            CryptogramType::Arqc => 0x80,
        }
    }
}

/// Common EMV APDU commands
pub mod commands {
    use super::{ApduCommand, CryptogramType};

    /// INS bytes, used by transports and test doubles to route commands
    pub mod ins {
        pub const SELECT: u8 = 0xA4;
        pub const READ_RECORD: u8 = 0xB2;
        pub const GET_PROCESSING_OPTIONS: u8 = 0xA8;
        pub const GET_DATA: u8 = 0xCA;
        pub const INTERNAL_AUTHENTICATE: u8 = 0x88;
        pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
        pub const GENERATE_AC: u8 = 0xAE;
        pub const VERIFY: u8 = 0x20;
        pub const GET_CHALLENGE: u8 = 0x84;
        pub const GET_RESPONSE: u8 = 0xC0;
    }

    /// P2 qualifier for a plaintext offline PIN
    pub const PIN_PLAINTEXT: u8 = 0x80;
    /// P2 qualifier for an enciphered offline PIN
    pub const PIN_ENCIPHERED: u8 = 0x88;

    /// SELECT command (by name/AID)
    pub fn select(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, ins::SELECT, 0x04, 0x00)
            .data(aid.to_vec())
            .le(0x00)
    }

    /// GET PROCESSING OPTIONS command, `pdol_data` already wrapped in tag 83
    pub fn get_processing_options(pdol_data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x80, ins::GET_PROCESSING_OPTIONS, 0x00, 0x00)
            .data(pdol_data)
            .le(0x00)
    }

    /// READ RECORD command
    pub fn read_record(record_number: u8, sfi: u8) -> ApduCommand {
        let p2 = (sfi << 3) | 0x04;
        ApduCommand::new(0x00, ins::READ_RECORD, record_number, p2).le(0x00)
    }

    /// INTERNAL AUTHENTICATE command (for DDA)
    pub fn internal_authenticate(data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x00, ins::INTERNAL_AUTHENTICATE, 0x00, 0x00)
            .data(data)
            .le(0x00)
    }

    /// EXTERNAL AUTHENTICATE command with the issuer authentication data
    pub fn external_authenticate(cryptogram: &[u8], proprietary: &[u8]) -> ApduCommand {
        let mut data = cryptogram.to_vec();
        data.extend_from_slice(proprietary);
        ApduCommand::new(0x00, ins::EXTERNAL_AUTHENTICATE, 0x00, 0x00).data(data)
    }

    /// GENERATE AC command
    pub fn generate_ac(cryptogram: CryptogramType, cdol_data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x80, ins::GENERATE_AC, cryptogram.p1(), 0x00)
            .data(cdol_data)
            .le(0x00)
    }

    /// VERIFY command, `qualifier` is [`PIN_PLAINTEXT`] or [`PIN_ENCIPHERED`]
    pub fn verify_pin(pin_data: Vec<u8>, qualifier: u8) -> ApduCommand {
        ApduCommand::new(0x00, ins::VERIFY, 0x00, qualifier).data(pin_data)
    }

    /// GET CHALLENGE command, returns an 8-byte unpredictable number
    pub fn get_challenge() -> ApduCommand {
        ApduCommand::new(0x00, ins::GET_CHALLENGE, 0x00, 0x00).le(0x00)
    }

    /// GET RESPONSE command, fetches the `le` bytes announced by `61xx`
    pub fn get_response(le: u8) -> ApduCommand {
        ApduCommand::new(0x00, ins::GET_RESPONSE, 0x00, 0x00).le(le)
    }

    /// GET DATA command - request specific data object from card
    pub fn get_data(tag: &[u8]) -> ApduCommand {
        match tag {
            [t] => ApduCommand::new(0x80, ins::GET_DATA, 0x00, *t).le(0x00),
            [t1, t2] => ApduCommand::new(0x80, ins::GET_DATA, *t1, *t2).le(0x00),
            // For longer tags, use data field
            _ => ApduCommand::new(0x80, ins::GET_DATA, 0x00, 0x00)
                .data(tag.to_vec())
                .le(0x00),
        }
    }
}
