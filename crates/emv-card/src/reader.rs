//! PC/SC card reader management

use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};

use crate::apdu::{ApduCommand, ApduResponse};
use crate::error::TransportError;
use crate::transport::{exchange_resolving, CardTransport};

/// Card reader wrapper for managing PC/SC connections
pub struct CardReader {
    context: Context,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_string_lossy().into_owned())
            .collect())
    }

    /// Connect to the first available reader
    pub fn connect_first(&self) -> Result<PcscTransport, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        let reader = readers.next().ok_or(pcsc::Error::NoReadersAvailable)?;
        let reader_name = reader.to_string_lossy().into_owned();
        let card = self.context.connect(reader, ShareMode::Shared, Protocols::ANY)?;
        tracing::info!(reader = %reader_name, "Connected to card");
        Ok(PcscTransport { card, reader_name })
    }
}

/// Card link over a PC/SC reader
pub struct PcscTransport {
    card: Card,
    reader_name: String,
}

impl PcscTransport {
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }
}

impl CardTransport for PcscTransport {
    fn transmit(&mut self, command: &ApduCommand) -> Result<ApduResponse, TransportError> {
        let card = &self.card;
        exchange_resolving(command, |apdu| {
            let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
            let rapdu = card.transmit(apdu, &mut rapdu_buf)?;
            Ok(rapdu.to_vec())
        })
    }
}
