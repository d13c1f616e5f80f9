//! Card transport boundary
//!
//! The terminal core builds commands and interprets responses; moving the
//! bytes is the transport's job. Implementations resolve `61xx` (GET
//! RESPONSE) and `6Cxx` (wrong Le) themselves so callers only ever see
//! final status words.

use crate::apdu::{commands, ApduCommand, ApduResponse};
use crate::error::TransportError;

/// GET RESPONSE commands sent for one command before giving up
pub const MAX_GET_RESPONSES: usize = 16;

/// Half-duplex command/response link to one card
pub trait CardTransport {
    /// Send one command and wait for its final response
    fn transmit(&mut self, command: &ApduCommand) -> Result<ApduResponse, TransportError>;
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit(&mut self, command: &ApduCommand) -> Result<ApduResponse, TransportError> {
        (**self).transmit(command)
    }
}

/// Exchange `command` over a raw byte link, following `6Cxx` and `61xx`
///
/// `exchange` sends one APDU and returns the raw response including the
/// status word. A `6Cxx` answer repeats the command once with Le = `xx`;
/// `61xx` answers are collected with GET RESPONSE until a final status
/// word arrives, at most [`MAX_GET_RESPONSES`] times.
pub fn exchange_resolving<F>(command: &ApduCommand, mut exchange: F) -> Result<ApduResponse, TransportError>
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, TransportError>,
{
    let mut response = ApduResponse::from_raw(&exchange(&command.build()?)?)?;

    if response.sw1 == 0x6C {
        tracing::trace!(le = response.sw2, "Wrong length, resending");
        let retry = command.clone().le(response.sw2);
        response = ApduResponse::from_raw(&exchange(&retry.build()?)?)?;
    }

    let mut data = std::mem::take(&mut response.data);
    let mut fetched = 0;
    while response.sw1 == 0x61 {
        if fetched == MAX_GET_RESPONSES {
            return Err(TransportError::ResponseChainTooLong(fetched));
        }
        fetched += 1;
        tracing::trace!(available = response.sw2, "Fetching response data");
        response = ApduResponse::from_raw(&exchange(&commands::get_response(response.sw2).build()?)?)?;
        data.append(&mut response.data);
    }
    response.data = data;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Sent = Rc<RefCell<Vec<Vec<u8>>>>;

    /// Raw link that plays back `answers` and records what was sent
    fn scripted(answers: Vec<Vec<u8>>) -> (impl FnMut(&[u8]) -> Result<Vec<u8>, TransportError>, Sent) {
        let sent = Sent::default();
        let log = Rc::clone(&sent);
        let mut answers: VecDeque<Vec<u8>> = answers.into();
        let exchange = move |apdu: &[u8]| {
            log.borrow_mut().push(apdu.to_vec());
            answers.pop_front().ok_or(TransportError::Timeout)
        };
        (exchange, sent)
    }

    #[test]
    fn test_plain_response() {
        let (exchange, sent) = scripted(vec![vec![0x6F, 0x00, 0x90, 0x00]]);
        let response = exchange_resolving(&commands::select(&[0xA0, 0x00]), exchange).unwrap();
        assert_eq!(response.data, vec![0x6F, 0x00]);
        assert!(response.is_success());
        assert_eq!(sent.borrow().len(), 1);
    }

    #[test]
    fn test_get_response_chain() {
        let (exchange, sent) = scripted(vec![
            vec![0x61, 0x02],
            vec![0x01, 0x02, 0x61, 0x01],
            vec![0x03, 0x90, 0x00],
        ]);
        let response = exchange_resolving(&commands::get_challenge(), exchange).unwrap();
        assert_eq!(response.data, vec![0x01, 0x02, 0x03]);
        assert_eq!(sent.borrow()[1], vec![0x00, 0xC0, 0x00, 0x00, 0x02]);
        assert_eq!(sent.borrow()[2], vec![0x00, 0xC0, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_wrong_length_resend() {
        let mut record = vec![0xAA; 8];
        record.extend_from_slice(&[0x90, 0x00]);
        let (exchange, sent) = scripted(vec![vec![0x6C, 0x08], record]);
        let response = exchange_resolving(&commands::read_record(1, 1), exchange).unwrap();
        assert_eq!(sent.borrow()[1], vec![0x00, 0xB2, 0x01, 0x0C, 0x08]);
        assert_eq!(response.data, vec![0xAA; 8]);
        assert!(response.is_success());
    }

    #[test]
    fn test_endless_get_response_chain_is_cut_off() {
        let (exchange, sent) = scripted(vec![vec![0x01, 0x61, 0x01]; MAX_GET_RESPONSES + 5]);
        assert!(matches!(
            exchange_resolving(&commands::get_challenge(), exchange),
            Err(TransportError::ResponseChainTooLong(MAX_GET_RESPONSES))
        ));
        assert_eq!(sent.borrow().len(), MAX_GET_RESPONSES + 1);
    }

    #[test]
    fn test_short_response() {
        let (exchange, _) = scripted(vec![vec![0x90]]);
        assert!(matches!(
            exchange_resolving(&commands::get_challenge(), exchange),
            Err(TransportError::ShortResponse(1))
        ));
    }
}
