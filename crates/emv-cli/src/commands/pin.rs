//! Cardholder PIN entry on the console

use std::io::{self, BufRead, Write};

use emv_card::{PinDigits, PinEntry};

/// Reads the PIN from standard input
///
/// An empty line bypasses PIN entry. Input is echoed, so this is for bench
/// testing only.
pub struct ConsolePin<R> {
    input: R,
}

impl ConsolePin<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock())
    }
}

impl<R: BufRead> ConsolePin<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> PinEntry for ConsolePin<R> {
    fn request_pin(&mut self) -> Option<PinDigits> {
        loop {
            print!("Enter PIN (blank to bypass): ");
            if io::stdout().flush().is_err() {
                return None;
            }

            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }

            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            match PinDigits::new(line) {
                Some(pin) => return Some(pin),
                None => println!("A PIN is 4 to 12 digits"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reprompts_on_invalid_input() {
        let mut entry = ConsolePin::new("12\nabcd\n4321\n".as_bytes());
        assert_eq!(entry.request_pin(), PinDigits::new("4321"));
    }

    #[test]
    fn test_blank_line_bypasses() {
        let mut entry = ConsolePin::new("\n1234\n".as_bytes());
        assert_eq!(entry.request_pin(), None);
    }

    #[test]
    fn test_end_of_input_bypasses() {
        let mut entry = ConsolePin::new("".as_bytes());
        assert_eq!(entry.request_pin(), None);
    }
}
