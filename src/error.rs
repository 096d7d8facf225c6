// Error taxonomy.
//
// Parity mismatches and receive timeouts are not errors: the first is
// logged and counted by the sink, the second simply returns.

use thiserror::Error;

use crate::Word;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UartError {
    /// Baud rate, word width or stop bit count out of range.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Enqueued word has bits set above the configured word width.
    #[error("Word 0x{word:x} does not fit in {bits} data bits")]
    WordTooWide { word: Word, bits: u8 },

    /// Framing string is not of the `<bits><parity><stop>` form, e.g. "8N1".
    #[error("Invalid framing '{0}': expected e.g. 8N1, 7E2 or 8O1.5")]
    Framing(String),

    /// Simulation ran out of events before the awaited operation completed.
    #[error("Simulation stalled: no pending event can complete the operation")]
    Stalled,

    /// Simulation executor is gone.
    #[error("Failed to spawn simulation task: {0}")]
    Spawn(String),
}
