// UART models for event driven logic simulation.
//
//   - UartSource: drains a word queue onto a line, one timed frame per
//     word: start bit, data bits LSB first, optional parity, stop.
//
//   - UartSink: waits for a start edge on a line, samples at bit
//     centers, checks parity and queues the word for a consumer.
//
// Both run a background timing loop on the simulation engine in `sim`.
// The frame sequencing itself lives in the Tick state machines in
// `tick`.  Changing the format restarts the loop.

pub mod error;
pub mod format;
pub mod line;
pub mod parity;
pub mod sim;
pub mod sink;
pub mod source;
pub mod sync;
pub mod tick;

/// One data word, at most 32 bits wide.
pub type Word = u32;

pub use error::UartError;
pub use format::{BitTiming, Format};
pub use line::{Edge, Line};
pub use parity::{parity, Parity};
pub use sim::{Scheduler, Sim, SimDuration, SimTime, TaskHandle, TimeUnit};
pub use sink::UartSink;
pub use source::UartSource;
pub use sync::{Event, WordQueue};
pub use tick::Tick;
