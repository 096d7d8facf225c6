// Line format: baud rate, word width, stop bits and parity, and the
// phase durations they imply.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UartError;
use crate::parity::{word_mask, Parity};
use crate::sim::{SimDuration, TICKS_PER_SECOND};
use crate::Word;

pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_BITS: u8 = 8;
pub const DEFAULT_STOP_BITS: f64 = 1.0;
pub const MAX_BITS: u8 = Word::BITS as u8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Format {
    pub baud: u32,
    pub bits: u8,
    pub stop_bits: f64,
    pub parity: Parity,
}

impl Default for Format {
    fn default() -> Self {
        Format {
            baud: DEFAULT_BAUD,
            bits: DEFAULT_BITS,
            stop_bits: DEFAULT_STOP_BITS,
            parity: Parity::None,
        }
    }
}

/// Durations of the line phases for one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    /// Start, data and parity slots.
    pub bit: SimDuration,
    /// Receiver offset from the start edge to the first bit center.
    pub half_bit: SimDuration,
    /// Stop phase.
    pub stop: SimDuration,
}

impl Format {
    /// 8N1 at `baud`.
    pub fn new(baud: u32) -> Format {
        Format {
            baud,
            ..Format::default()
        }
    }

    pub fn with_bits(self, bits: u8) -> Format {
        Format { bits, ..self }
    }

    pub fn with_stop_bits(self, stop_bits: f64) -> Format {
        Format { stop_bits, ..self }
    }

    pub fn with_parity(self, parity: Parity) -> Format {
        Format { parity, ..self }
    }

    /// Parse a framing string like "8N1" or "8E1.5" at `baud`.
    pub fn framing(framing: &str, baud: u32) -> Result<Format, UartError> {
        let err = || UartError::Framing(framing.to_string());
        let s = framing.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(err)?;
        let (bits, rest) = s.split_at(split);
        let mut chars = rest.chars();
        let parity = chars.next().and_then(Parity::from_letter).ok_or_else(err)?;
        let bits: u8 = bits.parse().map_err(|_| err())?;
        let stop_bits: f64 = chars.as_str().parse().map_err(|_| err())?;
        let format = Format {
            baud,
            bits,
            stop_bits,
            parity,
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<(), UartError> {
        if self.baud == 0 {
            return Err(UartError::InvalidFormat("baud rate must be positive".into()));
        }
        if self.bits == 0 || self.bits > MAX_BITS {
            return Err(UartError::InvalidFormat(format!(
                "word width {} outside 1..={}",
                self.bits, MAX_BITS
            )));
        }
        if !self.stop_bits.is_finite() || self.stop_bits <= 0.0 {
            return Err(UartError::InvalidFormat(format!(
                "stop bit count {} must be positive",
                self.stop_bits
            )));
        }
        Ok(())
    }

    pub fn word_mask(&self) -> Word {
        word_mask(self.bits)
    }

    /// Reject words with bits set above the word width.
    pub fn check_word(&self, word: Word) -> Result<Word, UartError> {
        if word & !self.word_mask() != 0 {
            return Err(UartError::WordTooWide {
                word,
                bits: self.bits,
            });
        }
        Ok(word)
    }

    // Stop phase is the bit period times the stop bit count, truncated
    // once, not a sum of rounded single bit waits.
    pub fn timing(&self) -> BitTiming {
        let period = TICKS_PER_SECOND as f64 / f64::from(self.baud);
        BitTiming {
            bit: SimDuration::from(period as u64),
            half_bit: SimDuration::from((period / 2.0) as u64),
            stop: SimDuration::from((period * self.stop_bits) as u64),
        }
    }

    pub fn bit_time(&self) -> SimDuration {
        self.timing().bit
    }

    /// Line bits per frame, stop bits included.
    pub fn frame_bits(&self) -> f64 {
        f64::from(1 + u32::from(self.bits) + self.parity.slots()) + self.stop_bits
    }

    /// Duration of one frame from start edge to end of the stop phase.
    pub fn frame_time(&self) -> SimDuration {
        let t = self.timing();
        let slots = 1 + u64::from(self.bits) + u64::from(self.parity.slots());
        t.bit.saturating_mul(slots) + t.stop
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud,
            self.bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

/// Framing string at the default baud rate.
impl FromStr for Format {
    type Err = UartError;

    fn from_str(s: &str) -> Result<Format, UartError> {
        Format::framing(s, DEFAULT_BAUD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let f = Format::default();
        assert_eq!(f.baud, 9600);
        assert_eq!(f.bits, 8);
        assert_eq!(f.stop_bits, 1.0);
        assert_eq!(f.parity, Parity::None);
        assert_eq!(f.to_string(), "9600 8N1");
    }

    #[test]
    fn test_framing() {
        let f = Format::framing("7e2", 115200).unwrap();
        assert_eq!(f, Format::new(115200).with_bits(7).with_parity(Parity::Even).with_stop_bits(2.0));
        let f: Format = "8O1.5".parse().unwrap();
        assert_eq!(f.stop_bits, 1.5);
        assert_eq!(f.parity, Parity::Odd);
        assert_eq!(f.to_string(), "9600 8O1.5");
    }

    #[test]
    fn test_bad_framing() {
        for s in ["", "8", "8X1", "N1", "8N", "8Nx", "0N1", "40N1", "8N0"] {
            assert!(Format::framing(s, 9600).is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn test_validate() {
        assert!(Format::new(0).validate().is_err());
        assert!(Format::default().with_bits(0).validate().is_err());
        assert!(Format::default().with_bits(33).validate().is_err());
        assert!(Format::default().with_bits(32).validate().is_ok());
        assert!(Format::default().with_stop_bits(0.0).validate().is_err());
        assert!(Format::default().with_stop_bits(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_timing_truncates() {
        // 1e12 / 115200 = 8680555.55.. ps
        let t = Format::new(115200).timing();
        assert_eq!(t.bit.ticks(), 8_680_555);
        assert_eq!(t.half_bit.ticks(), 4_340_277);
        assert_eq!(t.stop.ticks(), 8_680_555);
    }

    #[test]
    fn test_fractional_stop_is_one_multiplication() {
        let t = Format::new(115200).with_stop_bits(1.5).timing();
        // 8680555.55.. * 1.5 = 13020833.33..
        assert_eq!(t.stop.ticks(), 13_020_833);
        assert_ne!(t.stop, t.bit + t.half_bit);
    }

    #[test]
    fn test_frame_time() {
        let f = Format::new(9600).with_parity(Parity::Mark).with_stop_bits(2.0);
        assert_eq!(f.frame_bits(), 12.0);
        let t = f.timing();
        assert_eq!(f.frame_time(), t.bit.saturating_mul(10) + t.stop);
    }

    #[test]
    fn test_check_word() {
        let f = Format::default().with_bits(5);
        assert_eq!(f.check_word(0x1f), Ok(0x1f));
        assert_eq!(
            f.check_word(0x20),
            Err(UartError::WordTooWide { word: 0x20, bits: 5 })
        );
    }

    #[test]
    fn test_serde() {
        let f: Format = serde_json::from_str(r#"{"baud": 115200, "parity": "even"}"#).unwrap();
        assert_eq!(f, Format::new(115200).with_parity(Parity::Even));
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(serde_json::from_str::<Format>(&json).unwrap(), f);
    }
}
