// Parity bit computation, shared by the transmit and receive sides.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Word;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    #[display(fmt = "none")]
    None,
    #[display(fmt = "even")]
    Even,
    #[display(fmt = "odd")]
    Odd,
    #[display(fmt = "mark")]
    Mark,
    #[display(fmt = "space")]
    Space,
}

impl Parity {
    /// Single letter used in framing strings ("8N1", "7E2").
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    pub fn from_letter(c: char) -> Option<Parity> {
        match c.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'E' => Some(Parity::Even),
            'O' => Some(Parity::Odd),
            'M' => Some(Parity::Mark),
            'S' => Some(Parity::Space),
            _ => None,
        }
    }

    /// Number of line bits the parity slot occupies.
    pub fn slots(self) -> u32 {
        match self {
            Parity::None => 0,
            _ => 1,
        }
    }

    pub fn bit(self, word: Word, bits: u8) -> Option<bool> {
        parity(word, bits, self)
    }
}

/// Mask selecting the `bits` least significant bits of a word.
#[inline(always)]
pub fn word_mask(bits: u8) -> Word {
    match bits {
        0 => 0,
        b if u32::from(b) >= Word::BITS => Word::MAX,
        b => Word::MAX >> (Word::BITS - u32::from(b)),
    }
}

/// Parity bit for the low `bits` bits of `word`, or None when the mode
/// carries no parity slot.
pub fn parity(word: Word, bits: u8, mode: Parity) -> Option<bool> {
    // XOR of all data bits: 1 when an odd number of them is set.
    let p = (word & word_mask(bits)).count_ones() & 1 == 1;
    match mode {
        Parity::None => None,
        Parity::Mark => Some(true),
        Parity::Space => Some(false),
        Parity::Even => Some(p),
        Parity::Odd => Some(!p),
    }
}
