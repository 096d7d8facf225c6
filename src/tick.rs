// Bit level frame state machines.
//
//   - Framer: expand one word into the timed line phases of a frame,
//     start bit, data bits LSB first, parity, stop.
//
//   - Sampler: after a start edge, tell the receive loop how long to
//     wait before each sample point, and assemble the word from the
//     sampled levels.
//
// Neither knows about time advancing or the line itself; the timing
// loops in source and sink drive them.

use crate::format::{BitTiming, Format};
use crate::parity::Parity;
use crate::sim::SimDuration;
use crate::Word;

pub trait Tick<I, O> {
    fn tick(&mut self, input: I) -> Option<O>;
}

/// Drive `level` onto the line for `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub level: bool,
    pub duration: SimDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    Data(u8),
    Parity,
    Stop,
    Done,
}

pub struct Framer {
    word: Word,
    bits: u8,
    parity: Option<bool>,
    timing: BitTiming,
    step: Step,
}

impl Framer {
    pub fn new(word: Word, format: &Format, timing: BitTiming) -> Framer {
        Framer {
            word,
            bits: format.bits,
            parity: format.parity.bit(word, format.bits),
            timing,
            step: Step::Start,
        }
    }

    fn after_data(&self) -> Step {
        if self.parity.is_some() {
            Step::Parity
        } else {
            Step::Stop
        }
    }
}

impl Iterator for Framer {
    type Item = Phase;

    fn next(&mut self) -> Option<Phase> {
        let bit = self.timing.bit;
        let (level, duration, next) = match self.step {
            Step::Start => (false, bit, Step::Data(0)),
            Step::Data(k) => {
                let level = (self.word >> k) & 1 == 1;
                let next = if k + 1 < self.bits {
                    Step::Data(k + 1)
                } else {
                    self.after_data()
                };
                (level, bit, next)
            }
            Step::Parity => (self.parity.unwrap_or(true), bit, Step::Stop),
            Step::Stop => (true, self.timing.stop, Step::Done),
            Step::Done => return None,
        };
        self.step = next;
        Some(Phase { level, duration })
    }
}

/// One received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub word: Word,
    /// Sampled parity bit, None without parity.
    pub parity: Option<bool>,
    /// Parity bit recomputed from the received word.
    pub expected: Option<bool>,
}

impl Received {
    pub fn parity_error(&self) -> bool {
        self.parity != self.expected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Align,
    Shift,
    Parity,
    Stop,
    Done,
}

pub struct Sampler {
    bits: u8,
    mode_parity: Parity,
    timing: BitTiming,
    mode: Mode,
    reg: Word,  // data shift register
    bit: u8,    // bit count
    parity: Option<bool>,
}

impl Sampler {
    /// Fresh sampler, positioned at a start edge.
    pub fn new(format: &Format, timing: BitTiming) -> Sampler {
        Sampler {
            bits: format.bits,
            mode_parity: format.parity,
            timing,
            mode: Mode::Align,
            reg: 0,
            bit: 0,
            parity: None,
        }
    }

    /// Delay until the next tick, None once the frame is complete.
    pub fn wait(&self) -> Option<SimDuration> {
        match self.mode {
            Mode::Align => Some(self.timing.half_bit),
            Mode::Shift | Mode::Parity => Some(self.timing.bit),
            Mode::Stop => Some(self.timing.stop),
            Mode::Done => None,
        }
    }

    fn after_data(&self) -> Mode {
        match self.mode_parity {
            Parity::None => Mode::Stop,
            _ => Mode::Parity,
        }
    }
}

// Feed the line level at the end of each wait; output the frame after
// the stop phase.  Align and Stop ignore the level.
impl Tick<bool, Received> for Sampler {
    fn tick(&mut self, level: bool) -> Option<Received> {
        match self.mode {
            Mode::Align => {
                self.mode = Mode::Shift;
                None
            }
            Mode::Shift => {
                self.reg |= Word::from(level) << self.bit;
                self.bit += 1;
                if self.bit >= self.bits {
                    self.mode = self.after_data();
                }
                None
            }
            Mode::Parity => {
                self.parity = Some(level);
                self.mode = Mode::Stop;
                None
            }
            Mode::Stop => {
                self.mode = Mode::Done;
                Some(Received {
                    word: self.reg,
                    parity: self.parity,
                    expected: self.mode_parity.bit(self.reg, self.bits),
                })
            }
            Mode::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(word: Word, format: &Format) -> Vec<bool> {
        Framer::new(word, format, format.timing())
            .map(|p| p.level)
            .collect()
    }

    #[test]
    fn test_8n1_frame() {
        let f = Format::new(115200);
        let phases: Vec<Phase> = Framer::new(0xA5, &f, f.timing()).collect();
        assert_eq!(phases.len(), 10);
        let lv: Vec<bool> = phases.iter().map(|p| p.level).collect();
        // start, 1010 0101 LSB first, stop
        assert_eq!(
            lv,
            vec![false, true, false, true, false, false, true, false, true, true]
        );
        assert!(phases[..9].iter().all(|p| p.duration == f.timing().bit));
        assert_eq!(phases[9].duration, f.timing().stop);
    }

    #[test]
    fn test_parity_slot() {
        let f = Format::new(9600).with_bits(7).with_parity(Parity::Odd);
        let lv = levels(0x03, &f);
        assert_eq!(lv.len(), 1 + 7 + 1 + 1);
        // two bits set: odd parity bit is 1
        assert!(lv[8]);
        let f = f.with_parity(Parity::Space);
        assert!(!levels(0x7f, &f)[8]);
    }

    #[test]
    fn test_fractional_stop_phase() {
        let f = Format::new(9600).with_stop_bits(1.5);
        let last = Framer::new(0, &f, f.timing()).last().unwrap();
        assert!(last.level);
        assert_eq!(last.duration, f.timing().stop);
    }

    // Feed a sampler from the frame the framer produces, sampling at
    // the same offsets the sink does.
    fn sample(word: Word, format: &Format, flip_parity: bool) -> Received {
        let timing = format.timing();
        let phases: Vec<Phase> = Framer::new(word, format, timing).collect();
        let level_at = |t: u64| {
            let mut start = 0;
            for p in &phases {
                if t < start + p.duration.ticks() {
                    return p.level;
                }
                start += p.duration.ticks();
            }
            true
        };
        let parity_slot = 1 + u64::from(format.bits);
        let mut s = Sampler::new(format, timing);
        let mut t = 0;
        while let Some(w) = s.wait() {
            t += w.ticks();
            let mut level = level_at(t);
            if flip_parity && t / timing.bit.ticks() == parity_slot {
                level = !level;
            }
            if let Some(rx) = s.tick(level) {
                return rx;
            }
        }
        unreachable!()
    }

    #[test]
    fn test_sampler_recovers_words() {
        for parity in [Parity::None, Parity::Even, Parity::Odd, Parity::Mark, Parity::Space] {
            for bits in 5..=9u8 {
                let f = Format::new(115200).with_bits(bits).with_parity(parity);
                for word in [0, 1, f.word_mask(), 0x155 & f.word_mask()] {
                    let rx = sample(word, &f, false);
                    assert_eq!(rx.word, word);
                    assert!(!rx.parity_error());
                }
            }
        }
    }

    #[test]
    fn test_sampler_flags_parity_flip() {
        let f = Format::new(115200).with_parity(Parity::Even);
        let rx = sample(0x5a, &f, true);
        assert_eq!(rx.word, 0x5a);
        assert!(rx.parity_error());
    }

    #[test]
    fn test_sampler_waits() {
        let f = Format::new(9600).with_bits(5);
        let t = f.timing();
        let mut s = Sampler::new(&f, t);
        assert_eq!(s.wait(), Some(t.half_bit));
        let mut waits = vec![];
        while let Some(w) = s.wait() {
            waits.push(w);
            s.tick(true);
        }
        assert_eq!(waits.len(), 1 + 5 + 1);
        assert_eq!(waits[6], t.stop);
        assert_eq!(s.tick(true), None);
    }
}
