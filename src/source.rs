//! UART source: serializes queued words onto a line.
//!
//! A background timing loop drains the queue one frame at a time.  Any
//! format change kills that loop and starts a fresh one with the new
//! format; a frame in flight at that moment is abandoned, not finished.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, info, trace};

use crate::error::UartError;
use crate::format::Format;
use crate::line::Line;
use crate::parity::Parity;
use crate::sim::{Scheduler, Sim, TaskHandle};
use crate::sync::{Event, WordQueue};
use crate::tick::Framer;
use crate::Word;

struct Shared {
    line: Line,
    queue: WordQueue,
    active: Cell<bool>,
    idle: Event,
    frames: Cell<u64>,
}

pub struct UartSource {
    shared: Rc<Shared>,
    sched: Scheduler,
    format: Cell<Format>,
    task: RefCell<Option<TaskHandle>>,
}

impl UartSource {
    pub fn new(sim: &Sim, line: &Line, format: Format) -> Result<UartSource, UartError> {
        format.validate()?;
        let source = UartSource {
            shared: Rc::new(Shared {
                line: line.clone(),
                queue: WordQueue::new(),
                active: Cell::new(false),
                idle: Event::new(),
                frames: Cell::new(0),
            }),
            sched: sim.scheduler(),
            format: Cell::new(format),
            task: RefCell::new(None),
        };

        info!(
            line = line.name(),
            baud = format.baud,
            bits = format.bits,
            stop_bits = format.stop_bits,
            parity = %format.parity,
            "UART source"
        );

        line.set(true);
        source.shared.idle.set();
        source.spawn_loop()?;
        Ok(source)
    }

    /// Kill the timing loop and start a new one with the current format.
    pub fn restart(&self) -> Result<(), UartError> {
        info!(line = self.shared.line.name(), format = %self.format(), "UART source restart");
        self.spawn_loop()
    }

    fn spawn_loop(&self) -> Result<(), UartError> {
        let s = &self.shared;
        if let Some(task) = self.task.borrow_mut().take() {
            if s.active.get() {
                trace!(line = s.line.name(), "abandoning frame in flight");
            }
            task.abort();
        }
        s.active.set(false);
        if s.queue.is_empty() {
            s.idle.set();
        }
        let task = self.sched.spawn(run(s.clone(), self.sched.clone(), self.format.get()))?;
        *self.task.borrow_mut() = Some(task);
        Ok(())
    }

    pub fn format(&self) -> Format {
        self.format.get()
    }

    /// Validate, swap in `format` and restart.  A rejected format leaves
    /// the running loop untouched.
    pub fn set_format(&self, format: Format) -> Result<(), UartError> {
        format.validate()?;
        self.format.set(format);
        self.restart()
    }

    pub fn baud(&self) -> u32 {
        self.format().baud
    }

    pub fn set_baud(&self, baud: u32) -> Result<(), UartError> {
        self.set_format(Format { baud, ..self.format() })
    }

    pub fn bits(&self) -> u8 {
        self.format().bits
    }

    pub fn set_bits(&self, bits: u8) -> Result<(), UartError> {
        self.set_format(self.format().with_bits(bits))
    }

    pub fn stop_bits(&self) -> f64 {
        self.format().stop_bits
    }

    pub fn set_stop_bits(&self, stop_bits: f64) -> Result<(), UartError> {
        self.set_format(self.format().with_stop_bits(stop_bits))
    }

    pub fn parity(&self) -> Parity {
        self.format().parity
    }

    pub fn set_parity(&self, parity: Parity) -> Result<(), UartError> {
        self.set_format(self.format().with_parity(parity))
    }

    fn checked<I>(&self, data: I) -> Result<Vec<Word>, UartError>
    where
        I: IntoIterator,
        I::Item: Into<Word>,
    {
        let format = self.format();
        data.into_iter()
            .map(|w| format.check_word(w.into()))
            .collect()
    }

    /// Queue words for transmission.  Nothing is queued if any word is
    /// wider than the word width.
    pub async fn write<I>(&self, data: I) -> Result<(), UartError>
    where
        I: IntoIterator,
        I::Item: Into<Word>,
    {
        for word in self.checked(data)? {
            // Unbounded queue: never suspends.
            self.shared.queue.push(word);
            self.shared.idle.clear();
        }
        Ok(())
    }

    pub fn write_nowait<I>(&self, data: I) -> Result<(), UartError>
    where
        I: IntoIterator,
        I::Item: Into<Word>,
    {
        let words = self.checked(data)?;
        if words.is_empty() {
            return Ok(());
        }
        for word in words {
            self.shared.queue.push(word);
        }
        self.shared.idle.clear();
        Ok(())
    }

    /// Words queued and not yet started.
    pub fn count(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.is_empty() && !self.shared.active.get()
    }

    /// Frames sent completely, stop phase included.
    pub fn frames(&self) -> u64 {
        self.shared.frames.get()
    }

    /// Drop queued words.  A frame in flight is finished.
    pub fn clear(&self) {
        self.shared.queue.clear();
        if !self.shared.active.get() {
            self.shared.idle.set();
        }
    }

    /// Suspend until the queue is empty and the last frame is out.
    pub async fn wait(&self) {
        while !self.is_idle() {
            self.shared.idle.clear();
            self.shared.idle.wait().await;
        }
    }
}

impl Drop for UartSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run(s: Rc<Shared>, sched: Scheduler, format: Format) {
    let timing = format.timing();

    // Previous loop may have been killed mid frame with the line low.
    s.line.set(true);

    loop {
        if s.queue.is_empty() {
            s.active.set(false);
            s.idle.set();
        }

        let word = s.queue.get().await;
        s.active.set(true);

        debug!(line = s.line.name(), "Write byte 0x{:02x}", word);

        for phase in Framer::new(word, &format, timing) {
            s.line.set(phase.level);
            sched.delay(phase.duration).await;
        }
        s.frames.set(s.frames.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDuration;

    #[test]
    fn test_starts_idle_high() {
        let sim = Sim::new();
        let line = Line::new("txd");
        let source = UartSource::new(&sim, &line, Format::new(115200)).unwrap();
        sim.run();
        assert!(line.get());
        assert!(source.is_idle());
        assert!(source.is_empty());
        assert_eq!(source.count(), 0);
    }

    #[test]
    fn test_rejects_wide_word() {
        let sim = Sim::new();
        let line = Line::new("txd");
        let source = UartSource::new(&sim, &line, Format::new(115200).with_bits(7)).unwrap();
        let err = source.write_nowait([0x10u8, 0x80]).unwrap_err();
        assert_eq!(err, UartError::WordTooWide { word: 0x80, bits: 7 });
        assert!(source.is_empty());
        assert!(source.is_idle());
    }

    #[test]
    fn test_rejects_bad_format() {
        let sim = Sim::new();
        let line = Line::new("txd");
        assert!(UartSource::new(&sim, &line, Format::new(0)).is_err());
        let source = UartSource::new(&sim, &line, Format::new(9600)).unwrap();
        assert!(source.set_bits(0).is_err());
        assert_eq!(source.bits(), 8);
    }

    #[test]
    fn test_drives_frame() {
        let sim = Sim::new();
        let line = Line::new("txd");
        let format = Format::new(115200);
        let bit = format.bit_time();
        let source = UartSource::new(&sim, &line, format).unwrap();
        source.write_nowait([0x01u8]).unwrap();
        assert!(!source.is_idle());

        // Sample in the middle of each slot.
        let mut seen = vec![];
        sim.run_for(SimDuration::from(bit.ticks() / 2));
        for _ in 0..10 {
            seen.push(line.get());
            sim.run_for(bit);
        }
        assert_eq!(
            seen,
            vec![false, true, false, false, false, false, false, false, false, true]
        );
        sim.run();
        assert!(source.is_idle());
        assert_eq!(source.frames(), 1);
    }

    #[test]
    fn test_clear_keeps_frame_in_flight() {
        let sim = Sim::new();
        let line = Line::new("txd");
        let format = Format::new(115200);
        let source = UartSource::new(&sim, &line, format).unwrap();
        source.write_nowait([1u8, 2, 3]).unwrap();
        sim.run_for(format.bit_time());
        assert_eq!(source.count(), 2);
        source.clear();
        assert!(source.is_empty());
        assert!(!source.is_idle());
        sim.block_on(source.wait()).unwrap();
        assert_eq!(source.frames(), 1);
        assert_eq!(sim.now().ticks(), format.frame_time().ticks());
    }
}
