//! UART sink: samples a line and deserializes frames into a queue.
//!
//! The timing loop blocks on a falling edge, then samples at bit
//! centers.  A false start edge is committed to like a real receiver
//! would: there is no glitch rejection.  Parity mismatches are logged
//! and counted; the word is delivered anyway.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;

use futures::future::select;
use tracing::{debug, info, trace, warn};

use crate::error::UartError;
use crate::format::Format;
use crate::line::Line;
use crate::parity::Parity;
use crate::sim::{Scheduler, Sim, SimDuration, TaskHandle};
use crate::sync::{Event, WordQueue};
use crate::tick::{Sampler, Tick};
use crate::Word;

struct Shared {
    line: Line,
    queue: WordQueue,
    active: Cell<bool>,
    sync: Event,
    frames: Cell<u64>,
    parity_errors: Cell<u64>,
}

pub struct UartSink {
    shared: Rc<Shared>,
    sched: Scheduler,
    format: Cell<Format>,
    task: RefCell<Option<TaskHandle>>,
}

impl UartSink {
    pub fn new(sim: &Sim, line: &Line, format: Format) -> Result<UartSink, UartError> {
        format.validate()?;
        let sink = UartSink {
            shared: Rc::new(Shared {
                line: line.clone(),
                queue: WordQueue::new(),
                active: Cell::new(false),
                sync: Event::new(),
                frames: Cell::new(0),
                parity_errors: Cell::new(0),
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
            "UART sink"
        );

        sink.spawn_loop()?;
        Ok(sink)
    }

    /// Kill the sampling loop and start a new one with the current format.
    pub fn restart(&self) -> Result<(), UartError> {
        info!(line = self.shared.line.name(), format = %self.format(), "UART sink restart");
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
        let task = self.sched.spawn(run(s.clone(), self.sched.clone(), self.format.get()))?;
        *self.task.borrow_mut() = Some(task);
        Ok(())
    }

    pub fn format(&self) -> Format {
        self.format.get()
    }

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

    /// Suspend until data is available, then take up to `count` words
    /// (all of them for None).
    pub async fn read(&self, count: Option<usize>) -> Vec<Word> {
        while self.is_empty() {
            self.shared.sync.clear();
            self.shared.sync.wait().await;
        }
        self.read_nowait(count)
    }

    /// Take up to `count` words without suspending; possibly none.
    pub fn read_nowait(&self, count: Option<usize>) -> Vec<Word> {
        self.shared.queue.drain(count)
    }

    pub fn count(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Not sampling a frame right now.
    pub fn is_idle(&self) -> bool {
        !self.shared.active.get()
    }

    pub fn clear(&self) {
        self.shared.queue.clear();
    }

    /// Frames received since construction.
    pub fn frames(&self) -> u64 {
        self.shared.frames.get()
    }

    /// Parity mismatches seen since construction.
    pub fn parity_errors(&self) -> u64 {
        self.shared.parity_errors.get()
    }

    /// Suspend until data is available or `timeout` elapses.  Callers
    /// must check `is_empty` afterwards.
    pub async fn wait(&self, timeout: Option<SimDuration>) {
        if !self.is_empty() {
            return;
        }
        self.shared.sync.clear();
        match timeout {
            Some(timeout) => {
                let data = pin!(self.shared.sync.wait());
                let timer = self.sched.delay(timeout);
                let _ = select(data, timer).await;
            }
            None => self.shared.sync.wait().await,
        }
    }
}

impl Drop for UartSink {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

fn run(s: Rc<Shared>, sched: Scheduler, format: Format) -> impl Future<Output = ()> {
    // Armed before the first poll: a start edge driven in the same
    // instant the loop is spawned is not lost.
    let mut edge = s.line.falling_edge();

    async move {
        let timing = format.timing();

        loop {
            edge.await;
            s.active.set(true);

            let mut sampler = Sampler::new(&format, timing);
            let mut received = None;
            while let Some(wait) = sampler.wait() {
                sched.delay(wait).await;
                if let Some(rx) = sampler.tick(s.line.get()) {
                    received = Some(rx);
                }
            }

            if let Some(rx) = received {
                if rx.parity_error() {
                    s.parity_errors.set(s.parity_errors.get() + 1);
                    warn!(
                        line = s.line.name(),
                        sampled = ?rx.parity,
                        expected = ?rx.expected,
                        "Parity error on byte 0x{:02x}",
                        rx.word
                    );
                }
                debug!(line = s.line.name(), "Read byte 0x{:02x}", rx.word);
                s.queue.push(rx.word);
                s.frames.set(s.frames.get() + 1);
                s.sync.set();
            }

            s.active.set(false);
            edge = s.line.falling_edge();
        }
    }
}
