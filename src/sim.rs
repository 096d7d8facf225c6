/* Discrete event simulation engine.

A single threaded executor running on virtual time.  Tasks are plain
futures.  They suspend on delays, line edges, queues and events, and
the engine only advances time when every task is blocked.

Time resolution is one picosecond.

*/

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::{pin, Pin};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use derive_more::{Add, AddAssign, Display, From, Into, Sub};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{AbortHandle, Abortable};
use futures::task::{waker, ArcWake, LocalSpawnExt};

use crate::error::UartError;

/// Simulation ticks per second.
pub const TICKS_PER_SECOND: u64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    S,
}

impl TimeUnit {
    /// Ticks in one unit, or the divisor for units below the resolution.
    fn scale(self) -> (u64, u64) {
        match self {
            TimeUnit::Fs => (1, 1_000),
            TimeUnit::Ps => (1, 1),
            TimeUnit::Ns => (1_000, 1),
            TimeUnit::Us => (1_000_000, 1),
            TimeUnit::Ms => (1_000_000_000, 1),
            TimeUnit::S => (TICKS_PER_SECOND, 1),
        }
    }
}

/// Relative simulation time, in ticks.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Add, Sub, AddAssign, From, Into)]
#[display(fmt = "{} ps", _0)]
pub struct SimDuration(u64);

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    /// Convert from `value` in `unit`; values below the resolution truncate.
    pub fn new(value: u64, unit: TimeUnit) -> SimDuration {
        let (mul, div) = unit.scale();
        SimDuration(value.saturating_mul(mul) / div)
    }

    pub fn from_ns(ns: u64) -> SimDuration {
        SimDuration::new(ns, TimeUnit::Ns)
    }

    pub fn from_us(us: u64) -> SimDuration {
        SimDuration::new(us, TimeUnit::Us)
    }

    /// Truncating conversion from seconds.
    pub fn from_secs_f64(secs: f64) -> SimDuration {
        SimDuration((secs * TICKS_PER_SECOND as f64) as u64)
    }

    pub fn ticks(self) -> u64 {
        self.0
    }

    pub fn as_unit(self, unit: TimeUnit) -> f64 {
        let (mul, div) = unit.scale();
        self.0 as f64 * div as f64 / mul as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_mul(self, n: u64) -> SimDuration {
        SimDuration(self.0.saturating_mul(n))
    }
}

/// Absolute simulation time, in ticks since the start of the run.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(From, Into)]
#[display(fmt = "{} ps", _0)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` lies ahead.
    pub fn since(self, earlier: SimTime) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl std::ops::Add<SimDuration> for SimTime {
    type Output = SimTime;
    fn add(self, d: SimDuration) -> SimTime {
        SimTime(self.0.saturating_add(d.ticks()))
    }
}

impl std::ops::Sub<SimTime> for SimTime {
    type Output = SimDuration;
    fn sub(self, other: SimTime) -> SimDuration {
        self.since(other)
    }
}

// Timer key: deadline, then registration order.
type TimerKey = (SimTime, u64);

struct Clock {
    now: Cell<SimTime>,
    seq: Cell<u64>,
    timers: RefCell<BTreeMap<TimerKey, Waker>>,
    spawner: LocalSpawner,
}

/// Cloneable handle given to components and tasks: current time,
/// delays, spawning.  Holds no reference to the executor itself.
#[derive(Clone)]
pub struct Scheduler {
    clock: Rc<Clock>,
}

/// Handle to a spawned task.  Dropping it does not stop the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    /// Stop the task.  Its future is never polled again.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

impl Scheduler {
    pub fn now(&self) -> SimTime {
        self.clock.now.get()
    }

    /// Suspend the calling task for `duration`.
    pub fn delay(&self, duration: SimDuration) -> Delay {
        Delay {
            clock: self.clock.clone(),
            deadline: self.now() + duration,
            key: None,
        }
    }

    /// Suspend until absolute time `deadline`.
    pub fn delay_until(&self, deadline: SimTime) -> Delay {
        Delay {
            clock: self.clock.clone(),
            deadline,
            key: None,
        }
    }

    pub fn spawn<F>(&self, future: F) -> Result<TaskHandle, UartError>
    where
        F: Future<Output = ()> + 'static,
    {
        let (abort, registration) = AbortHandle::new_pair();
        let task = Abortable::new(future, registration);
        self.clock
            .spawner
            .spawn_local(async move {
                let _ = task.await;
            })
            .map_err(|e| UartError::Spawn(e.to_string()))?;
        Ok(TaskHandle { abort })
    }

    fn next_deadline(&self) -> Option<SimTime> {
        self.clock.timers.borrow().keys().next().map(|&(t, _)| t)
    }

    // Jump to `t` and wake every timer due at or before it.
    fn advance_to(&self, t: SimTime) {
        if t > self.now() {
            self.clock.now.set(t);
        }
        let due: Vec<Waker> = {
            let mut timers = self.clock.timers.borrow_mut();
            let later = timers.split_off(&(self.now(), u64::MAX));
            std::mem::replace(&mut *timers, later).into_values().collect()
        };
        for w in due {
            w.wake();
        }
    }
}

/// Future returned by `Scheduler::delay`.
pub struct Delay {
    clock: Rc<Clock>,
    deadline: SimTime,
    key: Option<TimerKey>,
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.clock.now.get() >= self.deadline {
            if let Some(key) = self.key.take() {
                self.clock.timers.borrow_mut().remove(&key);
            }
            return Poll::Ready(());
        }
        let key = match self.key {
            Some(key) => key,
            None => {
                let seq = self.clock.seq.get();
                self.clock.seq.set(seq + 1);
                let key = (self.deadline, seq);
                self.key = Some(key);
                key
            }
        };
        self.clock.timers.borrow_mut().insert(key, cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.clock.timers.borrow_mut().remove(&key);
        }
    }
}

/// Owner of the executor.  Drives tasks and advances virtual time.
pub struct Sim {
    pool: RefCell<LocalPool>,
    scheduler: Scheduler,
}

impl Default for Sim {
    fn default() -> Self {
        Sim::new()
    }
}

struct Flag(AtomicBool);

impl ArcWake for Flag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::Release);
    }
}

impl Sim {
    pub fn new() -> Sim {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Sim {
            pool: RefCell::new(pool),
            scheduler: Scheduler {
                clock: Rc::new(Clock {
                    now: Cell::new(SimTime::ZERO),
                    seq: Cell::new(0),
                    timers: RefCell::new(BTreeMap::new()),
                    spawner,
                }),
            },
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn spawn<F>(&self, future: F) -> Result<TaskHandle, UartError>
    where
        F: Future<Output = ()> + 'static,
    {
        self.scheduler.spawn(future)
    }

    // Run every ready task at the current instant.
    fn settle(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Run until absolute time `deadline`.  Time ends exactly there.
    pub fn run_until(&self, deadline: SimTime) {
        loop {
            self.settle();
            match self.scheduler.next_deadline() {
                Some(t) if t <= deadline => self.scheduler.advance_to(t),
                _ => break,
            }
        }
        self.scheduler.advance_to(deadline);
        self.settle();
    }

    pub fn run_for(&self, duration: SimDuration) {
        self.run_until(self.now() + duration);
    }

    /// Run until no timer is pending.  Tasks blocked on edges or queues
    /// stay blocked.
    pub fn run(&self) {
        loop {
            self.settle();
            match self.scheduler.next_deadline() {
                Some(t) => self.scheduler.advance_to(t),
                None => break,
            }
        }
    }

    /// Drive the simulation until `future` completes.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, UartError> {
        let flag = Arc::new(Flag(AtomicBool::new(true)));
        let w = waker(flag.clone());
        let mut cx = Context::from_waker(&w);
        let mut future = pin!(future);
        loop {
            if flag.0.swap(false, Ordering::AcqRel) {
                if let Poll::Ready(out) = future.as_mut().poll(&mut cx) {
                    return Ok(out);
                }
            }
            self.settle();
            if flag.0.load(Ordering::Acquire) {
                continue;
            }
            match self.scheduler.next_deadline() {
                Some(t) => self.scheduler.advance_to(t),
                None => return Err(UartError::Stalled),
            }
        }
    }
}
