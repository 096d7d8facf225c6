// Notification and queue primitives for simulation tasks.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::Word;

/// Wakers of suspended futures, keyed per future.  A future re-polled
/// before it is woken replaces its own entry, and removes it on drop.
#[derive(Default)]
pub(crate) struct WaitList {
    next: Cell<u64>,
    wakers: RefCell<BTreeMap<u64, Waker>>,
}

impl WaitList {
    pub(crate) fn register(&self, key: &mut Option<u64>, waker: &Waker) {
        let k = *key.get_or_insert_with(|| {
            let k = self.next.get();
            self.next.set(k + 1);
            k
        });
        self.wakers.borrow_mut().insert(k, waker.clone());
    }

    pub(crate) fn remove(&self, key: &mut Option<u64>) {
        if let Some(k) = key.take() {
            self.wakers.borrow_mut().remove(&k);
        }
    }

    pub(crate) fn wake_all(&self) {
        let wakers = std::mem::take(&mut *self.wakers.borrow_mut());
        for w in wakers.into_values() {
            w.wake();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.wakers.borrow().len()
    }
}

/// Sticky flag with any number of waiters.  A `set` with nobody
/// waiting is not lost: later waiters return at once until `clear`.
#[derive(Default)]
pub struct Event {
    flag: Cell<bool>,
    waiters: WaitList,
}

impl Event {
    pub fn new() -> Event {
        Event::default()
    }

    pub fn set(&self) {
        self.flag.set(true);
        self.waiters.wake_all();
    }

    pub fn clear(&self) {
        self.flag.set(false);
    }

    pub fn is_set(&self) -> bool {
        self.flag.get()
    }

    pub fn wait(&self) -> EventWait<'_> {
        EventWait {
            event: self,
            key: None,
        }
    }

    /// Futures currently suspended on this event.
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }
}

pub struct EventWait<'a> {
    event: &'a Event,
    key: Option<u64>,
}

impl Future for EventWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.event.flag.get() {
            this.event.waiters.remove(&mut this.key);
            return Poll::Ready(());
        }
        this.event.waiters.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl Drop for EventWait<'_> {
    fn drop(&mut self) {
        self.event.waiters.remove(&mut self.key);
    }
}

/// Unbounded FIFO of words.
#[derive(Default)]
pub struct WordQueue {
    items: RefCell<VecDeque<Word>>,
    getters: WaitList,
}

impl WordQueue {
    pub fn new() -> WordQueue {
        WordQueue::default()
    }

    pub fn push(&self, word: Word) {
        self.items.borrow_mut().push_back(word);
        self.getters.wake_all();
    }

    pub fn try_pop(&self) -> Option<Word> {
        self.items.borrow_mut().pop_front()
    }

    /// Suspend until a word is available and take it.
    pub fn get(&self) -> QueueGet<'_> {
        QueueGet {
            queue: self,
            key: None,
        }
    }

    /// Take up to `count` words, all of them for None.
    pub fn drain(&self, count: Option<usize>) -> Vec<Word> {
        let mut items = self.items.borrow_mut();
        let n = count.map_or(items.len(), |c| c.min(items.len()));
        items.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
    }
}

pub struct QueueGet<'a> {
    queue: &'a WordQueue,
    key: Option<u64>,
}

impl Future for QueueGet<'_> {
    type Output = Word;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Word> {
        let this = self.get_mut();
        match this.queue.try_pop() {
            Some(word) => {
                this.queue.getters.remove(&mut this.key);
                Poll::Ready(word)
            }
            None => {
                this.queue.getters.register(&mut this.key, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl Drop for QueueGet<'_> {
    fn drop(&mut self) {
        self.queue.getters.remove(&mut self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Sim, SimDuration};
    use futures::task::noop_waker_ref;
    use std::rc::Rc;

    #[test]
    fn test_set_before_wait_is_kept() {
        let sim = Sim::new();
        let ev = Event::new();
        ev.set();
        sim.block_on(ev.wait()).unwrap();
        ev.clear();
        assert!(!ev.is_set());
        assert!(sim.block_on(ev.wait()).is_err());
    }

    #[test]
    fn test_set_wakes_all_waiters() {
        let sim = Sim::new();
        let ev = Rc::new(Event::new());
        let woken = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let ev = ev.clone();
            let woken = woken.clone();
            sim.spawn(async move {
                ev.wait().await;
                woken.set(woken.get() + 1);
            })
            .unwrap();
        }
        sim.run();
        assert_eq!(woken.get(), 0);
        ev.set();
        sim.run();
        assert_eq!(woken.get(), 3);
    }

    #[test]
    fn test_queue_fifo() {
        let q = WordQueue::new();
        for w in [3, 1, 2] {
            q.push(w);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.drain(Some(2)), vec![3, 1]);
        assert_eq!(q.drain(Some(10)), vec![2]);
        assert!(q.is_empty());
        assert_eq!(q.drain(None), Vec::<Word>::new());
    }

    #[test]
    fn test_get_suspends_until_push() {
        let sim = Sim::new();
        let s = sim.scheduler();
        let q = Rc::new(WordQueue::new());
        let producer = q.clone();
        sim.spawn(async move {
            s.delay(SimDuration::from_ns(7)).await;
            producer.push(0x42);
        })
        .unwrap();
        assert_eq!(sim.block_on(q.get()).unwrap(), 0x42);
        assert_eq!(sim.now().ticks(), SimDuration::from_ns(7).ticks());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let q = WordQueue::new();
        q.clear();
        assert!(q.is_empty());
        q.push(1);
        q.clear();
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn test_repoll_keeps_one_registration() {
        let ev = Event::new();
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut wait = ev.wait();
        for _ in 0..5 {
            assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        }
        assert_eq!(ev.waiting(), 1);
        drop(wait);
        assert_eq!(ev.waiting(), 0);
    }

    #[test]
    fn test_abandoned_waits_unregister() {
        let sim = Sim::new();
        let s = sim.scheduler();
        let ev = Event::new();
        for _ in 0..1000 {
            let timed = async {
                let wait = std::pin::pin!(ev.wait());
                let _ = futures::future::select(wait, s.delay(SimDuration::from_ns(1))).await;
            };
            sim.block_on(timed).unwrap();
        }
        assert_eq!(ev.waiting(), 0);

        let q = WordQueue::new();
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut get = q.get();
        assert!(Pin::new(&mut get).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut get).poll(&mut cx).is_pending());
        assert_eq!(q.getters.len(), 1);
        drop(get);
        assert_eq!(q.getters.len(), 0);
    }
}
