// Single wire line signal.
//
// One writer (the source) and one reader (the sink) by convention.  A
// fresh line idles high.  Writing the current level is not an edge.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::sync::WaitList;

struct State {
    name: String,
    level: Cell<bool>,
    falling: Cell<u64>,
    rising: Cell<u64>,
    waiters: WaitList,
}

#[derive(Clone)]
pub struct Line {
    state: Rc<State>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Falling,
    Rising,
}

impl Line {
    pub fn new(name: impl Into<String>) -> Line {
        Line {
            state: Rc::new(State {
                name: name.into(),
                level: Cell::new(true),
                falling: Cell::new(0),
                rising: Cell::new(0),
                waiters: WaitList::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn get(&self) -> bool {
        self.state.level.get()
    }

    pub fn set(&self, level: bool) {
        let s = &self.state;
        if s.level.replace(level) == level {
            return;
        }
        let count = if level { &s.rising } else { &s.falling };
        count.set(count.get() + 1);
        s.waiters.wake_all();
    }

    /// Number of high to low transitions so far.
    pub fn falling_edges(&self) -> u64 {
        self.state.falling.get()
    }

    pub fn rising_edges(&self) -> u64 {
        self.state.rising.get()
    }

    fn edges(&self, edge: Edge) -> u64 {
        match edge {
            Edge::Falling => self.falling_edges(),
            Edge::Rising => self.rising_edges(),
        }
    }

    /// Completes on the first `edge` after this call.
    pub fn edge(&self, edge: Edge) -> EdgeWait {
        EdgeWait {
            line: self.clone(),
            edge,
            seen: self.edges(edge),
            key: None,
        }
    }

    pub fn falling_edge(&self) -> EdgeWait {
        self.edge(Edge::Falling)
    }

    pub fn rising_edge(&self) -> EdgeWait {
        self.edge(Edge::Rising)
    }

    /// True when both handles refer to the same wire.
    pub fn same_wire(&self, other: &Line) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("name", &self.state.name)
            .field("level", &self.state.level.get())
            .finish()
    }
}

pub struct EdgeWait {
    line: Line,
    edge: Edge,
    seen: u64,
    key: Option<u64>,
}

impl Future for EdgeWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let waiters = &this.line.state.waiters;
        if this.line.edges(this.edge) != this.seen {
            waiters.remove(&mut this.key);
            return Poll::Ready(());
        }
        waiters.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl Drop for EdgeWait {
    fn drop(&mut self) {
        self.line.state.waiters.remove(&mut self.key);
    }
}
