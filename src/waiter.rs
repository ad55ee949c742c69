//! FIFO queue of callers blocked on a saturated pool

use crate::connection::IdleConnection;
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Single-slot delivery channel owned by one waiting caller
enum Slot<C> {
    Blocking(Sender<IdleConnection<C>>),
    Async(oneshot::Sender<IdleConnection<C>>),
}

struct Waiter<C> {
    id: u64,
    slot: Slot<C>,
    enqueued_at: Instant,
}

impl<C> Waiter<C> {
    /// Hands the connection back if the receiving side has gone away.
    fn deliver(self, conn: IdleConnection<C>) -> Result<(), IdleConnection<C>> {
        match self.slot {
            Slot::Blocking(tx) => tx.try_send(conn).map_err(|e| e.into_inner()),
            Slot::Async(tx) => tx.send(conn),
        }
    }
}

/// Outcome of a hand-off attempt
pub(crate) struct Handoff {
    /// How long the satisfied waiter spent in the queue
    pub waited: Duration,
    /// Waiters skipped because they had already given up
    pub abandoned: usize,
}

pub(crate) struct WaiterQueue<C> {
    queue: VecDeque<Waiter<C>>,
    next_id: u64,
}

impl<C> Default for WaiterQueue<C> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 0,
        }
    }
}

impl<C> WaiterQueue<C> {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    fn push(&mut self, slot: Slot<C>) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.queue.push_back(Waiter {
            id,
            slot,
            enqueued_at: Instant::now(),
        });
        id
    }

    /// Enqueue a thread-blocking waiter
    pub fn push_blocking(&mut self) -> (u64, Receiver<IdleConnection<C>>) {
        let (tx, rx) = channel::bounded(1);
        (self.push(Slot::Blocking(tx)), rx)
    }

    /// Enqueue a task waiter
    pub fn push_async(&mut self) -> (u64, oneshot::Receiver<IdleConnection<C>>) {
        let (tx, rx) = oneshot::channel();
        (self.push(Slot::Async(tx)), rx)
    }

    /// Give the connection to the oldest waiter still listening.
    ///
    /// Waiters whose receiver is gone are dropped from the queue on the way.
    /// If nobody takes it the connection is handed back.
    pub fn hand_off(&mut self, mut conn: IdleConnection<C>) -> Result<Handoff, IdleConnection<C>> {
        let mut abandoned = 0;
        while let Some(waiter) = self.queue.pop_front() {
            let waited = waiter.enqueued_at.elapsed();
            match waiter.deliver(conn) {
                Ok(()) => return Ok(Handoff { waited, abandoned }),
                Err(returned) => {
                    abandoned += 1;
                    conn = returned;
                }
            }
        }
        Err(conn)
    }

    /// Remove a waiter that stopped waiting. Returns `false` if it was already served.
    pub fn remove(&mut self, id: u64) -> bool {
        // The caller giving up is usually near the front.
        match self.queue.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drop every pending slot; receivers observe a closed channel.
    pub fn close_all(&mut self) -> usize {
        let closed = self.queue.len();
        self.queue.clear();
        closed
    }
}
