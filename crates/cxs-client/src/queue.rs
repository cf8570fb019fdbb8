// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! FIFO buffer of records awaiting batched (re)delivery.
//!
//! Many producers enqueue (every direct send that hits a retryable failure), exactly one
//! consumer dequeues (the batch scheduler). Each operation takes the lock once and never
//! awaits while holding it, so a task cancelled at any await point cannot leave a record
//! half-enqueued.
//!
//! The queue is unbounded by default. A bounded queue applies an [`OverflowPolicy`] when
//! full; displaced records are handed back to the caller so they can be recorded instead of
//! silently dropped.
//!
//! [`EventQueue::close`] takes the final contents and refuses every later record, including
//! those from producers already waiting on a full queue, so nothing can be left behind once
//! the last sweep has run.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// What a bounded queue does with a record that arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest resident record to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming record.
    DropNewest,
    /// Wait until the consumer frees a slot.
    Block,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop_oldest" => Ok(Self::DropOldest),
            "drop_newest" => Ok(Self::DropNewest),
            "block" => Ok(Self::Block),
            other => Err(format!(
                "unknown overflow policy '{other}', expected drop_oldest, drop_newest or block"
            )),
        }
    }
}

/// What happened to a record handed to [`EventQueue::enqueue`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<R> {
    Accepted,
    /// The record was accepted but this one was displaced by the overflow policy; it may be
    /// the incoming record itself under [`OverflowPolicy::DropNewest`].
    Displaced(R),
    /// The queue was closed and the record was not taken.
    Closed(R),
}

/// A queued record and the number of batch attempts it has already failed.
#[derive(Debug)]
pub struct Pending<R> {
    pub record: R,
    pub attempts: u32,
}

impl<R> Pending<R> {
    #[must_use]
    pub fn new(record: R) -> Self {
        Self {
            record,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn into_record(self) -> R {
        self.record
    }
}

#[derive(Debug)]
struct State<R> {
    entries: VecDeque<Pending<R>>,
    closed: bool,
}

#[derive(Debug)]
pub struct EventQueue<R> {
    state: Mutex<State<R>>,
    available: Notify,
    space: Notify,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
}

impl<R> Default for EventQueue<R> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<R> EventQueue<R> {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None, OverflowPolicy::default())
    }

    #[must_use]
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self::with_capacity(Some(capacity), overflow)
    }

    #[must_use]
    pub fn with_capacity(capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                entries: VecDeque::new(),
                closed: false,
            }),
            available: Notify::new(),
            space: Notify::new(),
            capacity,
            overflow,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record at the tail.
    ///
    /// Only [`OverflowPolicy::Block`] ever waits, and only while a bounded queue is full and
    /// open. A producer waiting when the queue is closed gets its record back.
    pub async fn enqueue(&self, record: R) -> Admission<R> {
        let mut pending = Pending::new(record);
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(pending) {
                Ok(admission) => return admission,
                Err(back) => pending = back,
            }
            space.await;
        }
    }

    /// Returns `Err` with the record when the queue is full under the blocking policy.
    fn try_push(&self, pending: Pending<R>) -> Result<Admission<R>, Pending<R>> {
        let mut state = self.lock();
        if state.closed {
            return Ok(Admission::Closed(pending.into_record()));
        }
        let admission = match self.capacity {
            Some(capacity) if state.entries.len() >= capacity => match self.overflow {
                OverflowPolicy::DropOldest => {
                    let evicted = state.entries.pop_front();
                    state.entries.push_back(pending);
                    evicted.map_or(Admission::Accepted, |p| Admission::Displaced(p.record))
                }
                OverflowPolicy::DropNewest => {
                    return Ok(Admission::Displaced(pending.into_record()))
                }
                OverflowPolicy::Block => return Err(pending),
            },
            _ => {
                state.entries.push_back(pending);
                Admission::Accepted
            }
        };
        drop(state);
        self.available.notify_one();
        Ok(admission)
    }

    /// Puts a record that already failed a batch back at the tail, ignoring capacity so the
    /// scheduler can never deadlock against producers waiting on a full queue.
    pub fn requeue(&self, pending: Pending<R>) {
        self.lock().entries.push_back(pending);
        self.available.notify_one();
    }

    /// Waits until a record is available or `wait` elapses.
    pub async fn dequeue_blocking(&self, wait: Duration) -> Option<Pending<R>> {
        let deadline = Instant::now() + wait;
        loop {
            let available = self.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            if let Some(pending) = self.dequeue_nonblocking() {
                return Some(pending);
            }
            if timeout_at(deadline, available).await.is_err() {
                return self.dequeue_nonblocking();
            }
        }
    }

    /// Takes the head record if there is one.
    pub fn dequeue_nonblocking(&self) -> Option<Pending<R>> {
        let pending = self.lock().entries.pop_front();
        if pending.is_some() {
            self.space.notify_one();
        }
        pending
    }

    /// Takes every resident record in FIFO order.
    pub fn drain(&self) -> Vec<Pending<R>> {
        let drained: Vec<_> = self.lock().entries.drain(..).collect();
        if !drained.is_empty() {
            self.space.notify_waiters();
        }
        drained
    }

    /// Refuses every later record and takes the remaining contents in FIFO order.
    ///
    /// Producers waiting under [`OverflowPolicy::Block`] are woken and receive
    /// [`Admission::Closed`].
    pub fn close(&self) -> Vec<Pending<R>> {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.entries.drain(..).collect()
        };
        self.space.notify_waiters();
        drained
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[must_use]
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }
}
