// Bounded Buffer - fixed capacity in-memory FIFO shared by producers and workers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Why a non-blocking push was refused; the item is handed back
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

impl<T> TryPushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryPushError::Full(item) | TryPushError::Closed(item) => item,
        }
    }
}

/// Fixed-capacity FIFO
///
/// `push` and `pop` are cancel-safe: an item is only moved in or out on the
/// synchronous path, never across an await point.
pub struct BoundedBuffer<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Insert without waiting
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        {
            // Checked under the lock so a push cannot land after close + drain
            let mut items = self.lock();
            if self.is_closed() {
                return Err(TryPushError::Closed(item));
            }
            if items.len() >= self.capacity {
                return Err(TryPushError::Full(item));
            }
            items.push_back(item);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert, waiting for space; hands the item back if the buffer is closed
    pub async fn push(&self, mut item: T) -> Result<(), T> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Closed(rejected)) => return Err(rejected),
                Err(TryPushError::Full(rejected)) => item = rejected,
            }
            notified.await;
        }
    }

    /// Put previously popped items back at the head, ignoring capacity
    ///
    /// Used to return a batch that was taken but never delivered, so it keeps its place.
    pub fn push_front_all(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        {
            let mut items = self.lock();
            for item in batch.into_iter().rev() {
                items.push_front(item);
            }
        }
        self.not_empty.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        self.take_front(None)
    }

    /// Remove the oldest item, waiting while empty; `None` once closed and empty
    pub async fn pop(&self) -> Option<T> {
        self.pop_inner(None).await
    }

    /// Like [`pop`](Self::pop), but increments `taken` before the lock is released
    ///
    /// An observer that sees the item gone from the buffer also sees the count.
    pub async fn pop_tracked(&self, taken: &AtomicUsize) -> Option<T> {
        self.pop_inner(Some(taken)).await
    }

    async fn pop_inner(&self, taken: Option<&AtomicUsize>) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.take_front(taken) {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    fn take_front(&self, taken: Option<&AtomicUsize>) -> Option<T> {
        let item = {
            let mut items = self.lock();
            let item = items.pop_front();
            if let (Some(_), Some(taken)) = (&item, taken) {
                taken.fetch_add(1, Ordering::SeqCst);
            }
            item
        };
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Take everything currently buffered, oldest first
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.lock().drain(..).collect();
        if !drained.is_empty() {
            self.not_full.notify_waiters();
        }
        drained
    }

    /// Refuse further pushes and release every waiter
    pub fn close(&self) {
        {
            let _items = self.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
