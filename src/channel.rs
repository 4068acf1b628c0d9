//! Bounded typed channel with blocking send/receive and closure.
//!
//! A channel is a [`Ring`] guarded by a mutex, two condition variables
//! ("not empty" / "not full"), and a closed flag, shared by reference-counted
//! [`Sender`] and [`Receiver`] endpoints. Any number of senders and
//! receivers may operate concurrently; the mutex serializes each operation's
//! critical section and exactly one waiter is woken per slot change.
//!
//! # Closure semantics
//! - `close()` is idempotent and wakes every waiter on both conditions.
//! - After close, `send` returns the value back via [`SendError`].
//! - Receivers drain whatever is buffered, then observe the closed state:
//!   `recv` returns `None`, `try_recv` returns [`TryRecvError::Closed`].
//! - Dropping the last endpoint of either side closes the channel, so a
//!   worker iterating a receiver terminates once all senders are gone.
//!
//! # Ordering
//! Within one channel, received order is send order (FIFO). The mutex and
//! condvars establish the sender-to-receiver happens-before edge.
//!
//! A requested capacity of 0 selects rendezvous-style buffering and is
//! realized as an internal capacity of 1.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::ring::Ring;

/// Creates a bounded channel, returning its two endpoints.
///
/// `capacity` bounds how many sent values may be buffered before `send`
/// blocks. Capacity 0 is the rendezvous request and behaves as capacity 1.
///
/// Both endpoints are cloneable; the channel closes when `close()` is called
/// explicitly or when the last endpoint of either side drops.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            ring: Ring::with_capacity(capacity.max(1)),
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        closed: AtomicBool::new(false),
        senders: AtomicUsize::new(1),
        receivers: AtomicUsize::new(1),
    });

    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

struct Inner<T> {
    ring: Ring<T>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    closed: AtomicBool,
    senders: AtomicUsize,
    receivers: AtomicUsize,
}

impl<T> Shared<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the channel and wakes every waiter on both conditions.
    ///
    /// The flag is set while holding the buffer mutex so a waiter cannot
    /// re-check the predicate between our store and our notify and then
    /// sleep forever.
    fn close(&self) {
        let guard = self.inner.lock().expect("channel mutex poisoned");
        self.closed.store(true, Ordering::Release);
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Sending endpoint of a channel. Cloneable; all clones feed the same
/// buffer.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Sends `value`, blocking while the buffer is full.
    ///
    /// If the channel is closed, or closes while this call is blocked
    /// waiting for space, the value is handed back in [`SendError`].
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let shared = &*self.shared;

        if shared.is_closed() {
            return Err(SendError(value));
        }

        let mut inner = shared.inner.lock().expect("channel mutex poisoned");
        while inner.ring.is_full() {
            if shared.is_closed() {
                return Err(SendError(value));
            }
            inner = shared
                .not_full
                .wait(inner)
                .expect("channel mutex poisoned");
        }
        if shared.is_closed() {
            return Err(SendError(value));
        }

        match inner.ring.push(value) {
            Ok(()) => {}
            Err(_) => unreachable!("ring full after not-full wait"),
        }
        drop(inner);

        shared.not_empty.notify_one();
        Ok(())
    }

    /// Closes the channel. Idempotent; safe under concurrent senders and
    /// receivers.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}

/// Receiving endpoint of a channel. Cloneable; all clones drain the same
/// buffer.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Receives the next value, blocking while the buffer is empty.
    ///
    /// Returns `None` exactly when the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let shared = &*self.shared;
        let mut inner = shared.inner.lock().expect("channel mutex poisoned");

        loop {
            if let Some(value) = inner.ring.pop() {
                drop(inner);
                shared.not_full.notify_one();
                return Some(value);
            }
            if shared.is_closed() {
                return None;
            }
            inner = shared
                .not_empty
                .wait(inner)
                .expect("channel mutex poisoned");
        }
    }

    /// Non-blocking receive.
    ///
    /// Buffered values are yielded even after close; [`TryRecvError::Closed`]
    /// means closed *and* drained, [`TryRecvError::Empty`] means the channel
    /// is open with nothing buffered right now.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let shared = &*self.shared;
        let mut inner = shared.inner.lock().expect("channel mutex poisoned");

        if let Some(value) = inner.ring.pop() {
            drop(inner);
            shared.not_full.notify_one();
            return Ok(value);
        }
        drop(inner);

        if shared.is_closed() {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Closes the channel. Idempotent; safe under concurrent senders and
    /// receivers.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Blocking iterator over received values; ends at closed-and-drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { receiver: self }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.receivers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if self.shared.receivers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}

/// Blocking borrowing iterator returned by [`Receiver::iter`].
pub struct Iter<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv()
    }
}

/// Blocking owning iterator over a receiver.
pub struct IntoIter<T> {
    receiver: Receiver<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv()
    }
}

impl<T> IntoIterator for Receiver<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { receiver: self }
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Error from [`Sender::send`] on a closed channel; carries the unsent
/// value back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Error from [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Channel is open but currently holds no values.
    Empty,
    /// Channel is closed and fully drained.
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => f.write_str("receiving on an empty channel"),
            TryRecvError::Closed => f.write_str("receiving on a closed channel"),
        }
    }
}

impl std::error::Error for TryRecvError {}
