//! Fixed-capacity ring buffer over heap storage with `MaybeUninit<T>`.
//!
//! # Invariants
//! - `capacity >= 1` (validated at construction).
//! - `head < capacity` and `len <= capacity`.
//! - Slots in the logical range `[head, head + len)` (wrapping by capacity)
//!   are initialized; all other slots are uninitialized.
//!
//! # Threading
//! This type is not synchronized; the enclosing channel buffer provides
//! external synchronization.

use std::mem::MaybeUninit;

/// Fixed-capacity FIFO backed by a single heap allocation.
///
/// Design intent:
/// - Capacity is fixed at construction so backpressure is deterministic.
/// - No allocation after construction; `push`/`pop` are O(1).
/// - Failed operations leave the buffer untouched: `push` on full hands the
///   value back, `pop` on empty returns `None`.
///
/// Capacity is a runtime value (not a const generic) because the channel
/// layer maps a requested capacity of 0 onto an internal capacity of 1, and
/// capacities like 3 or 10 are expected; the index wrap is a compare-and-
/// subtract rather than a power-of-two mask.
///
/// # Invariants
/// - `head` always indexes the logical front.
/// - `len` tracks the number of initialized elements.
/// - The element at logical index `i` lives at `(head + i) % capacity`.
pub struct Ring<T> {
    buf: Box<[MaybeUninit<T>]>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    /// Constructs an empty ring with room for `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. A zero-capacity ring has no valid state;
    /// rendezvous behavior is the channel layer's concern, not this type's.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "Ring capacity must be > 0");

        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, MaybeUninit::uninit);

        Self {
            buf: buf.into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of initialized elements currently stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when no elements are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true when `len == capacity`.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Physical slot for logical index `i`, `i < 2 * capacity`.
    #[inline]
    fn wrap(&self, i: usize) -> usize {
        debug_assert!(i < 2 * self.capacity());
        if i >= self.capacity() {
            i - self.capacity()
        } else {
            i
        }
    }

    /// Attempts to append `value`, returning `Err(value)` if the buffer is
    /// already full.
    ///
    /// Ownership stays with the caller on overflow instead of dropping
    /// silently.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }

        let tail = self.wrap(self.head + self.len);
        debug_assert!(tail < self.capacity());

        // SAFETY: tail < capacity by `wrap`, and the slot is outside
        // [head, head + len) so it is currently uninitialized.
        unsafe { self.buf.get_unchecked_mut(tail).write(value) };
        self.len += 1;

        Ok(())
    }

    /// Removes and returns the oldest element, or `None` when empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        debug_assert!(self.head < self.capacity());

        // SAFETY: head < capacity by invariant; the slot is initialized
        // because len > 0.
        let value = unsafe { self.buf.get_unchecked(self.head).as_ptr().read() };

        self.head = self.wrap(self.head + 1);
        self.len -= 1;

        Some(value)
    }

    /// Borrows the oldest element without removal.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }

        // SAFETY: head slot is initialized because len > 0.
        Some(unsafe { &*self.buf.get_unchecked(self.head).as_ptr() })
    }

    /// Borrows the most recently pushed element without removal.
    #[inline]
    pub fn back(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }

        let idx = self.wrap(self.head + self.len - 1);

        // SAFETY: idx is inside [head, head + len), hence initialized.
        Some(unsafe { &*self.buf.get_unchecked(idx).as_ptr() })
    }

    /// Removes all elements, dropping them in FIFO order.
    ///
    /// The buffer remains usable afterwards without reallocating.
    pub fn clear(&mut self) {
        while let Some(value) = self.pop() {
            drop(value);
        }
        self.head = 0;
        debug_assert!(self.is_empty());
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        self.clear();
    }
}
