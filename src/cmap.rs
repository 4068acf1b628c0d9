//! Concurrent, open-addressed, growable map with lock-free reads and
//! inserts.
//!
//! # Design
//!
//! A [`CMap`] is an append-only chain of fixed-capacity *submaps*. Each
//! submap is a prime-length bucket array probed by double hashing: the
//! primary hash picks the start index, and the probe step is
//! `1 + (H2 mod (capacity - 1))`, which visits every bucket because the
//! capacity is prime. When the newest submap crosses its load-factor
//! threshold, a single expanding thread appends a fresh submap with the
//! next prime at least twice the previous capacity. Existing entries are
//! never rehashed, copied, or moved; old submaps stay authoritative for the
//! keys they hold, which is what keeps lookups lock-free.
//!
//! # Bucket state machine
//!
//! Every bucket is `EMPTY`, `BUSY`, or `VALID`, and only moves forward:
//!
//! ```text
//! EMPTY --CAS (one winner)--> BUSY --write entry--> VALID
//! ```
//!
//! The winning inserter writes the key and value, then publishes with a
//! release store of `VALID`. Readers load states relaxed for probe control
//! flow and issue an acquire fence before touching the entry of a bucket
//! observed `VALID`; a `BUSY` bucket is skipped as a non-match, so readers
//! never wait. For any key at most one `VALID` bucket exists across the
//! whole chain, and a published entry is never mutated or unpublished.
//!
//! # Consistency
//!
//! Lookups scan submaps newest-first so a reader racing an in-progress
//! expansion returns the freshest entry. Iteration and stats are weakly
//! consistent snapshots: they see everything completed before they began,
//! and may or may not see concurrent inserts.
//!
//! # Hashing
//!
//! Two hash functions are required. `H1` comes from the map's
//! [`BuildHasher`] (ahash by default). `H2` is derived through the
//! [`SecondHash`] trait, which feeds a *transformed* view of the key to a
//! second hasher from the same builder: integers hash their bitwise
//! complement, strings and byte arrays hash their content reversed. The
//! defaults are deliberately weak-but-independent; adversarial workloads
//! should supply their own `SecondHash` impl. The map does not defend
//! against hash flooding.

use std::cell::UnsafeCell;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::mem::MaybeUninit;
use std::sync::OnceLock;

#[cfg(not(loom))]
use std::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
#[cfg(not(loom))]
use std::thread;

#[cfg(loom)]
use loom::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
#[cfg(loom)]
use loom::thread;

use crossbeam_utils::CachePadded;

/// Load-factor threshold used by [`CMap::new`].
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.75;

/// Submap-chain cap used by [`CMap::new`].
pub const DEFAULT_MAX_SUBMAPS: usize = 65_536;

/// Smallest capacity ever used for the first submap.
const FIRST_SUBMAP_MIN_CAPACITY: usize = 11;

/// Each appended submap holds at least this multiple of the previous
/// capacity (rounded up to a prime).
const GROWTH_FACTOR: usize = 2;

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const VALID: u8 = 2;

// ---------------------------------------------------------------------------
// Second hash
// ---------------------------------------------------------------------------

/// Feeds the probe-step hasher a transformed view of the key.
///
/// Implementations must be non-constant and should be weakly uncorrelated
/// with the key's `Hash` impl; the supplied defaults transform rather than
/// re-mix (complemented integers, reversed bytes) exactly so that the same
/// hasher family yields an independent second stream.
pub trait SecondHash {
    /// Hashes the transformed key into `state`.
    fn second_hash<H: Hasher>(&self, state: &mut H);
}

macro_rules! impl_second_hash_for_int {
    ($($ty:ty),* $(,)?) => {$(
        impl SecondHash for $ty {
            #[inline]
            fn second_hash<H: Hasher>(&self, state: &mut H) {
                (!*self).hash(state);
            }
        }
    )*};
}

impl_second_hash_for_int!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl SecondHash for str {
    #[inline]
    fn second_hash<H: Hasher>(&self, state: &mut H) {
        for &b in self.as_bytes().iter().rev() {
            state.write_u8(b);
        }
        state.write_u8(0xff);
    }
}

impl SecondHash for String {
    #[inline]
    fn second_hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().second_hash(state);
    }
}

impl<const N: usize> SecondHash for [u8; N] {
    #[inline]
    fn second_hash<H: Hasher>(&self, state: &mut H) {
        for &b in self.iter().rev() {
            state.write_u8(b);
        }
    }
}

impl SecondHash for std::net::Ipv4Addr {
    #[inline]
    fn second_hash<H: Hasher>(&self, state: &mut H) {
        self.octets().second_hash(state);
    }
}

impl<A: SecondHash, B: SecondHash> SecondHash for (A, B) {
    #[inline]
    fn second_hash<H: Hasher>(&self, state: &mut H) {
        self.0.second_hash(state);
        self.1.second_hash(state);
    }
}

// ---------------------------------------------------------------------------
// Primes
// ---------------------------------------------------------------------------

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n == 2 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut div = 3;
    while div * div <= n {
        if n % div == 0 {
            return false;
        }
        div += 2;
    }
    true
}

fn next_prime(mut n: usize) -> usize {
    if n <= 2 {
        return 2;
    }
    if n % 2 == 0 {
        n += 1;
    }
    while !is_prime(n) {
        n += 2;
    }
    n
}

// ---------------------------------------------------------------------------
// Buckets and submaps
// ---------------------------------------------------------------------------

/// One slot of a submap: an atomic state tag plus entry storage.
struct Bucket<K, V> {
    state: AtomicU8,
    entry: UnsafeCell<MaybeUninit<(K, V)>>,
}

impl<K, V> Bucket<K, V> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            entry: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// # Safety
    /// The caller must have observed `VALID` with acquire ordering (or an
    /// acquire fence after a relaxed load), or hold `&mut` access.
    #[inline]
    unsafe fn entry_ref(&self) -> &(K, V) {
        (*self.entry.get()).assume_init_ref()
    }
}

// SAFETY: entries are moved in by the single CAS winner and only read
// through shared references after the release publish of VALID; dropping
// requires unique access. Hence Bucket is Send when the entry is Send, and
// Sync additionally requires the entry to be shareable.
unsafe impl<K: Send, V: Send> Send for Bucket<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Bucket<K, V> {}

/// Outcome of probing one submap for an insert.
enum SlotOutcome<K> {
    /// This thread won an empty bucket and published the entry.
    Inserted(usize),
    /// The key was already present in this submap.
    Found(usize),
    /// The probe cycled back to its start; the key is handed back so the
    /// caller can expand and retry.
    Full(K),
}

/// One fixed-capacity bucket array. Immutable in structure once created.
struct Submap<K, V> {
    buckets: Box<[Bucket<K, V>]>,
    max_load_factor: f32,
    valid: AtomicUsize,
}

impl<K, V> Submap<K, V> {
    fn new(capacity: usize, max_load_factor: f32) -> Self {
        debug_assert!(capacity >= FIRST_SUBMAP_MIN_CAPACITY);
        debug_assert!(is_prime(capacity));

        let mut buckets = Vec::with_capacity(capacity);
        buckets.resize_with(capacity, Bucket::new);

        Self {
            buckets: buckets.into_boxed_slice(),
            max_load_factor,
            valid: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn valid_buckets(&self) -> usize {
        self.valid.load(Ordering::Relaxed)
    }

    /// Probe step `1 + (H2 mod (capacity - 1))`; coprime with the prime
    /// capacity, so the walk visits every bucket.
    #[inline]
    fn probe_increment(&self, hash2: u64) -> usize {
        1 + (hash2 % (self.capacity() as u64 - 1)) as usize
    }

    #[inline]
    fn start_index(&self, hash1: u64) -> usize {
        (hash1 % self.capacity() as u64) as usize
    }

    fn is_overloaded(&self) -> bool {
        self.valid_buckets() as f32 / self.capacity() as f32 >= self.max_load_factor
    }

    /// Probes for `key`. Stops at the first empty bucket or after a full
    /// cycle; busy buckets are skipped. Readers never wait.
    fn find(&self, key: &K, hash1: u64, hash2: u64) -> Option<usize>
    where
        K: Eq,
    {
        let capacity = self.capacity();
        let start = self.start_index(hash1);
        let step = self.probe_increment(hash2);
        let mut index = start;

        loop {
            let bucket = &self.buckets[index];
            match bucket.state.load(Ordering::Relaxed) {
                VALID => {
                    fence(Ordering::Acquire);
                    // SAFETY: VALID observed, acquire fence issued.
                    let entry = unsafe { bucket.entry_ref() };
                    if entry.0 == *key {
                        return Some(index);
                    }
                }
                EMPTY => return None,
                // BUSY: the writer has not associated a key yet; treat as
                // non-matching and keep probing.
                _ => {}
            }

            index = (index + step) % capacity;
            if index == start {
                return None;
            }
        }
    }

    /// Attempts to insert `key` into this submap.
    ///
    /// The value is materialized at most once across retries: `make` fires
    /// the first time an empty candidate bucket is seen (before the
    /// claiming CAS, so a panicking constructor cannot strand a BUSY
    /// bucket) and the result is parked in `pending` until a CAS succeeds.
    fn try_insert<F>(
        &self,
        key: K,
        hash1: u64,
        hash2: u64,
        pending: &mut Option<V>,
        make: &mut Option<F>,
    ) -> SlotOutcome<K>
    where
        K: Eq,
        F: FnOnce() -> V,
    {
        let capacity = self.capacity();
        let start = self.start_index(hash1);
        let step = self.probe_increment(hash2);
        let mut index = start;

        loop {
            let bucket = &self.buckets[index];
            let state = bucket.state.load(Ordering::Relaxed);

            if state == EMPTY {
                if pending.is_none() {
                    if let Some(make) = make.take() {
                        *pending = Some(make());
                    }
                }
                if bucket
                    .state
                    .compare_exchange(EMPTY, BUSY, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let value = match pending.take() {
                        Some(value) => value,
                        None => unreachable!("insert value not materialized before claim"),
                    };
                    // SAFETY: the CAS made this thread the bucket's unique
                    // writer; no reader touches the entry until the VALID
                    // store below publishes it.
                    unsafe { (*bucket.entry.get()).write((key, value)) };
                    bucket.state.store(VALID, Ordering::Release);
                    self.valid.fetch_add(1, Ordering::Relaxed);
                    return SlotOutcome::Inserted(index);
                }
            }

            // The bucket may have become VALID concurrently (either it was
            // VALID when first loaded, or a competing insert just won the
            // CAS and published); re-load before deciding to step past it.
            if state == VALID || bucket.state.load(Ordering::Relaxed) == VALID {
                fence(Ordering::Acquire);
                // SAFETY: VALID observed, acquire fence issued.
                let entry = unsafe { bucket.entry_ref() };
                if entry.0 == key {
                    return SlotOutcome::Found(index);
                }
            }

            index = (index + step) % capacity;
            if index == start {
                return SlotOutcome::Full(key);
            }
        }
    }

    fn stats(&self) -> SubmapStats {
        let capacity = self.capacity();
        let valid_buckets = self.valid_buckets();
        SubmapStats {
            capacity,
            valid_buckets,
            load_factor: valid_buckets as f32 / capacity as f32,
        }
    }
}

impl<K, V> Drop for Submap<K, V> {
    fn drop(&mut self) {
        for bucket in self.buckets.iter() {
            if bucket.state.load(Ordering::Relaxed) == VALID {
                // SAFETY: `&mut self` gives unique access and VALID buckets
                // hold initialized entries.
                unsafe { (*bucket.entry.get()).assume_init_drop() };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// Concurrent growable map from `K` to `V`.
///
/// Reads (`get`, iteration, `stats`) take no locks and run in parallel with
/// each other and with inserts. Inserts run in parallel with each other; at
/// most one thread performs an expansion at a time, guarded by a spin-yield
/// flag. There is no removal: an entry lives until the map drops, which is
/// why [`CMap::insert`] can hand back a `&V` borrowed from the map itself.
///
/// ```
/// use crossflow::CMap;
///
/// let map: CMap<String, u32> = CMap::new(16);
/// assert_eq!(map.insert("a".into(), 1), (&1, true));
/// assert_eq!(map.insert("a".into(), 99), (&1, false));
/// assert_eq!(map.get(&"a".to_string()), Some(&1));
/// ```
pub struct CMap<K, V, S = ahash::RandomState> {
    hash_builder: S,
    max_load_factor: f32,
    /// Slot storage for the whole chain, length `max_submaps`. Slots at
    /// indices `< num_submaps` are initialized and never replaced.
    submaps: Box<[OnceLock<Submap<K, V>>]>,
    num_submaps: CachePadded<AtomicUsize>,
    entries: CachePadded<AtomicUsize>,
    expanding: CachePadded<AtomicBool>,
}

impl<K, V> CMap<K, V> {
    /// Creates a map sized for `estimated_entries`, with the default load
    /// factor (0.75), submap cap (65536), and hasher (ahash).
    pub fn new(estimated_entries: usize) -> Self {
        match Self::with_config(estimated_entries, DEFAULT_MAX_LOAD_FACTOR, DEFAULT_MAX_SUBMAPS) {
            Ok(map) => map,
            Err(_) => unreachable!("default CMap configuration is valid"),
        }
    }
}

impl<K, V, S: BuildHasher + Default> CMap<K, V, S> {
    /// Creates a map with explicit load-factor and submap-cap settings.
    ///
    /// Rejects `max_load_factor` outside the open interval `(0, 1)` and a
    /// submap cap of zero.
    pub fn with_config(
        estimated_entries: usize,
        max_load_factor: f32,
        max_submaps: usize,
    ) -> Result<Self, MapConfigError> {
        Self::with_config_and_hasher(estimated_entries, max_load_factor, max_submaps, S::default())
    }
}

impl<K, V, S: BuildHasher> CMap<K, V, S> {
    /// Creates a map with an explicit `H1` build-hasher.
    pub fn with_config_and_hasher(
        estimated_entries: usize,
        max_load_factor: f32,
        max_submaps: usize,
        hash_builder: S,
    ) -> Result<Self, MapConfigError> {
        if !(max_load_factor > 0.0 && max_load_factor < 1.0) {
            return Err(MapConfigError::InvalidLoadFactor(max_load_factor));
        }
        if max_submaps < 1 {
            return Err(MapConfigError::InvalidSubmapCap(max_submaps));
        }

        let first_capacity = FIRST_SUBMAP_MIN_CAPACITY
            .max(next_prime((estimated_entries as f32 / max_load_factor) as usize));

        let mut submaps = Vec::with_capacity(max_submaps);
        submaps.resize_with(max_submaps, OnceLock::new);
        let submaps = submaps.into_boxed_slice();

        if submaps[0]
            .set(Submap::new(first_capacity, max_load_factor))
            .is_err()
        {
            unreachable!("first submap slot initialized twice");
        }

        Ok(Self {
            hash_builder,
            max_load_factor,
            submaps,
            num_submaps: CachePadded::new(AtomicUsize::new(1)),
            entries: CachePadded::new(AtomicUsize::new(0)),
            expanding: CachePadded::new(AtomicBool::new(false)),
        })
    }

    /// Number of entries, relaxed snapshot.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Returns true when no entry has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound on how many submaps this map may ever hold.
    pub fn max_submaps(&self) -> usize {
        self.submaps.len()
    }

    /// Live submap count; acquire-paired with expansion's release increment
    /// so an observed count implies the submap behind it is visible.
    fn num_submaps(&self) -> usize {
        self.num_submaps.load(Ordering::Acquire)
    }

    fn last_submap_index(&self) -> usize {
        self.num_submaps() - 1
    }

    fn submap(&self, index: usize) -> &Submap<K, V> {
        match self.submaps[index].get() {
            Some(submap) => submap,
            // Callers only pass indices below an observed num_submaps.
            None => unreachable!("submap index beyond live chain"),
        }
    }

    fn hash1(&self, key: &K) -> u64
    where
        K: Hash,
    {
        self.hash_builder.hash_one(key)
    }

    fn hash2(&self, key: &K) -> u64
    where
        K: SecondHash,
    {
        let mut hasher = self.hash_builder.build_hasher();
        key.second_hash(&mut hasher);
        hasher.finish()
    }

    /// # Safety contract (internal)
    /// `submap_index`/`bucket_index` must refer to a bucket observed VALID.
    fn entry_at(&self, submap_index: usize, bucket_index: usize) -> &(K, V) {
        let bucket = &self.submap(submap_index).buckets[bucket_index];
        debug_assert_eq!(bucket.state.load(Ordering::Relaxed), VALID);
        // SAFETY: per the contract above, the caller observed VALID behind
        // an acquire fence.
        unsafe { bucket.entry_ref() }
    }

    /// Scans submaps `[0, upto]` newest-first.
    fn find_in_range(&self, key: &K, hash1: u64, hash2: u64, upto: usize) -> Option<(usize, usize)>
    where
        K: Eq,
    {
        for submap_index in (0..=upto).rev() {
            let submap = self.submap(submap_index);
            if let Some(bucket_index) = submap.find(key, hash1, hash2) {
                return Some((submap_index, bucket_index));
            }
        }
        None
    }
}

impl<K: Hash + SecondHash + Eq, V, S: BuildHasher> CMap<K, V, S> {
    /// Looks up `key`. Lock-free; never fails, a missing key is just `None`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Looks up `key`, returning the stored key and value.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash1 = self.hash1(key);
        let hash2 = self.hash2(key);
        let (submap_index, bucket_index) =
            self.find_in_range(key, hash1, hash2, self.last_submap_index())?;
        let entry = self.entry_at(submap_index, bucket_index);
        Some((&entry.0, &entry.1))
    }

    /// Returns true when `key` has been inserted.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get_key_value(key).is_some()
    }

    /// Inserts `key -> value` unless the key is already present.
    ///
    /// Returns the stored value's reference and whether this call inserted
    /// it. An existing entry is never overwritten; the provided `value` is
    /// dropped in that case.
    ///
    /// # Panics
    ///
    /// Panics when the newest submap is full and the submap cap has been
    /// reached; the map cannot grow further (fatal, see module docs).
    pub fn insert(&self, key: K, value: V) -> (&V, bool) {
        self.insert_with(key, move || value)
    }

    /// Like [`CMap::insert`] but materializes the value lazily.
    ///
    /// `make` runs at most once, and not at all when the key is found in an
    /// older submap before any empty bucket is claimed. Panics from `make`
    /// propagate unchanged.
    pub fn insert_with(&self, key: K, make: impl FnOnce() -> V) -> (&V, bool) {
        let hash1 = self.hash1(&key);
        let hash2 = self.hash2(&key);

        let mut key = key;
        let mut pending: Option<V> = None;
        let mut make = Some(make);

        loop {
            let last = self.last_submap_index();

            // Older submaps are immutable for this key: if it exists there,
            // the insert is a no-op.
            if last > 0 {
                if let Some((submap_index, bucket_index)) =
                    self.find_in_range(&key, hash1, hash2, last - 1)
                {
                    let entry = self.entry_at(submap_index, bucket_index);
                    return (&entry.1, false);
                }
            }

            let submap = self.submap(last);
            if submap.is_overloaded() {
                self.expand(last);
                continue;
            }

            match submap.try_insert(key, hash1, hash2, &mut pending, &mut make) {
                SlotOutcome::Inserted(bucket_index) => {
                    self.entries.fetch_add(1, Ordering::Relaxed);
                    let entry = self.entry_at(last, bucket_index);
                    return (&entry.1, true);
                }
                SlotOutcome::Found(bucket_index) => {
                    let entry = self.entry_at(last, bucket_index);
                    return (&entry.1, false);
                }
                SlotOutcome::Full(returned_key) => {
                    key = returned_key;
                    self.expand(last);
                }
            }
        }
    }

    /// Appends a new submap, unless another thread already has since the
    /// caller observed `observed_last` as the newest index.
    ///
    /// Returns true when this call appended. Exactly one thread expands at
    /// a time; the others spin-yield on the flag or observe the grown chain
    /// and retry their insert.
    fn expand(&self, observed_last: usize) -> bool {
        while self.expanding.swap(true, Ordering::Acquire) {
            thread::yield_now();
        }

        let num_submaps = self.num_submaps.load(Ordering::Acquire);
        if num_submaps - 1 != observed_last {
            // Someone else appended since our snapshot; their submap serves
            // our retry.
            self.expanding.store(false, Ordering::Release);
            return false;
        }

        if num_submaps == self.submaps.len() {
            self.expanding.store(false, Ordering::Release);
            panic!(
                "concurrent map cannot grow: submap cap of {} reached",
                self.submaps.len()
            );
        }

        let last_capacity = self.submap(observed_last).capacity();
        let new_capacity = next_prime(last_capacity * GROWTH_FACTOR);
        tracing::debug!(
            submap_index = num_submaps,
            capacity = new_capacity,
            "appending submap"
        );

        if self.submaps[num_submaps]
            .set(Submap::new(new_capacity, self.max_load_factor))
            .is_err()
        {
            unreachable!("submap slot initialized twice");
        }
        self.num_submaps.fetch_add(1, Ordering::Release);

        self.expanding.store(false, Ordering::Release);
        true
    }

    /// Builds a new map containing the entries matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&K, &V) -> bool) -> CMap<K, V, S>
    where
        K: Clone,
        V: Clone,
        S: Default,
    {
        let out = match CMap::with_config(self.len(), self.max_load_factor, self.submaps.len()) {
            Ok(map) => map,
            Err(_) => unreachable!("source map configuration already validated"),
        };
        for (key, value) in self {
            if predicate(key, value) {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }

    /// Deep copy via [`CMap::filter`] with an always-true predicate.
    pub fn clone_map(&self) -> CMap<K, V, S>
    where
        K: Clone,
        V: Clone,
        S: Default,
    {
        self.filter(|_, _| true)
    }
}

impl<K, V, S: BuildHasher> CMap<K, V, S> {
    /// Read-only iterator over entries: submaps in append order, buckets in
    /// index order. Weakly consistent (see module docs); takes no locks.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            map: self,
            num_submaps: self.num_submaps(),
            submap_index: 0,
            bucket_index: 0,
        }
    }

    /// Per-submap occupancy snapshot plus totals.
    pub fn stats(&self) -> Stats {
        let num_submaps = self.num_submaps();
        let per_submap = (0..num_submaps)
            .map(|index| self.submap(index).stats())
            .collect();
        Stats {
            submaps: num_submaps,
            entries: self.len(),
            per_submap,
        }
    }
}

impl<'a, K, V, S: BuildHasher> IntoIterator for &'a CMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Iter<'a, K, V, S> {
        self.iter()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S: BuildHasher> fmt::Debug for CMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator returned by [`CMap::iter`].
pub struct Iter<'a, K, V, S> {
    map: &'a CMap<K, V, S>,
    /// Chain length snapshot taken when the iterator was created.
    num_submaps: usize,
    submap_index: usize,
    bucket_index: usize,
}

impl<'a, K, V, S: BuildHasher> Iterator for Iter<'a, K, V, S> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.submap_index < self.num_submaps {
            let submap = self.map.submap(self.submap_index);
            while self.bucket_index < submap.capacity() {
                let bucket = &submap.buckets[self.bucket_index];
                self.bucket_index += 1;
                if bucket.state.load(Ordering::Relaxed) == VALID {
                    fence(Ordering::Acquire);
                    // SAFETY: VALID observed, acquire fence issued.
                    let entry = unsafe { bucket.entry_ref() };
                    return Some((&entry.0, &entry.1));
                }
            }
            self.submap_index += 1;
            self.bucket_index = 0;
        }
        None
    }
}

/// Occupancy snapshot for one submap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubmapStats {
    pub capacity: usize,
    pub valid_buckets: usize,
    pub load_factor: f32,
}

/// Whole-map snapshot returned by [`CMap::stats`].
#[derive(Clone, Debug)]
pub struct Stats {
    pub submaps: usize,
    pub entries: usize,
    pub per_submap: Vec<SubmapStats>,
}

/// Rejected [`CMap`] configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapConfigError {
    /// `max_load_factor` must lie in the open interval `(0, 1)`.
    InvalidLoadFactor(f32),
    /// At least one submap is required.
    InvalidSubmapCap(usize),
}

impl fmt::Display for MapConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapConfigError::InvalidLoadFactor(value) => {
                write!(f, "max load factor must be in (0, 1), got {value}")
            }
            MapConfigError::InvalidSubmapCap(value) => {
                write!(f, "submap cap must be at least 1, got {value}")
            }
        }
    }
}

impl std::error::Error for MapConfigError {}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    fn insert_u32(submap: &Submap<u32, u32>, key: u32, value: u32) -> SlotOutcome<u32> {
        let mut pending = None;
        let mut make = Some(move || value);
        submap.try_insert(key, key as u64, 3, &mut pending, &mut make)
    }

    /// A reader racing the publish either misses the entry entirely or sees
    /// it fully initialized; no torn reads.
    #[test]
    fn publish_is_all_or_nothing() {
        loom::model(|| {
            let submap = Arc::new(Submap::<u32, u32>::new(11, 0.75));

            let writer_map = Arc::clone(&submap);
            let writer = thread::spawn(move || {
                match insert_u32(&writer_map, 5, 7) {
                    SlotOutcome::Inserted(_) => {}
                    _ => panic!("sole writer failed to insert"),
                }
            });

            if let Some(index) = submap.find(&5, 5, 3) {
                // SAFETY: find observed VALID behind an acquire fence.
                let entry = unsafe { submap.buckets[index].entry_ref() };
                assert_eq!(*entry, (5, 7));
            }

            writer.join().unwrap();
            assert!(submap.find(&5, 5, 3).is_some());
        });
    }

    /// Two inserts of the same key: exactly one wins, and afterwards the
    /// chain holds a single VALID bucket for the key.
    #[test]
    fn racing_same_key_inserts_single_winner() {
        loom::model(|| {
            let submap = Arc::new(Submap::<u32, u32>::new(11, 0.75));

            let map_a = Arc::clone(&submap);
            let a = thread::spawn(move || matches!(insert_u32(&map_a, 5, 1), SlotOutcome::Inserted(_)));
            let map_b = Arc::clone(&submap);
            let b = thread::spawn(move || matches!(insert_u32(&map_b, 5, 2), SlotOutcome::Inserted(_)));

            let a_inserted = a.join().unwrap();
            let b_inserted = b.join().unwrap();
            assert!(a_inserted ^ b_inserted, "exactly one insert must win");

            assert_eq!(submap.valid_buckets(), 1);
            assert!(submap.find(&5, 5, 3).is_some());
        });
    }
}
