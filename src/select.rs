//! One-shot randomized probe over multiple channel receivers.
//!
//! A select collects case branches (receiver + handler), shuffles them
//! uniformly, and fires the handler of the first case whose receiver has a
//! value ready, without blocking. With `k` simultaneously ready cases each
//! is chosen with probability ~1/k. If nothing is ready, [`Select::run_or`]
//! falls back to a default branch and [`Select::run`] simply reports that no
//! handler ran. There is no block-until-ready variant.
//!
//! At least one case is required; this is enforced by construction: the
//! only entry point is [`Select::on`], which already supplies the first
//! case.
//!
//! Handler panics propagate to the caller; the select does not trap them.
//!
//! A closed-and-drained receiver counts as not-ready: it has no value left
//! to hand to its typed handler. Values still buffered in a closed channel
//! do fire normally.

use crate::channel::Receiver;
use crate::rng::XorShift64;

type Case<'a> = Box<dyn FnMut() -> bool + 'a>;

/// A set of select cases, built fluently and consumed by a single probe.
///
/// ```
/// use crossflow::{channel, Select};
///
/// let (tx, rx) = channel::<u32>(4);
/// let (_tx2, rx2) = channel::<String>(4);
/// tx.send(7).unwrap();
///
/// let mut got = None;
/// Select::on(&rx, |v| got = Some(v))
///     .or(&rx2, |s: String| println!("{s}"))
///     .run_or(|| println!("nothing ready"));
/// assert_eq!(got, Some(7));
/// ```
pub struct Select<'a> {
    cases: Vec<Case<'a>>,
    rng: XorShift64,
}

impl<'a> Select<'a> {
    /// Starts a select with its first (mandatory) case.
    pub fn on<T>(rx: &'a Receiver<T>, handler: impl FnMut(T) + 'a) -> Self {
        Self {
            cases: vec![make_case(rx, handler)],
            rng: XorShift64::from_entropy(),
        }
    }

    /// Adds another case branch.
    pub fn or<T>(mut self, rx: &'a Receiver<T>, handler: impl FnMut(T) + 'a) -> Self {
        self.cases.push(make_case(rx, handler));
        self
    }

    /// Replaces the shuffle seed; probes become deterministic per seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = XorShift64::new(seed);
        self
    }

    /// Probes all cases in shuffled order. Returns `true` if some case
    /// fired, `false` if no receiver was ready (no handler ran).
    pub fn run(mut self) -> bool {
        self.probe()
    }

    /// Probes all cases in shuffled order; runs `default` if none fired.
    ///
    /// Returns `true` if a case fired, `false` if the default ran.
    pub fn run_or(mut self, default: impl FnOnce()) -> bool {
        if self.probe() {
            true
        } else {
            default();
            false
        }
    }

    fn probe(&mut self) -> bool {
        self.rng.shuffle(&mut self.cases);
        for case in &mut self.cases {
            if case() {
                return true;
            }
        }
        false
    }
}

fn make_case<'a, T>(rx: &'a Receiver<T>, mut handler: impl FnMut(T) + 'a) -> Case<'a> {
    Box::new(move || match rx.try_recv() {
        Ok(value) => {
            handler(value);
            true
        }
        Err(_) => false,
    })
}
