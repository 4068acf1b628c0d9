//! Bounded typed channels, a lock-free growable map, and zero-copy packet
//! header views.
//!
//! Three facilities make up the library surface:
//!
//! - [`channel`]: a bounded MPMC channel with blocking send/receive,
//!   non-blocking probe, closure semantics, and iteration until drained.
//! - [`Select`]: a one-shot, non-blocking, randomized-fair probe across
//!   several channel receivers, with an optional default branch.
//! - [`CMap`]: a concurrent map with lock-free lookups and inserts that
//!   grows by appending larger submaps instead of rehashing in place.
//!
//! Around them sit the supporting cast for the demo pipeline: fixed-layout
//! header views over raw packet bytes ([`net`]), a legacy pcap savefile
//! reader ([`capture`]), and the fanout/aggregation glue ([`pipeline`])
//! that drives the channels and maps with realistic traffic. The
//! `pcap-stats` binary wires it all together: capture file in, three
//! per-peer traffic tables out.
//!
//! # Design themes
//! - Fixed capacities and explicit backpressure; channels block, rings
//!   refuse, maps append.
//! - Readers never wait: map lookups, iteration, and stats take no locks.
//! - Closure over sentinels: receives surface `Option`/`Result`, never a
//!   reserved in-band value.

pub mod capture;
pub mod channel;
pub mod cmap;
pub mod net;
pub mod pipeline;
pub mod ring;
pub mod rng;
pub mod select;

pub use channel::{channel, Receiver, SendError, Sender, TryRecvError};
pub use cmap::{CMap, MapConfigError, SecondHash, Stats, SubmapStats};
pub use net::{DecodeError, EthernetView, Ipv4View, MacAddr, PacketType, TcpView};
pub use ring::Ring;
pub use select::Select;
