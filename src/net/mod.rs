//! Zero-copy decoders for Ethernet II, IPv4, and TCP headers.
//!
//! Each view borrows a byte slice and exposes accessors at the fixed field
//! offsets of its header. Multi-byte fields are big-endian on the wire and
//! byte-swapped to native order on access. Constructors reject slices
//! shorter than the fixed header length; nothing beyond the fixed portion
//! (IPv4/TCP options) is interpreted.
//!
//! Unknown ether types and IP protocols are not errors; they map to
//! [`PacketType::Unknown`].

pub mod ethernet;
pub mod ipv4;
pub mod tcp;

pub use ethernet::{EthernetView, MacAddr};
pub use ipv4::Ipv4View;
pub use tcp::TcpView;

use std::fmt;

/// Protocol indicated by a header's next-layer field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Ethernet,
    Arp,
    Rarp,
    Ip,
    Tcp,
    Udp,
    Http,
    Unknown,
}

/// Failure to decode a header from a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The slice is shorter than the header's fixed length.
    Truncated {
        header: &'static str,
        need: usize,
        got: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { header, need, got } => {
                write!(f, "{header} header needs {need} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
