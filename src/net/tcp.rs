//! TCP fixed-header view (20 bytes; options are not interpreted).

use std::fmt;

use super::DecodeError;

/// Borrowed view over a TCP header.
#[derive(Clone, Copy, Debug)]
pub struct TcpView<'a> {
    data: &'a [u8],
}

impl<'a> TcpView<'a> {
    /// Fixed header length; options may follow per [`TcpView::data_offset`].
    pub const MIN_LEN: usize = 20;

    /// Wraps `data`, rejecting slices shorter than the fixed header.
    pub fn new(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::MIN_LEN {
            return Err(DecodeError::Truncated {
                header: "tcp",
                need: Self::MIN_LEN,
                got: data.len(),
            });
        }
        Ok(Self { data })
    }

    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn sequence_number(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ack_number(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    /// Header length in 32-bit words (high nibble of byte 12).
    pub fn data_offset(&self) -> u8 {
        self.data[12] >> 4
    }

    /// Low six bits of byte 13: URG, ACK, PSH, RST, SYN, FIN.
    pub fn flags(&self) -> u8 {
        self.data[13] & 0x3F
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes([self.data[14], self.data[15]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[16], self.data[17]])
    }

    pub fn urgent_pointer(&self) -> u16 {
        u16::from_be_bytes([self.data[18], self.data[19]])
    }
}

impl fmt::Display for TcpView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_port(), self.destination_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 443 -> 51000, seq 0x01020304, ack 0x0A0B0C0D, offset 5, flags
    /// ACK|PSH (0x18), window 1024, checksum 0xCAFE, urgent 7.
    fn sample_header() -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&443u16.to_be_bytes());
        header.extend_from_slice(&51_000u16.to_be_bytes());
        header.extend_from_slice(&0x0102_0304u32.to_be_bytes());
        header.extend_from_slice(&0x0A0B_0C0Du32.to_be_bytes());
        header.push(0x50);
        header.push(0x18);
        header.extend_from_slice(&1024u16.to_be_bytes());
        header.extend_from_slice(&0xCAFEu16.to_be_bytes());
        header.extend_from_slice(&7u16.to_be_bytes());
        header
    }

    #[test]
    fn decodes_known_fields() {
        let bytes = sample_header();
        let tcp = TcpView::new(&bytes).unwrap();

        assert_eq!(tcp.source_port(), 443);
        assert_eq!(tcp.destination_port(), 51_000);
        assert_eq!(tcp.sequence_number(), 0x0102_0304);
        assert_eq!(tcp.ack_number(), 0x0A0B_0C0D);
        assert_eq!(tcp.data_offset(), 5);
        assert_eq!(tcp.flags(), 0x18);
        assert_eq!(tcp.window(), 1024);
        assert_eq!(tcp.checksum(), 0xCAFE);
        assert_eq!(tcp.urgent_pointer(), 7);
    }

    #[test]
    fn rejects_short_slice() {
        let err = TcpView::new(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                header: "tcp",
                need: 20,
                got: 10
            }
        );
    }

    #[test]
    fn flags_mask_covers_low_six_bits() {
        let mut bytes = sample_header();
        bytes[13] = 0xFF;
        let tcp = TcpView::new(&bytes).unwrap();
        assert_eq!(tcp.flags(), 0x3F);
    }
}
