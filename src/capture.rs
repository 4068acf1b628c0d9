//! Minimal reader for legacy libpcap savefiles.
//!
//! The demo pipeline treats packet capture as an external producer; this
//! module is that producer for offline files. It understands the classic
//! 24-byte global header (microsecond magic `0xA1B2C3D4` and nanosecond
//! magic `0xA1B23C4D`, in either byte order) followed by 16-byte record
//! headers and captured bytes. The pcapng container is out of scope.

use std::fmt;
use std::io::{self, Read};

const MAGIC_MICROS: u32 = 0xA1B2_C3D4;
const MAGIC_NANOS: u32 = 0xA1B2_3C4D;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

/// Upper bound on a single record's captured length; anything larger is
/// treated as file corruption rather than allocated.
const MAX_RECORD_BYTES: u32 = 16 * 1024 * 1024;

/// Link type for Ethernet frames, the only one the demo interprets.
pub const LINKTYPE_ETHERNET: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Endianness {
    Little,
    Big,
}

/// One captured packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureRecord {
    /// Capture timestamp, seconds since the epoch.
    pub ts_sec: u32,
    /// Sub-second part, normalized to nanoseconds regardless of the file's
    /// native resolution.
    pub ts_nanos: u32,
    /// Original on-wire length; may exceed `data.len()` when the capture
    /// was truncated by the snap length.
    pub orig_len: u32,
    /// Captured bytes, starting at the link-layer header.
    pub data: Vec<u8>,
}

impl CaptureRecord {
    /// Number of bytes actually captured.
    pub fn captured_len(&self) -> usize {
        self.data.len()
    }
}

/// Streaming reader over a legacy savefile.
pub struct CaptureReader<R> {
    input: R,
    endianness: Endianness,
    nanosecond_resolution: bool,
    snaplen: u32,
    link_type: u32,
}

impl<R: Read> CaptureReader<R> {
    /// Consumes and validates the global header.
    pub fn new(mut input: R) -> Result<Self, CaptureError> {
        let mut header = [0u8; GLOBAL_HEADER_LEN];
        let got = read_full(&mut input, &mut header)?;
        if got < GLOBAL_HEADER_LEN {
            return Err(CaptureError::TruncatedHeader {
                need: GLOBAL_HEADER_LEN,
                got,
            });
        }

        let magic_le = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let magic_be = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let (endianness, nanosecond_resolution) = match (magic_le, magic_be) {
            (MAGIC_MICROS, _) => (Endianness::Little, false),
            (MAGIC_NANOS, _) => (Endianness::Little, true),
            (_, MAGIC_MICROS) => (Endianness::Big, false),
            (_, MAGIC_NANOS) => (Endianness::Big, true),
            _ => return Err(CaptureError::BadMagic(magic_le)),
        };

        let read_u32 = |offset: usize| {
            let bytes = [
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ];
            match endianness {
                Endianness::Little => u32::from_le_bytes(bytes),
                Endianness::Big => u32::from_be_bytes(bytes),
            }
        };

        // Offsets 4..16 hold version, thiszone, and sigfigs; none of them
        // affect record parsing.
        let snaplen = read_u32(16);
        let link_type = read_u32(20);

        Ok(Self {
            input,
            endianness,
            nanosecond_resolution,
            snaplen,
            link_type,
        })
    }

    /// Snap length declared by the capture.
    pub fn snaplen(&self) -> u32 {
        self.snaplen
    }

    /// Link type of the captured frames (1 = Ethernet).
    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    fn parse_u32(&self, bytes: [u8; 4]) -> u32 {
        match self.endianness {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Reads the next record; `Ok(None)` at clean end of file.
    pub fn next_record(&mut self) -> Result<Option<CaptureRecord>, CaptureError> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let got = read_full(&mut self.input, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < RECORD_HEADER_LEN {
            return Err(CaptureError::TruncatedRecord {
                need: RECORD_HEADER_LEN,
                got,
            });
        }

        let ts_sec = self.parse_u32([header[0], header[1], header[2], header[3]]);
        let ts_frac = self.parse_u32([header[4], header[5], header[6], header[7]]);
        let incl_len = self.parse_u32([header[8], header[9], header[10], header[11]]);
        let orig_len = self.parse_u32([header[12], header[13], header[14], header[15]]);

        if incl_len > MAX_RECORD_BYTES {
            return Err(CaptureError::OversizedRecord { len: incl_len });
        }

        let mut data = vec![0u8; incl_len as usize];
        let got = read_full(&mut self.input, &mut data)?;
        if got < data.len() {
            return Err(CaptureError::TruncatedRecord {
                need: data.len(),
                got,
            });
        }

        let ts_nanos = if self.nanosecond_resolution {
            ts_frac
        } else {
            ts_frac.saturating_mul(1_000)
        };

        Ok(Some(CaptureRecord {
            ts_sec,
            ts_nanos,
            orig_len,
            data,
        }))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<CaptureRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Reads until `buf` is full or the input is exhausted; returns the number
/// of bytes read. A clean EOF at a record boundary thus reads 0.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize, CaptureError> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CaptureError::Io(err)),
        }
    }
    Ok(filled)
}

/// Failure while reading a savefile.
#[derive(Debug)]
pub enum CaptureError {
    Io(io::Error),
    /// The first four bytes match no known savefile magic.
    BadMagic(u32),
    /// End of input inside the global header.
    TruncatedHeader { need: usize, got: usize },
    /// End of input inside a record header or its captured bytes.
    TruncatedRecord { need: usize, got: usize },
    /// A record claims more captured bytes than any sane capture holds.
    OversizedRecord { len: u32 },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Io(err) => write!(f, "capture read failed: {err}"),
            CaptureError::BadMagic(magic) => {
                write!(f, "not a legacy pcap savefile (magic 0x{magic:08X})")
            }
            CaptureError::TruncatedHeader { need, got } => {
                write!(f, "savefile header needs {need} bytes, got {got}")
            }
            CaptureError::TruncatedRecord { need, got } => {
                write!(f, "record needs {need} more bytes, got {got}")
            }
            CaptureError::OversizedRecord { len } => {
                write!(f, "record claims {len} captured bytes")
            }
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        CaptureError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn le_savefile(records: &[(&[u8], u32)]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(&MAGIC_MICROS.to_le_bytes());
        file.extend_from_slice(&2u16.to_le_bytes()); // version major
        file.extend_from_slice(&4u16.to_le_bytes()); // version minor
        file.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        file.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        file.extend_from_slice(&65_535u32.to_le_bytes()); // snaplen
        file.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());

        for (i, (data, orig_len)) in records.iter().enumerate() {
            file.extend_from_slice(&(1_700_000_000u32 + i as u32).to_le_bytes());
            file.extend_from_slice(&123u32.to_le_bytes()); // microseconds
            file.extend_from_slice(&(data.len() as u32).to_le_bytes());
            file.extend_from_slice(&orig_len.to_le_bytes());
            file.extend_from_slice(data);
        }
        file
    }

    #[test]
    fn reads_little_endian_records() {
        let bytes = le_savefile(&[(b"abcd", 4), (b"wxyz!!", 90)]);
        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();

        assert_eq!(reader.snaplen(), 65_535);
        assert_eq!(reader.link_type(), LINKTYPE_ETHERNET);

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.ts_sec, 1_700_000_000);
        assert_eq!(first.ts_nanos, 123_000);
        assert_eq!(first.orig_len, 4);
        assert_eq!(first.data, b"abcd");
        assert_eq!(first.captured_len(), 4);

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.orig_len, 90);
        assert_eq!(second.data, b"wxyz!!");

        assert!(reader.next_record().unwrap().is_none());
        // End of file is sticky.
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn reads_big_endian_and_nanosecond_files() {
        let mut file = Vec::new();
        file.extend_from_slice(&MAGIC_NANOS.to_be_bytes());
        file.extend_from_slice(&2u16.to_be_bytes());
        file.extend_from_slice(&4u16.to_be_bytes());
        file.extend_from_slice(&0i32.to_be_bytes());
        file.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(&262_144u32.to_be_bytes());
        file.extend_from_slice(&LINKTYPE_ETHERNET.to_be_bytes());

        file.extend_from_slice(&7u32.to_be_bytes());
        file.extend_from_slice(&999u32.to_be_bytes()); // already nanoseconds
        file.extend_from_slice(&3u32.to_be_bytes());
        file.extend_from_slice(&3u32.to_be_bytes());
        file.extend_from_slice(b"\x01\x02\x03");

        let mut reader = CaptureReader::new(Cursor::new(file)).unwrap();
        assert_eq!(reader.snaplen(), 262_144);

        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.ts_sec, 7);
        assert_eq!(record.ts_nanos, 999);
        assert_eq!(record.data, vec![1, 2, 3]);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn iterator_yields_all_records() {
        let bytes = le_savefile(&[(b"a", 1), (b"bb", 2), (b"ccc", 3)]);
        let reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        let lens: Vec<usize> = reader.map(|r| r.unwrap().captured_len()).collect();
        assert_eq!(lens, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = le_savefile(&[]);
        bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let err = CaptureReader::new(Cursor::new(bytes))
            .err()
            .expect("bad magic must be rejected");
        match err {
            CaptureError::BadMagic(magic) => assert_eq!(magic, 0xDEAD_BEEF),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_global_header() {
        let bytes = le_savefile(&[]);
        let err = CaptureReader::new(Cursor::new(&bytes[..10]))
            .err()
            .expect("short header must be rejected");
        match err {
            CaptureError::TruncatedHeader { need: 24, got: 10 } => {}
            other => panic!("expected TruncatedHeader, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_record_body() {
        let mut bytes = le_savefile(&[(b"abcdef", 6)]);
        bytes.truncate(bytes.len() - 2);
        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        match reader.next_record() {
            Err(CaptureError::TruncatedRecord { need: 6, got: 4 }) => {}
            other => panic!("expected TruncatedRecord, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_record() {
        let mut bytes = le_savefile(&[(b"x", 1)]);
        // Rewrite incl_len to an absurd value.
        let incl_off = 24 + 8;
        bytes[incl_off..incl_off + 4].copy_from_slice(&(u32::MAX).to_le_bytes());
        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        match reader.next_record() {
            Err(CaptureError::OversizedRecord { len }) => assert_eq!(len, u32::MAX),
            other => panic!("expected OversizedRecord, got {other:?}"),
        }
    }
}
