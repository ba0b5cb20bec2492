//! TLS record framing over a reassembly buffer.
//!
//! Framing is done by hand rather than with `tls_parser::parse_tls_raw_record`
//! because protected records may legally exceed the 2^14 plaintext limit
//! that parser enforces.

/// Length of the TLS record header: type(1) + version(2) + length(2).
pub const RECORD_HEADER_LEN: usize = 5;

/// A complete record, borrowed from the reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a> {
    pub content_type: u8,
    pub version: u16,
    /// Header and body.
    pub bytes: &'a [u8],
    pub body: &'a [u8],
}

#[derive(Debug, PartialEq, Eq)]
pub enum Framing<'a> {
    /// The buffer holds only whole records.
    Complete(Vec<RawRecord<'a>>),
    /// The last record needs `outstanding` more bytes.
    Incomplete { outstanding: usize },
    /// The buffer does not look like TLS at all.
    NotTls(String),
}

/// Split `buf` into records. Several records may share one buffer; the last
/// one may be cut short by a segment boundary.
pub fn frame_records(buf: &[u8]) -> Framing<'_> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = &buf[offset..];

        // Validate record type (0x14-0x18) and major version as far as we have them
        if !(0x14..=0x18).contains(&remaining[0]) {
            return Framing::NotTls(format!("invalid content type {:#04x}", remaining[0]));
        }
        if remaining.len() > 1 && remaining[1] != 0x03 {
            return Framing::NotTls(format!("invalid major version {:#04x}", remaining[1]));
        }
        if remaining.len() < RECORD_HEADER_LEN {
            return Framing::Incomplete {
                outstanding: RECORD_HEADER_LEN - remaining.len(),
            };
        }

        let declared = u16::from_be_bytes([remaining[3], remaining[4]]) as usize;
        let total = RECORD_HEADER_LEN + declared;
        if remaining.len() < total {
            return Framing::Incomplete {
                outstanding: total - remaining.len(),
            };
        }

        records.push(RawRecord {
            content_type: remaining[0],
            version: u16::from_be_bytes([remaining[1], remaining[2]]),
            bytes: &remaining[..total],
            body: &remaining[RECORD_HEADER_LEN..total],
        });
        offset += total;
    }

    Framing::Complete(records)
}
