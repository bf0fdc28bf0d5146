//! PSI section assembly and framing.
//!
//! [`PsiSection`] accumulates the payload of a PSI PID across transport
//! packets until a whole section is available. [`Section`] validates the
//! long section header and CRC-32 of an assembled section.

use bytes::{BufMut, Bytes, BytesMut};
use lazy_static::lazy_static;

use super::types::{TSHeader, TS_HEADER_SIZE, TS_PACKET_SIZE};
use crate::error::{InputError, Result};
use crate::utils::Crc32Mpeg2;

lazy_static! {
    static ref CRC: Crc32Mpeg2 = Crc32Mpeg2::new();
}

/// Fixed part of a long section: table_id .. last_section_number
const LONG_HEADER_SIZE: usize = 8;
const CRC_SIZE: usize = 4;
const STUFFING: u8 = 0xff;

/// Section reassembly buffer of a PSI stream.
///
/// A complete buffer has no partial section pending: continuation payload is
/// ignored until the next payload unit start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsiSection {
    buffer: BytesMut,
    expected: Option<usize>,
    is_complete: bool,
}

impl PsiSection {
    /// An empty buffer with nothing pending.
    pub fn complete() -> Self {
        Self {
            buffer: BytesMut::new(),
            expected: None,
            is_complete: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Bytes of the section currently being assembled.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds the payload of one transport packet. Returns every section
    /// completed by it, in order.
    pub fn push(&mut self, payload: &[u8], unit_start: bool) -> Vec<Bytes> {
        let mut sections = Vec::new();

        if unit_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                return sections;
            };
            let pointer = (pointer as usize).min(rest.len());
            if !self.is_complete {
                self.feed(&rest[..pointer], &mut sections);
            }
            self.start();
            self.feed(&rest[pointer..], &mut sections);
        } else if !self.is_complete {
            self.feed(payload, &mut sections);
        }

        sections
    }

    fn start(&mut self) {
        self.buffer.clear();
        self.expected = None;
        self.is_complete = false;
    }

    fn finish(&mut self) {
        self.buffer.clear();
        self.expected = None;
        self.is_complete = true;
    }

    fn feed(&mut self, mut data: &[u8], sections: &mut Vec<Bytes>) {
        while !data.is_empty() && !self.is_complete {
            let expected = match self.expected {
                Some(expected) => expected,
                None => {
                    let take = (3 - self.buffer.len()).min(data.len());
                    self.buffer.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if self.buffer[0] == STUFFING {
                        self.finish();
                        return;
                    }
                    if self.buffer.len() < 3 {
                        return;
                    }
                    let length = ((self.buffer[1] as usize & 0x0f) << 8) | self.buffer[2] as usize;
                    self.expected = Some(3 + length);
                    3 + length
                }
            };

            let take = (expected - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == expected {
                sections.push(self.buffer.split().freeze());
                self.finish();
                // Another section may follow in the same payload.
                if data.first().is_some_and(|b| *b != STUFFING) {
                    self.start();
                }
            }
        }
    }
}

/// A long-form PSI section with a verified CRC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Bytes between the fixed header and the CRC
    pub body: &'a [u8],
}

impl<'a> Section<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(InputError::InvalidData("section too short".into()));
        }
        if data[1] & 0x80 == 0 {
            return Err(InputError::InvalidData("not a long section".into()));
        }
        let length = ((data[1] as usize & 0x0f) << 8) | data[2] as usize;
        let end = 3 + length;
        if length < LONG_HEADER_SIZE - 3 + CRC_SIZE {
            return Err(InputError::InvalidData("invalid section_length".into()));
        }
        if data.len() < end {
            return Err(InputError::InvalidData("truncated section".into()));
        }

        let expected = u32::from_be_bytes([data[end - 4], data[end - 3], data[end - 2], data[end - 1]]);
        if CRC.calculate(&data[..end - CRC_SIZE]) != expected {
            return Err(InputError::InvalidData("CRC-32 mismatch".into()));
        }

        Ok(Self {
            table_id: data[0],
            table_id_extension: u16::from_be_bytes([data[3], data[4]]),
            version: (data[5] >> 1) & 0x1f,
            current_next: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
            body: &data[LONG_HEADER_SIZE..end - CRC_SIZE],
        })
    }
}

/// Builds a single long section around `body`, CRC included.
pub fn write_section(table_id: u8, table_id_extension: u16, version: u8, body: &[u8]) -> Bytes {
    write_section_numbered(table_id, table_id_extension, version, 0, 0, body)
}

/// Builds section `section_number` of a table split over
/// `last_section_number + 1` sections.
pub fn write_section_numbered(
    table_id: u8,
    table_id_extension: u16,
    version: u8,
    section_number: u8,
    last_section_number: u8,
    body: &[u8],
) -> Bytes {
    let section_length = LONG_HEADER_SIZE - 3 + body.len() + CRC_SIZE;
    let mut buf = BytesMut::with_capacity(3 + section_length);
    buf.put_u8(table_id);
    buf.put_u16(0xb000 | (section_length as u16 & 0x0fff));
    buf.put_u16(table_id_extension);
    buf.put_u8(0xc1 | (version & 0x1f) << 1);
    buf.put_u8(section_number);
    buf.put_u8(last_section_number);
    buf.put_slice(body);
    let crc = CRC.calculate(&buf);
    buf.put_u32(crc);
    buf.freeze()
}

/// Splits a section into transport packets on `pid`, stuffing the last one.
pub fn packetize(pid: u16, section: &[u8], continuity_counter: &mut u8) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    let mut remaining = section;
    let mut first = true;

    while first || !remaining.is_empty() {
        let start = out.len();
        TSHeader {
            payload_unit_start: first,
            pid,
            continuity_counter: *continuity_counter,
            ..TSHeader::default()
        }
        .write_to(&mut out)?;
        *continuity_counter = (*continuity_counter + 1) & 0x0f;

        let mut room = TS_PACKET_SIZE - TS_HEADER_SIZE;
        if first {
            out.put_u8(0); // pointer_field
            room -= 1;
        }
        let take = room.min(remaining.len());
        out.put_slice(&remaining[..take]);
        remaining = &remaining[take..];
        out.put_bytes(STUFFING, TS_PACKET_SIZE - (out.len() - start));
        first = false;
    }

    Ok(out.to_vec())
}
