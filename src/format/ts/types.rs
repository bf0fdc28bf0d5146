use crate::error::Result;
use bytes::{BufMut, BytesMut};

use super::psi::PsiSection;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_CAT: u16 = 0x0001;
pub const PID_NULL: u16 = 0x1fff;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Elementary Stream Types
pub const STREAM_TYPE_MPEG1_VIDEO: u8 = 0x01;
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
pub const STREAM_TYPE_AAC: u8 = 0x0f;
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_H265: u8 = 0x24;

// Constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Packets handed out by one read
pub const INPUT_READ_ONCE: usize = 7;
/// Packet buffers in the netlist
pub const NB_DATA: usize = 16384;
/// Assembled units in the netlist
pub const NB_PES: usize = 8192;

/// Probe score when the TS input method is forced
pub const MAX_SCORE: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PATEntry {
    pub program_number: u16,
    pub network_pid: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PAT {
    pub transport_stream_id: u16,
    pub version: u8,
    pub entries: Vec<PATEntry>,
}

impl PAT {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len() * 4
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            if entry.program_number == 0 {
                buf.put_u16(entry.network_pid & 0x1fff | 7 << 13);
            } else {
                buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PMT {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl PMT {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        // Write PCR PID
        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);

        // Program descriptors
        let prog_desc_len = self
            .program_descriptors
            .iter()
            .map(|d| 2 + d.data.len())
            .sum::<usize>();
        buf.put_u16((prog_desc_len as u16) & 0x3ff | 0xf << 12);

        for desc in &self.program_descriptors {
            buf.put_u8(desc.tag);
            buf.put_u8(desc.data.len() as u8);
            buf.put_slice(&desc.data);
        }

        // Elementary stream infos
        for info in &self.elementary_stream_infos {
            buf.put_u8(info.stream_type);
            buf.put_u16(info.elementary_pid & 0x1fff | 7 << 13);

            let es_desc_len = info
                .descriptors
                .iter()
                .map(|d| 2 + d.data.len())
                .sum::<usize>();
            buf.put_u16((es_desc_len as u16) & 0x3ff | 0xf << 12);

            for desc in &info.descriptors {
                buf.put_u8(desc.tag);
                buf.put_u8(desc.data.len() as u8);
                buf.put_slice(&desc.data);
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: TS_SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);

        Ok(())
    }
}

/// Kind of PSI table carried by a PSI elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsiType {
    Pat,
    Pmt,
}

/// Version of the last PAT applied to the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatVersion {
    #[default]
    Uninitialized,
    Version(u8),
}

/// Sections of a PAT version seen so far, applied once all have arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatAssembly {
    pub version: u8,
    sections: Vec<Option<Vec<PATEntry>>>,
}

impl PatAssembly {
    pub fn new(version: u8, last_section_number: u8) -> Self {
        Self {
            version,
            sections: vec![None; last_section_number as usize + 1],
        }
    }

    /// Whether a section with this header belongs to the same table.
    pub fn matches(&self, version: u8, last_section_number: u8) -> bool {
        self.version == version && self.sections.len() == last_section_number as usize + 1
    }

    /// Stores the entries of one section; numbers past the last are ignored.
    pub fn insert(&mut self, section_number: u8, entries: Vec<PATEntry>) -> bool {
        match self.sections.get_mut(section_number as usize) {
            Some(slot) => {
                *slot = Some(entries);
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.sections.iter().all(Option::is_some)
    }

    /// Entries of every section, in section order.
    pub fn into_entries(self) -> Vec<PATEntry> {
        self.sections.into_iter().flatten().flatten().collect()
    }
}

/// Stream-wide TS demux state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TsStreamData {
    pub pat_version: PatVersion,
    pub transport_stream_id: Option<u16>,
    /// PAT version being collected, when it spans several sections
    pub pat_assembly: Option<PatAssembly>,
}

impl TsStreamData {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per elementary stream TS demux state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EsTsData {
    /// Carries PSI sections rather than PES payload
    pub psi: bool,
    pub psi_type: Option<PsiType>,
    pub psi_section: Option<PsiSection>,
    /// Stream type from the program map, for non-PSI streams
    pub stream_type: Option<u8>,
    pub continuity_counter: Option<u8>,
    pub packets: u64,
    pub discontinuities: u64,
}

impl EsTsData {
    /// State for a PSI stream, with an empty section buffer marked complete.
    pub fn psi(psi_type: PsiType) -> Self {
        Self {
            psi: true,
            psi_type: Some(psi_type),
            psi_section: Some(PsiSection::complete()),
            ..Self::default()
        }
    }

    pub fn elementary(stream_type: u8) -> Self {
        Self {
            stream_type: Some(stream_type),
            ..Self::default()
        }
    }
}
