use super::psi::Section;
use super::types::*;
use crate::error::{InputError, Result};

/// Adaptation field flags relevant to demuxing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
}

#[derive(Debug, Default)]
pub struct TSPacketParser;

impl TSPacketParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(InputError::InvalidData("TS packet too short".into()));
        }

        if data[0] != TS_SYNC_BYTE {
            return Err(InputError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    pub fn parse_adaptation_field(&self, data: &[u8], header: &TSHeader) -> Result<Option<AdaptationField>> {
        if !header.adaptation_field_exists {
            return Ok(None);
        }
        if data.len() <= TS_HEADER_SIZE {
            return Err(InputError::InvalidData("Adaptation field missing".into()));
        }

        let length = data[TS_HEADER_SIZE] as usize;
        if data.len() < TS_HEADER_SIZE + 1 + length {
            return Err(InputError::InvalidData("Adaptation field too short".into()));
        }
        if length == 0 {
            return Ok(Some(AdaptationField {
                length,
                discontinuity: false,
                random_access: false,
            }));
        }

        let flags = data[TS_HEADER_SIZE + 1];
        Ok(Some(AdaptationField {
            length,
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
        }))
    }

    /// Returns the payload bytes of a packet, or `None` when it carries none.
    pub fn payload<'a>(&self, data: &'a [u8], header: &TSHeader) -> Result<Option<&'a [u8]>> {
        if !header.contains_payload {
            return Ok(None);
        }
        let offset = match self.parse_adaptation_field(data, header)? {
            Some(field) => TS_HEADER_SIZE + 1 + field.length,
            None => TS_HEADER_SIZE,
        };
        if offset >= data.len() {
            return Ok(None);
        }
        Ok(Some(&data[offset..]))
    }

    pub fn parse_pat(&self, section: &Section<'_>) -> Result<PAT> {
        if section.table_id != TABLE_ID_PAT {
            return Err(InputError::InvalidData(format!(
                "table 0x{:02x} is not a PAT",
                section.table_id
            )));
        }

        let mut pat = PAT {
            transport_stream_id: section.table_id_extension,
            version: section.version,
            entries: Vec::new(),
        };
        let data = section.body;
        let mut pos = 0;

        while pos + 4 <= data.len() {
            let program_number = ((data[pos] as u16) << 8) | data[pos + 1] as u16;
            let pid = ((data[pos + 2] as u16 & 0x1F) << 8) | data[pos + 3] as u16;
            pat.entries.push(PATEntry {
                program_number,
                network_pid: if program_number == 0 { pid } else { 0 },
                program_map_pid: if program_number != 0 { pid } else { 0 },
            });
            pos += 4;
        }

        Ok(pat)
    }

    pub fn parse_pmt(&self, section: &Section<'_>) -> Result<PMT> {
        if section.table_id != TABLE_ID_PMT {
            return Err(InputError::InvalidData(format!(
                "table 0x{:02x} is not a PMT",
                section.table_id
            )));
        }

        let mut pmt = PMT::new();
        pmt.program_number = section.table_id_extension;
        pmt.version = section.version;

        let data = section.body;
        let end = data.len();
        let mut pos = 0;

        if pos + 2 > end {
            return Err(InputError::InvalidData("PMT too short for PCR PID".into()));
        }

        pmt.pcr_pid = ((data[pos] as u16 & 0x1F) << 8) | data[pos + 1] as u16;
        pos += 2;

        if pos + 2 > end {
            return Err(InputError::InvalidData(
                "PMT too short for program info length".into(),
            ));
        }

        let program_info_length = ((data[pos] as usize & 0x0F) << 8) | data[pos + 1] as usize;
        pos += 2;

        if program_info_length > 0 {
            if pos + program_info_length > end {
                return Err(InputError::InvalidData("Program info data too short".into()));
            }
            pmt.program_descriptors = self.parse_descriptors(&data[pos..pos + program_info_length])?;
            pos += program_info_length;
        }

        while pos + 5 <= end {
            let stream_type = data[pos];
            let elementary_pid = ((data[pos + 1] as u16 & 0x1F) << 8) | data[pos + 2] as u16;
            let es_info_length = ((data[pos + 3] as usize & 0x0F) << 8) | data[pos + 4] as usize;
            pos += 5;

            if pos + es_info_length > end {
                return Err(InputError::InvalidData("ES info data too short".into()));
            }

            let descriptors = self.parse_descriptors(&data[pos..pos + es_info_length])?;
            pos += es_info_length;

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(pmt)
    }

    fn parse_descriptors(&self, data: &[u8]) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        let mut pos = 0;

        while pos + 2 <= data.len() {
            let tag = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(InputError::InvalidData("Descriptor data too short".into()));
            }

            descriptors.push(Descriptor {
                tag,
                data: data[pos..pos + length].to_vec(),
            });
            pos += length;
        }

        Ok(descriptors)
    }
}
