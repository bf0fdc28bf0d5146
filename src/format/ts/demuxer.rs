use log::{debug, info, warn};

use super::input::TsStreams;
use super::parser::TSPacketParser;
use super::psi::{PsiSection, Section};
use super::types::*;
use crate::error::{InputError, Result};
use crate::format::Demux;
use crate::netlist::DataPacket;

/// Counters kept by the demuxer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub packets: u64,
    /// Packets skipped because they do not start with the sync byte
    pub bad_sync: u64,
    pub transport_errors: u64,
    /// Packets on PIDs with no registered stream
    pub unknown_pid: u64,
    pub duplicates: u64,
    pub discontinuities: u64,
    pub sections: u64,
    pub bad_sections: u64,
}

/// MPEG Transport Stream demuxer.
///
/// Follows the PAT to the program maps and registers every announced
/// program and elementary stream in the stream registry. Payload of
/// non-PSI streams is counted, not decoded.
///
/// Packets that fail framing are dropped here: the input forwards them
/// untouched and re-synchronisation is left to this stage.
#[derive(Debug, Default)]
pub struct TsDemux {
    parser: TSPacketParser,
    stats: DemuxStats,
}

impl TsDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    fn demux_packet(&mut self, streams: &mut TsStreams, data: &[u8]) {
        self.stats.packets += 1;

        let header = match self.parser.parse_header(data) {
            Ok(header) => header,
            Err(e) => {
                debug!("TS demux: skipping packet: {}", e);
                self.stats.bad_sync += 1;
                return;
            }
        };
        if header.transport_error {
            self.stats.transport_errors += 1;
            return;
        }

        let Some(es) = streams.find_es_mut(header.pid) else {
            self.stats.unknown_pid += 1;
            return;
        };

        let discontinuity_flag = matches!(
            self.parser.parse_adaptation_field(data, &header),
            Ok(Some(ref field)) if field.discontinuity
        );

        if header.contains_payload {
            if let Some(previous) = es.demux_data.continuity_counter {
                if header.continuity_counter == previous && !discontinuity_flag {
                    self.stats.duplicates += 1;
                    return;
                }
                if header.continuity_counter != (previous + 1) & 0x0f && !discontinuity_flag {
                    debug!(
                        "TS demux: continuity error on PID 0x{:04x} ({} -> {})",
                        header.pid, previous, header.continuity_counter
                    );
                    self.stats.discontinuities += 1;
                    es.demux_data.discontinuities += 1;
                    // A section straddling the gap is unusable.
                    if let Some(section) = es.demux_data.psi_section.as_mut() {
                        *section = PsiSection::complete();
                    }
                }
            }
            es.demux_data.continuity_counter = Some(header.continuity_counter);
        }
        es.demux_data.packets += 1;

        if !es.demux_data.psi {
            return;
        }
        let payload = match self.parser.payload(data, &header) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                debug!("TS demux: PID 0x{:04x}: {}", header.pid, e);
                return;
            }
        };

        let psi_type = es.demux_data.psi_type;
        let sections = es
            .demux_data
            .psi_section
            .get_or_insert_with(PsiSection::complete)
            .push(payload, header.payload_unit_start);

        for section in sections {
            self.handle_section(streams, psi_type, &section);
        }
    }

    fn handle_section(&mut self, streams: &mut TsStreams, psi_type: Option<PsiType>, data: &[u8]) {
        let section = match Section::parse(data) {
            Ok(section) => section,
            Err(e) => {
                warn!("TS demux: dropping section: {}", e);
                self.stats.bad_sections += 1;
                return;
            }
        };
        if !section.current_next {
            return;
        }
        self.stats.sections += 1;

        let result = match psi_type {
            Some(PsiType::Pat) => self.apply_pat(streams, &section),
            Some(PsiType::Pmt) => self.apply_pmt(streams, &section),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("TS demux: {}", e);
            self.stats.bad_sections += 1;
        }
    }

    fn apply_pat(&mut self, streams: &mut TsStreams, section: &Section<'_>) -> Result<()> {
        let pat = self.parser.parse_pat(section)?;

        let stream = streams.demux_data_mut().ok_or(InputError::NotReady)?;
        if stream.pat_version == PatVersion::Version(pat.version) {
            return Ok(());
        }

        let mut assembly = match stream.pat_assembly.take() {
            Some(assembly) if assembly.matches(pat.version, section.last_section_number) => assembly,
            _ => PatAssembly::new(pat.version, section.last_section_number),
        };
        if !assembly.insert(section.section_number, pat.entries) {
            debug!(
                "TS demux: PAT section {} past last section {}",
                section.section_number, section.last_section_number
            );
        }
        if !assembly.is_complete() {
            stream.pat_assembly = Some(assembly);
            return Ok(());
        }
        stream.pat_version = PatVersion::Version(pat.version);
        stream.transport_stream_id = Some(pat.transport_stream_id);

        let entries = assembly.into_entries();
        let announced: Vec<&PATEntry> = entries.iter().filter(|e| e.program_number != 0).collect();
        info!(
            "TS demux: PAT version {} (ts id {}), {} programs",
            pat.version,
            pat.transport_stream_id,
            announced.len()
        );

        let stale: Vec<u16> = streams
            .programs()
            .map(|p| p.number)
            .filter(|n| !announced.iter().any(|e| e.program_number == *n))
            .collect();
        for number in stale {
            debug!("TS demux: program {} withdrawn", number);
            streams.remove_program(number);
        }

        for entry in announced {
            streams.add_program(entry.program_number);
            if streams.find_es(entry.program_map_pid).is_none() {
                streams.add_es(
                    Some(entry.program_number),
                    entry.program_map_pid,
                    EsTsData::psi(PsiType::Pmt),
                )?;
                debug!(
                    "TS demux: program {} map on PID 0x{:04x}",
                    entry.program_number, entry.program_map_pid
                );
            }
        }
        Ok(())
    }

    fn apply_pmt(&mut self, streams: &mut TsStreams, section: &Section<'_>) -> Result<()> {
        let pmt = self.parser.parse_pmt(section)?;

        let program = streams.find_program_mut(pmt.program_number).ok_or_else(|| {
            InputError::InvalidData(format!("PMT for unknown program {}", pmt.program_number))
        })?;
        if program.version == Some(pmt.version) {
            return Ok(());
        }
        program.version = Some(pmt.version);

        for info in &pmt.elementary_stream_infos {
            if streams.find_es(info.elementary_pid).is_some() {
                continue;
            }
            streams.add_es(
                Some(pmt.program_number),
                info.elementary_pid,
                EsTsData::elementary(info.stream_type),
            )?;
            info!(
                "TS demux: program {} stream on PID 0x{:04x}, type 0x{:02x}",
                pmt.program_number, info.elementary_pid, info.stream_type
            );
        }
        Ok(())
    }
}

impl Demux for TsDemux {
    fn demux(&mut self, streams: &mut TsStreams, packet: DataPacket) {
        self.demux_packet(streams, packet.buffer());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::psi::{packetize, write_section, write_section_numbered};
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    fn streams() -> TsStreams {
        let mut streams = TsStreams::new();
        streams.init_stream(TsStreamData::new());
        streams.add_es(None, PID_PAT, EsTsData::psi(PsiType::Pat)).unwrap();
        streams
    }

    fn pat_packets(version: u8, programs: &[(u16, u16)], cc: &mut u8) -> Vec<u8> {
        pat_section_packets(version, 0, 0, programs, cc)
    }

    fn pat_section_packets(
        version: u8,
        section_number: u8,
        last_section_number: u8,
        programs: &[(u16, u16)],
        cc: &mut u8,
    ) -> Vec<u8> {
        let pat = PAT {
            entries: programs
                .iter()
                .map(|&(program_number, pid)| PATEntry {
                    program_number,
                    network_pid: 0,
                    program_map_pid: pid,
                })
                .collect(),
            ..PAT::default()
        };
        let mut body = BytesMut::new();
        pat.write_to(&mut body).unwrap();
        let section = write_section_numbered(
            TABLE_ID_PAT,
            1,
            version,
            section_number,
            last_section_number,
            &body,
        );
        packetize(PID_PAT, &section, cc).unwrap()
    }

    fn feed(demux: &mut TsDemux, streams: &mut TsStreams, packets: &[u8]) {
        for packet in packets.chunks(TS_PACKET_SIZE) {
            demux.demux_packet(streams, packet);
        }
    }

    #[test]
    fn test_pat_registers_programs() {
        let mut demux = TsDemux::new();
        let mut streams = streams();
        let mut cc = 0;
        feed(&mut demux, &mut streams, &pat_packets(5, &[(1, 0x100), (2, 0x200)], &mut cc));

        assert_eq!(
            streams.demux_data().unwrap().pat_version,
            PatVersion::Version(5)
        );
        let pmt = streams.find_es(0x100).unwrap();
        assert_eq!(pmt.program, Some(1));
        assert_eq!(pmt.demux_data.psi_type, Some(PsiType::Pmt));
        assert!(streams.find_es(0x200).is_some());
        assert_eq!(demux.stats().sections, 1);
    }

    #[test]
    fn test_new_pat_version_withdraws_programs() {
        let mut demux = TsDemux::new();
        let mut streams = streams();
        let mut cc = 0;
        feed(&mut demux, &mut streams, &pat_packets(0, &[(1, 0x100), (2, 0x200)], &mut cc));
        feed(&mut demux, &mut streams, &pat_packets(1, &[(2, 0x200)], &mut cc));

        assert!(streams.find_program(1).is_none());
        assert!(streams.find_es(0x100).is_none());
        assert!(streams.find_es(0x200).is_some());
    }

    #[test]
    fn test_pat_split_over_sections() {
        let mut demux = TsDemux::new();
        let mut streams = streams();
        let mut cc = 0;

        feed(&mut demux, &mut streams, &pat_section_packets(2, 0, 1, &[(1, 0x100)], &mut cc));
        assert_eq!(
            streams.demux_data().unwrap().pat_version,
            PatVersion::Uninitialized
        );
        assert!(streams.find_program(1).is_none());

        feed(&mut demux, &mut streams, &pat_section_packets(2, 1, 1, &[(2, 0x200)], &mut cc));
        assert_eq!(
            streams.demux_data().unwrap().pat_version,
            PatVersion::Version(2)
        );
        assert!(streams.find_es(0x100).is_some());
        assert!(streams.find_es(0x200).is_some());

        // Repeats of the applied version keep both programs.
        feed(&mut demux, &mut streams, &pat_section_packets(2, 0, 1, &[(1, 0x100)], &mut cc));
        assert!(streams.find_program(2).is_some());
        assert_eq!(demux.stats().sections, 3);
    }

    #[test]
    fn test_bad_crc_is_ignored() {
        let mut demux = TsDemux::new();
        let mut streams = streams();
        let mut cc = 0;
        let mut packets = pat_packets(0, &[(1, 0x100)], &mut cc);
        packets[4 + 1 + 9] ^= 0xff;
        feed(&mut demux, &mut streams, &packets);

        assert_eq!(
            streams.demux_data().unwrap().pat_version,
            PatVersion::Uninitialized
        );
        assert_eq!(demux.stats().bad_sections, 1);
        assert!(streams.find_es(0x100).is_none());
    }

    #[test]
    fn test_pmt_registers_streams() {
        let mut demux = TsDemux::new();
        let mut streams = streams();
        let mut cc = 0;
        feed(&mut demux, &mut streams, &pat_packets(0, &[(1, 0x100)], &mut cc));

        let pmt = PMT {
            pcr_pid: 0x101,
            elementary_stream_infos: vec![
                ElementaryStreamInfo {
                    stream_type: STREAM_TYPE_H264,
                    elementary_pid: 0x101,
                    descriptors: vec![],
                },
                ElementaryStreamInfo {
                    stream_type: STREAM_TYPE_AAC,
                    elementary_pid: 0x102,
                    descriptors: vec![],
                },
            ],
            ..PMT::default()
        };
        let mut body = BytesMut::new();
        pmt.write_to(&mut body).unwrap();
        let mut pmt_cc = 0;
        let packets = packetize(0x100, &write_section(TABLE_ID_PMT, 1, 0, &body), &mut pmt_cc).unwrap();
        feed(&mut demux, &mut streams, &packets);

        let video = streams.find_es(0x101).unwrap();
        assert_eq!(video.program, Some(1));
        assert_eq!(video.demux_data.stream_type, Some(STREAM_TYPE_H264));
        assert!(!video.demux_data.psi);
        assert_eq!(streams.find_program(1).unwrap().version, Some(0));
        assert_eq!(streams.find_program(1).unwrap().es_ids, vec![0x100, 0x101, 0x102]);
    }

    #[test]
    fn test_framing_and_unknown_pids() {
        let mut demux = TsDemux::new();
        let mut streams = streams();

        let mut bad = vec![0u8; TS_PACKET_SIZE];
        bad[0] = 0x48;
        demux.demux_packet(&mut streams, &bad);

        let mut unknown = vec![0xffu8; TS_PACKET_SIZE];
        unknown[..4].copy_from_slice(&[0x47, 0x1f, 0xff, 0x10]);
        demux.demux_packet(&mut streams, &unknown);

        let stats = demux.stats();
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.bad_sync, 1);
        assert_eq!(stats.unknown_pid, 1);
    }

    #[test]
    fn test_duplicate_and_lost_packets() {
        let mut demux = TsDemux::new();
        let mut streams = streams();
        let mut cc = 0;
        let packets = pat_packets(0, &[(1, 0x100)], &mut cc);

        feed(&mut demux, &mut streams, &packets);
        feed(&mut demux, &mut streams, &packets);
        assert_eq!(demux.stats().duplicates, 1);

        cc = 7;
        feed(&mut demux, &mut streams, &pat_packets(1, &[(1, 0x100)], &mut cc));
        assert_eq!(demux.stats().discontinuities, 1);
        assert_eq!(
            streams.demux_data().unwrap().pat_version,
            PatVersion::Version(1)
        );
    }
}
