//! TS input module: probing, session lifecycle and the read cycle.
//!
//! A [`TsInput`] session wraps an already opened [`Source`]. [`TsInput::init`]
//! prepares the netlist and registers the PAT stream, each
//! [`TsInput::read_cycle`] waits at most one poll timeout for data and moves
//! whole packets into a [`ReadBatch`], and [`TsInput::end`] releases what
//! `init` set up.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};

use super::types::*;
use crate::config::Config;
use crate::error::{InputError, Result};
use crate::format::Input;
use crate::netlist::{Netlist, NetlistConfig, NetlistStats, ReadBatch};
use crate::source::{strip_file_scheme, Source};
use crate::stream::StreamRegistry;

/// Stream registry specialised for transport streams
pub type TsStreams = StreamRegistry<TsStreamData, EsTsData>;

/// Outcome of a successful read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The batch holds the packets read, possibly none
    Ok,
    /// Reserved: the TS input never reports end of stream
    Eof,
}

/// Session state, moved forward by `init` and `end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    TornDown,
}

/// Counters kept by a session across read cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub cycles: u64,
    pub idle_ticks: u64,
    pub packets: u64,
    pub bytes: u64,
    pub bad_sync: u64,
    pub errors: u64,
}

/// Private read state of a session
#[derive(Debug, Clone)]
pub struct ReadState {
    poll_timeout: Duration,
}

impl ReadState {
    pub fn new(poll_timeout: Duration) -> Self {
        Self { poll_timeout }
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

/// Scores how likely `source` is a transport stream.
///
/// A forced "ts" method wins outright. Otherwise any source that can be
/// opened gets a weak score of 1; the content is not inspected.
pub fn probe(source: &str, config: &Config) -> u32 {
    if config.is_method_forced("ts") {
        return MAX_SCORE;
    }

    let path = strip_file_scheme(source);
    match File::open(path) {
        Ok(_file) => 1,
        Err(e) => {
            debug!("TS input: cannot open {}: {}", path, e);
            0
        }
    }
}

/// A TS input session over `S`
pub struct TsInput<S> {
    source: S,
    config: Config,
    state: LifecycleState,
    error: bool,
    read_state: Option<ReadState>,
    netlist: Option<Netlist>,
    streams: TsStreams,
    stats: InputStats,
}

impl<S: Source> TsInput<S> {
    pub fn new(source: S, config: Config) -> Self {
        Self {
            source,
            config,
            state: LifecycleState::Uninitialized,
            error: false,
            read_state: None,
            netlist: None,
            streams: TsStreams::new(),
            stats: InputStats::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Set when initialisation failed fatally
    pub fn is_errored(&self) -> bool {
        self.error
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> InputStats {
        self.stats
    }

    pub fn netlist(&self) -> Option<&Netlist> {
        self.netlist.as_ref()
    }

    pub fn netlist_stats(&self) -> Option<NetlistStats> {
        self.netlist.as_ref().map(Netlist::stats)
    }

    pub fn streams(&self) -> &TsStreams {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut TsStreams {
        &mut self.streams
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// A batch sized for this session's reads.
    pub fn new_batch(&self) -> ReadBatch {
        ReadBatch::new(self.config.read_once)
    }

    /// Prepares the session: read state, netlist, stream state and the PAT
    /// stream. Any failure marks the session as errored.
    pub fn init(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(InputError::Fatal(format!(
                "TS input: cannot initialize a session in state {:?}",
                self.state
            )));
        }

        self.read_state = Some(ReadState::new(self.config.poll_timeout()));

        let netlist_config = NetlistConfig::new(
            self.config.nb_data,
            self.config.nb_pes,
            TS_PACKET_SIZE,
            self.config.read_once,
        );
        let netlist = match Netlist::new(netlist_config) {
            Ok(netlist) => netlist,
            Err(e) => {
                error!("TS input: could not initialize netlist: {}", e);
                self.error = true;
                self.read_state = None;
                return Err(e.into());
            }
        };
        self.netlist = Some(netlist);

        self.streams.init_stream(TsStreamData::new());

        // The PAT belongs to no program; catching it leads to the PMTs and
        // then to the other streams.
        if let Err(e) = self.streams.add_es(None, PID_PAT, EsTsData::psi(PsiType::Pat)) {
            error!("TS input: could not register the PAT: {}", e);
            self.error = true;
            self.read_state = None;
            return Err(e);
        }

        self.state = LifecycleState::Ready;
        info!(
            "TS input ready: {} buffers, {} per read, poll timeout {:?}",
            self.config.nb_data,
            self.config.read_once,
            self.config.poll_timeout()
        );
        Ok(())
    }

    /// Removes the PAT stream if still present and drops the read state.
    /// Safe to call more than once.
    pub fn end(&mut self) {
        if self.streams.remove_es(PID_PAT).is_some() {
            debug!("TS input: PAT stream removed");
        }
        self.read_state = None;
        self.state = LifecycleState::TornDown;
    }

    /// Runs one read cycle: waits up to the poll timeout for the source, then
    /// reads at most one batch of packets into `batch`.
    ///
    /// An idle source yields `Ok` with an empty batch, after the poll timeout
    /// even when the source reported ready but had nothing to read. Packets
    /// with a bad sync byte are logged and still delivered. Datagram sources
    /// never carry trailing bytes into the next read.
    pub async fn read_cycle(&mut self, batch: &mut ReadBatch) -> Result<ReadStatus> {
        batch.reset();

        let (Some(read_state), Some(netlist)) = (self.read_state.as_ref(), self.netlist.as_ref()) else {
            return Err(InputError::NotReady);
        };
        if self.state != LifecycleState::Ready {
            return Err(InputError::NotReady);
        }
        let poll_timeout = read_state.poll_timeout();
        self.stats.cycles += 1;

        let Some(mut vector) = netlist.acquire_scatter_vector() else {
            warn!("TS input: empty netlist");
            self.stats.errors += 1;
            return Err(InputError::PoolExhausted);
        };

        let deadline = Instant::now() + poll_timeout;
        match timeout(poll_timeout, self.source.readable()).await {
            Err(_elapsed) => {
                self.stats.idle_ticks += 1;
                return Ok(ReadStatus::Ok);
            }
            Ok(Err(e)) => {
                error!("TS input: error in select: {}", e);
                self.stats.errors += 1;
                return Err(InputError::Poll(e));
            }
            Ok(Ok(())) => {}
        }

        let bytes_read = match self.source.try_read_vectored(&mut vector.io_slices()) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.idle_ticks += 1;
                return Ok(ReadStatus::Ok);
            }
            Err(e) => {
                error!("TS input: could not readv: {}", e);
                self.stats.errors += 1;
                return Err(InputError::Read(e));
            }
        };

        let count = if self.source.preserves_boundaries() {
            netlist.commit_datagram(vector, bytes_read, batch)
        } else {
            netlist.commit(vector, bytes_read, batch)
        };

        if bytes_read == 0 {
            // Always-ready sources (files at EOF, closed peers) read nothing:
            // wait out the poll timeout rather than spin.
            self.stats.idle_ticks += 1;
            sleep_until(deadline).await;
            return Ok(ReadStatus::Ok);
        }
        self.stats.bytes += bytes_read as u64;
        self.stats.packets += count as u64;

        for packet in batch.iter() {
            if !packet.sync_ok() {
                error!(
                    "TS input: bad TS packet (sync byte 0x{:02x} != 0x{:02x})",
                    packet.buffer()[0],
                    TS_SYNC_BYTE
                );
                self.stats.bad_sync += 1;
            }
        }

        Ok(ReadStatus::Ok)
    }
}

#[async_trait]
impl<S: Source> Input for TsInput<S> {
    fn probe(source: &str, config: &Config) -> u32 {
        probe(source, config)
    }

    fn init(&mut self) -> Result<()> {
        TsInput::init(self)
    }

    fn end(&mut self) {
        TsInput::end(self)
    }

    async fn read_cycle(&mut self, batch: &mut ReadBatch) -> Result<ReadStatus> {
        TsInput::read_cycle(self, batch).await
    }

    fn new_batch(&self) -> ReadBatch {
        TsInput::new_batch(self)
    }

    fn streams_mut(&mut self) -> &mut TsStreams {
        TsInput::streams_mut(self)
    }

    fn config(&self) -> &Config {
        TsInput::config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileSource;
    use pretty_assertions::assert_eq;

    fn input(config: Config) -> TsInput<FileSource> {
        let file = tempfile::tempfile().unwrap();
        TsInput::new(FileSource::from(file), config)
    }

    #[test]
    fn test_probe_forced_method() {
        let config = Config {
            input_method: Some("ts".into()),
            ..Config::default()
        };
        assert_eq!(probe("/definitely/not/here.ts", &config), MAX_SCORE);
    }

    #[test]
    fn test_probe_opens_source() {
        let config = Config::default();
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().display().to_string();

        assert_eq!(probe(&path, &config), 1);
        assert_eq!(probe(&format!("file:{path}"), &config), 1);
        assert_eq!(probe(&format!("FILE:{path}"), &config), 1);
        assert_eq!(probe("/definitely/not/here.ts", &config), 0);
        assert_eq!(probe("file:/definitely/not/here.ts", &config), 0);
    }

    #[test]
    fn test_init_registers_pat() {
        let mut session = input(Config::default());
        assert_eq!(session.state(), LifecycleState::Uninitialized);
        session.init().unwrap();
        assert_eq!(session.state(), LifecycleState::Ready);

        let pat = session.streams().find_es(PID_PAT).unwrap();
        assert_eq!(pat.program, None);
        assert!(pat.demux_data.psi);
        assert_eq!(pat.demux_data.psi_type, Some(PsiType::Pat));
        let section = pat.demux_data.psi_section.as_ref().unwrap();
        assert!(section.is_complete());
        assert_eq!(section.pending(), 0);
        assert_eq!(
            session.streams().demux_data().unwrap().pat_version,
            PatVersion::Uninitialized
        );
    }

    #[test]
    fn test_init_fails_on_bad_netlist() {
        let mut session = input(Config {
            nb_data: 2,
            read_once: 4,
            ..Config::default()
        });
        assert!(matches!(session.init(), Err(InputError::Pool(_))));
        assert!(session.is_errored());
        assert_eq!(session.state(), LifecycleState::Uninitialized);
        assert!(session.streams().find_es(PID_PAT).is_none());
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let mut session = input(Config::default());
        session.init().unwrap();
        assert!(session.init().is_err());
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut session = input(Config::default());
        session.init().unwrap();
        session.end();
        assert!(session.streams().find_es(PID_PAT).is_none());
        assert_eq!(session.state(), LifecycleState::TornDown);
        session.end();
        assert_eq!(session.state(), LifecycleState::TornDown);
    }

    #[tokio::test]
    async fn test_read_before_init() {
        let mut session = input(Config::default());
        let mut batch = session.new_batch();
        assert!(matches!(
            session.read_cycle(&mut batch).await,
            Err(InputError::NotReady)
        ));
    }
}
