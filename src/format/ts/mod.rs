//! # MPEG Transport Stream (TS) Input
//!
//! This module reads MPEG Transport Streams from files and sockets and hands
//! fixed-size packets to a demultiplexer:
//!
//! - Probing a source for the TS input method
//! - Session lifecycle: netlist set-up and PAT stream bootstrap
//! - Read cycles: bounded readiness wait, vectored read straight into pool
//!   buffers, sync byte validation
//! - PSI section assembly and PAT/PMT driven stream discovery
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tsinput::config::Config;
//! use tsinput::format::ts::{InputThread, TsDemux, TsInput};
//! use tsinput::source;
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new();
//! let source = source::open("udp://@239.1.1.1:1234").await?;
//!
//! let (stop_tx, stop_rx) = watch::channel(false);
//! let mut thread = InputThread::new(TsInput::new(source, config), TsDemux::new());
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop_tx.send(true).ok();
//! });
//! thread.run(stop_rx).await?;
//! # Ok(())
//! # }
//! ```

/// TS demuxer registering programs and streams from PAT/PMT sections
pub mod demuxer;

/// Input thread loop driving read cycles into a demuxer
pub mod driver;

/// Probe, lifecycle and read cycle of the TS input
pub mod input;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PSI section assembly and framing
pub mod psi;

/// Core TS types and constants
pub mod types;

// Re-export commonly used types and constants
pub use demuxer::{DemuxStats, TsDemux};
pub use driver::InputThread;
pub use input::{probe, InputStats, LifecycleState, ReadStatus, TsInput, TsStreams};
pub use psi::PsiSection;
pub use types::{
    EsTsData,
    PatVersion,
    PsiType,
    TSHeader,
    TsStreamData,
    INPUT_READ_ONCE,
    MAX_SCORE,
    PID_PAT,
    TS_PACKET_SIZE,
    TS_SYNC_BYTE,
};
