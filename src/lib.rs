#![doc(html_root_url = "https://docs.rs/tsinput/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsinput - MPEG Transport Stream input
//!
//! `tsinput` reads MPEG-2 Transport Streams from files, TCP, UDP (unicast or
//! multicast) and Unix sockets, and hands them out as fixed-size 188-byte
//! packets to a demultiplexer. Packet buffers come from a preallocated
//! netlist and the bytes are read straight into them with a vectored read.
//!
//! ## Features
//!
//! - Probing of a source name for the TS input method
//! - Bounded read cycles: readiness wait with a poll timeout, then one
//!   vectored read of up to `read_once` packets
//! - Partial packets carried over to the next read on stream sockets
//! - PSI section assembly with CRC-32 checks, PAT/PMT driven discovery of
//!   programs and elementary streams
//! - An input thread loop with a stop signal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsinput::format::{InputThread, TsDemux, TsInput};
//! use tsinput::{config, source};
//! use std::time::Duration;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = source::open("file:/tmp/capture.ts").await?;
//!     let input = TsInput::new(source, config::get_config());
//!
//!     let (stop_tx, stop_rx) = watch::channel(false);
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_secs(10)).await;
//!         stop_tx.send(true).ok();
//!     });
//!
//!     let mut thread = InputThread::new(input, TsDemux::new());
//!     thread.run(stop_rx).await?;
//!
//!     println!("{:?}", thread.demux().stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `format`: the input and demux traits and the TS implementation
//! - `netlist`: preallocated packet buffers and read batches
//! - `source`: readable sources and the source name opener
//! - `stream`: program and elementary stream registry
//! - `config`: runtime configuration (defaults, environment, file)
//! - `error`: error type and `Result` alias
//! - `utils`: CRC-32/MPEG-2

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Input and demux traits, TS input implementation
pub mod format;

/// Packet buffer pool
pub mod netlist;

/// Readable sources (files, sockets)
pub mod source;

/// Program and elementary stream registry
pub mod stream;

/// Common utilities and helper functions
pub mod utils;

pub use error::{InputError, Result};
