use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::watch;

use super::input::ReadStatus;
use crate::error::{InputError, Result};
use crate::format::{Demux, Input};

/// Back-off after the netlist ran dry, giving the demux time to release buffers
const POOL_BACKOFF: Duration = Duration::from_millis(10);

/// Runs an input session until stopped, feeding every packet to a demux.
///
/// The loop checks the stop signal once per read cycle, so a stop request
/// is honoured within one poll timeout.
pub struct InputThread<I, D> {
    input: I,
    demux: D,
}

impl<I: Input, D: Demux> InputThread<I, D> {
    pub fn new(input: I, demux: D) -> Self {
        Self { input, demux }
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn demux(&self) -> &D {
        &self.demux
    }

    pub fn into_parts(self) -> (I, D) {
        (self.input, self.demux)
    }

    /// Initializes the session, loops over read cycles until `stop` turns
    /// true or too many cycles fail in a row, then ends the session.
    pub async fn run(&mut self, stop: watch::Receiver<bool>) -> Result<()> {
        self.input.init()?;
        let result = self.read_loop(&stop).await;
        self.input.end();
        info!("TS input thread stopped");
        result
    }

    async fn read_loop(&mut self, stop: &watch::Receiver<bool>) -> Result<()> {
        let mut batch = self.input.new_batch();
        let max_errors = self.input.config().max_read_errors;
        let mut failures = 0u32;

        while !*stop.borrow() {
            match self.input.read_cycle(&mut batch).await {
                Ok(ReadStatus::Ok) => {
                    failures = 0;
                    if batch.is_empty() {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    let streams = self.input.streams_mut();
                    for packet in batch.drain() {
                        self.demux.demux(streams, packet);
                    }
                }
                Ok(ReadStatus::Eof) => {
                    debug!("TS input: end of stream");
                    break;
                }
                Err(InputError::PoolExhausted) => {
                    tokio::time::sleep(POOL_BACKOFF).await;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= max_errors {
                        error!("TS input: giving up after {} failed reads: {}", failures, e);
                        return Err(e);
                    }
                    warn!("TS input: read cycle failed ({}/{}): {}", failures, max_errors, e);
                }
            }
        }
        Ok(())
    }
}
