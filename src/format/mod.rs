use crate::config::Config;
use crate::netlist::{DataPacket, ReadBatch};
use crate::Result;

pub mod ts;

use self::ts::{ReadStatus, TsStreams};

/// Capabilities an input module offers to the thread driving it
#[async_trait::async_trait]
pub trait Input: Send {
    /// Scores how likely `source` can be read by this module, 0 meaning not at all
    fn probe(source: &str, config: &Config) -> u32
    where
        Self: Sized;

    /// Prepares the session; an error leaves it unusable
    fn init(&mut self) -> Result<()>;

    /// Releases what `init` set up
    fn end(&mut self);

    /// Reads at most one batch of packets
    async fn read_cycle(&mut self, batch: &mut ReadBatch) -> Result<ReadStatus>;

    /// A batch sized for `read_cycle`
    fn new_batch(&self) -> ReadBatch;

    /// Stream descriptors shared with the demux
    fn streams_mut(&mut self) -> &mut TsStreams;

    fn config(&self) -> &Config;
}

/// Consumer of the packets produced by an input
pub trait Demux: Send {
    /// Takes ownership of one packet; its buffer returns to the pool on drop
    fn demux(&mut self, streams: &mut TsStreams, packet: DataPacket);
}

pub use self::ts::{InputThread, TsDemux, TsInput};
