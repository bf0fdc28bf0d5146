//! # Netlist: pre-allocated packet buffer pool
//!
//! The netlist owns a fixed set of packet-sized slots and a fixed number of
//! assembled-unit slots. Input modules read straight into free slots through a
//! [`ScatterVector`] and turn the filled ones into [`DataPacket`] handles with
//! [`Netlist::commit`]. Nothing is copied: a handle owns its slot until it is
//! dropped, at which point the slot goes back on the free list.
//!
//! ```rust
//! use tsinput::netlist::{Netlist, NetlistConfig, ReadBatch};
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let netlist = Netlist::new(NetlistConfig::new(16, 4, 188, 4))?;
//! let mut batch = ReadBatch::new(4);
//!
//! let data = vec![0x47u8; 188 * 2];
//! let mut vector = netlist.acquire_scatter_vector().unwrap();
//! let n = (&data[..]).read_vectored(&mut vector.io_slices())?;
//! assert_eq!(netlist.commit(vector, n, &mut batch), 2);
//! assert_eq!(batch.len(), 2);
//! # Ok(())
//! # }
//! ```

use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io::IoSliceMut;
use std::sync::Arc;
use thiserror::Error;

use crate::format::ts::types::TS_SYNC_BYTE;

/// Errors raised while setting up the netlist
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// One of the pool dimensions is zero
    #[error("netlist needs a non-zero {0}")]
    ZeroSized(&'static str),

    /// A read batch would need more buffers than the pool holds
    #[error("read batch of {read_once} packets does not fit in {nb_data} buffers")]
    BatchTooLarge { read_once: usize, nb_data: usize },
}

/// Dimensions of a netlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetlistConfig {
    /// Number of packet buffers
    pub nb_data: usize,
    /// Number of assembled units
    pub nb_pes: usize,
    /// Size of one packet buffer in bytes
    pub buffer_size: usize,
    /// Maximum number of buffers handed out for one read
    pub read_once: usize,
}

impl NetlistConfig {
    pub fn new(nb_data: usize, nb_pes: usize, buffer_size: usize, read_once: usize) -> Self {
        Self {
            nb_data,
            nb_pes,
            buffer_size,
            read_once,
        }
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.nb_data == 0 {
            return Err(PoolError::ZeroSized("buffer count"));
        }
        if self.nb_pes == 0 {
            return Err(PoolError::ZeroSized("unit count"));
        }
        if self.buffer_size == 0 {
            return Err(PoolError::ZeroSized("buffer size"));
        }
        if self.read_once == 0 {
            return Err(PoolError::ZeroSized("read batch"));
        }
        if self.read_once > self.nb_data {
            return Err(PoolError::BatchTooLarge {
                read_once: self.read_once,
                nb_data: self.nb_data,
            });
        }
        Ok(())
    }
}

/// Snapshot of the pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetlistStats {
    pub nb_data: usize,
    pub nb_pes: usize,
    pub free_data: usize,
    pub free_pes: usize,
    /// Bytes of an incomplete packet waiting for the next read
    pub pending_bytes: usize,
}

struct Slot {
    index: usize,
    buf: Box<[u8]>,
}

struct Lists {
    /// Free slots in read order. When `partial > 0` the front slot already
    /// holds that many bytes of the next packet.
    free: VecDeque<Slot>,
    partial: usize,
    free_pes: usize,
    outstanding: bool,
}

struct Shared {
    config: NetlistConfig,
    lists: Mutex<Lists>,
}

impl Shared {
    fn release(&self, slot: Slot) {
        self.lists.lock().free.push_back(slot);
    }

    fn release_unit(&self) {
        self.lists.lock().free_pes += 1;
    }

    /// Puts back the slots of a vector that was not (fully) used, front first.
    fn restore(&self, slots: Vec<Slot>, partial: usize) {
        let mut lists = self.lists.lock();
        for slot in slots.into_iter().rev() {
            lists.free.push_front(slot);
        }
        lists.partial = partial;
        lists.outstanding = false;
    }
}

/// Handle to a packet buffer pool. Clones share the same pool.
#[derive(Clone)]
pub struct Netlist {
    shared: Arc<Shared>,
}

impl Netlist {
    /// Allocates every packet buffer up front.
    pub fn new(config: NetlistConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let free = (0..config.nb_data)
            .map(|index| Slot {
                index,
                buf: vec![0u8; config.buffer_size].into_boxed_slice(),
            })
            .collect();

        debug!(
            "netlist: {} buffers of {} bytes, {} units, {} per read",
            config.nb_data, config.buffer_size, config.nb_pes, config.read_once
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                lists: Mutex::new(Lists {
                    free,
                    partial: 0,
                    free_pes: config.nb_pes,
                    outstanding: false,
                }),
            }),
        })
    }

    pub fn config(&self) -> &NetlistConfig {
        &self.shared.config
    }

    /// Hands out up to `read_once` free slots as one write target.
    ///
    /// Returns `None` when no slot is free or when a vector from this pool is
    /// still outstanding.
    pub fn acquire_scatter_vector(&self) -> Option<ScatterVector> {
        let mut lists = self.shared.lists.lock();
        if lists.outstanding || lists.free.is_empty() {
            return None;
        }

        let count = lists.free.len().min(self.shared.config.read_once);
        let slots: Vec<Slot> = lists.free.drain(..count).collect();
        let offset = std::mem::take(&mut lists.partial);
        lists.outstanding = true;

        Some(ScatterVector {
            slots,
            offset,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Converts the first `bytes_read` bytes written into `vector` into packet
    /// handles, stored in `batch` in source order. Returns the packet count.
    ///
    /// Bytes that do not complete a packet stay in the pool and are prepended
    /// to the next read.
    pub fn commit(&self, vector: ScatterVector, bytes_read: usize, batch: &mut ReadBatch) -> usize {
        self.commit_with(vector, bytes_read, batch, true)
    }

    /// Like [`Netlist::commit`] for a read that returned one datagram: bytes
    /// past the last whole packet are dropped and nothing is carried over.
    pub fn commit_datagram(&self, vector: ScatterVector, bytes_read: usize, batch: &mut ReadBatch) -> usize {
        self.commit_with(vector, bytes_read, batch, false)
    }

    fn commit_with(
        &self,
        mut vector: ScatterVector,
        bytes_read: usize,
        batch: &mut ReadBatch,
        carry: bool,
    ) -> usize {
        let size = self.shared.config.buffer_size;
        let capacity = vector.capacity();
        let filled = vector.offset + bytes_read.min(capacity);
        let whole = filled / size;
        let remainder = filled % size;

        let mut slots = std::mem::take(&mut vector.slots);
        let rest = slots.split_off(whole);

        if batch.slots.len() < whole {
            batch.slots.resize_with(whole, || None);
        }
        for (entry, slot) in batch.slots.iter_mut().zip(slots) {
            *entry = Some(DataPacket {
                slot: Some(slot),
                shared: Arc::clone(&self.shared),
            });
        }

        if remainder > 0 && !carry {
            debug!("netlist: dropping {} trailing bytes of a datagram", remainder);
        }
        self.shared.restore(rest, if carry { remainder } else { 0 });
        whole
    }

    /// Takes a single free buffer outside of a read, for demux-side use.
    pub fn new_packet(&self) -> Option<DataPacket> {
        let mut lists = self.shared.lists.lock();
        // The front slot may hold the start of the next packet.
        let reserved = usize::from(lists.partial > 0);
        if lists.free.len() <= reserved {
            return None;
        }
        let mut slot = lists.free.pop_back()?;
        slot.buf.fill(0);
        Some(DataPacket {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Takes an assembled-unit slot.
    pub fn new_pes(&self) -> Option<PesUnit> {
        let mut lists = self.shared.lists.lock();
        if lists.free_pes == 0 {
            return None;
        }
        lists.free_pes -= 1;
        Some(PesUnit {
            packets: Vec::new(),
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn stats(&self) -> NetlistStats {
        let lists = self.shared.lists.lock();
        NetlistStats {
            nb_data: self.shared.config.nb_data,
            nb_pes: self.shared.config.nb_pes,
            free_data: lists.free.len(),
            free_pes: lists.free_pes,
            pending_bytes: lists.partial,
        }
    }
}

impl fmt::Debug for Netlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Netlist")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Writable regions backed by free pool slots, consumed by one read.
///
/// Dropping a vector without committing it gives every slot back, including
/// any bytes carried over from a previous read.
pub struct ScatterVector {
    slots: Vec<Slot>,
    offset: usize,
    shared: Arc<Shared>,
}

impl ScatterVector {
    /// Regions to pass to a vectored read. The first one starts after the
    /// bytes already carried over.
    pub fn io_slices(&mut self) -> Vec<IoSliceMut<'_>> {
        let offset = self.offset;
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(i, slot)| {
                if i == 0 {
                    IoSliceMut::new(&mut slot.buf[offset..])
                } else {
                    IoSliceMut::new(&mut slot.buf[..])
                }
            })
            .collect()
    }

    /// Number of packet slots in the vector.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bytes already present at the start of the first slot.
    pub fn carried(&self) -> usize {
        self.offset
    }

    /// Bytes a read may write into the vector.
    pub fn capacity(&self) -> usize {
        self.slots.len() * self.shared.config.buffer_size - self.offset
    }
}

impl Drop for ScatterVector {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let slots = std::mem::take(&mut self.slots);
        self.shared.restore(slots, self.offset);
    }
}

/// A filled packet buffer. The slot returns to the pool on drop.
pub struct DataPacket {
    slot: Option<Slot>,
    shared: Arc<Shared>,
}

impl DataPacket {
    pub fn buffer(&self) -> &[u8] {
        self.slot.as_ref().map(|s| &s.buf[..]).unwrap_or(&[])
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.slot.as_mut().map(|s| &mut s.buf[..]).unwrap_or(&mut [])
    }

    /// Index of the pool slot backing this packet.
    pub fn slot_index(&self) -> usize {
        self.slot.as_ref().map(|s| s.index).unwrap_or(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Whether the packet starts with the TS sync byte.
    pub fn sync_ok(&self) -> bool {
        self.buffer().first() == Some(&TS_SYNC_BYTE)
    }
}

impl AsRef<[u8]> for DataPacket {
    fn as_ref(&self) -> &[u8] {
        self.buffer()
    }
}

impl Drop for DataPacket {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.release(slot);
        }
    }
}

impl fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPacket")
            .field("slot", &self.slot_index())
            .field("len", &self.len())
            .field("sync_ok", &self.sync_ok())
            .finish()
    }
}

/// An assembled unit: the packets carrying one payload.
pub struct PesUnit {
    packets: Vec<DataPacket>,
    shared: Arc<Shared>,
}

impl PesUnit {
    pub fn push(&mut self, packet: DataPacket) {
        self.packets.push(packet);
    }

    pub fn packets(&self) -> &[DataPacket] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl Drop for PesUnit {
    fn drop(&mut self) {
        // Packets go back first, then the unit slot.
        self.packets.clear();
        self.shared.release_unit();
    }
}

impl fmt::Debug for PesUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PesUnit").field("packets", &self.packets).finish()
    }
}

/// Output of one read cycle: up to `capacity` packets, empty slots last.
#[derive(Debug, Default)]
pub struct ReadBatch {
    slots: Vec<Option<DataPacket>>,
}

impl ReadBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Empties every slot, releasing packets still held by the batch.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn get(&self, index: usize) -> Option<&DataPacket> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn slots(&self) -> &[Option<DataPacket>] {
        &self.slots
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataPacket> {
        self.slots.iter().flatten()
    }

    /// Moves the packets out in order, leaving every slot empty.
    pub fn drain(&mut self) -> impl Iterator<Item = DataPacket> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}
