//! Persistent Store Interface (§4.B, §6.3).
//!
//! Typed read/write of a fixed closed set of NVM records, each framed as a
//! fixed-size byte blob with a trailing 16-bit CRC. A bad CRC on read
//! yields a default-initialized record and raises a diagnostics event; the
//! caller never blocks on a write — writes are queued behind a single
//! in-flight write and flushed on `poll()`. Writes to the *same* record are
//! observed in program order (the queue is FIFO); writes to *different*
//! records may be reordered relative to each other because each is an
//! independent blob on an independent key.
//!
//! The actual flash/FRAM medium is out of scope; [`StorageBackend`] is the
//! named interface the store is built against.

pub mod records;

use heapless::Deque;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{NvmReadError, NvmWriteError};

const MAX_RECORD_BYTES: usize = 256;
const WRITE_QUEUE_DEPTH: usize = 8;

/// Closed set of persisted record kinds (§3, §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordId {
    Soc,
    SysMonSummary,
    ContactorFlags,
    DeepDischargeFlags,
}

impl RecordId {
    fn key(self) -> &'static str {
        match self {
            Self::Soc => "soc",
            Self::SysMonSummary => "sys_mon_summary",
            Self::ContactorFlags => "contactor_flags",
            Self::DeepDischargeFlags => "deep_discharge_flags",
        }
    }
}

/// Out-of-scope collaborator: the raw byte-addressable medium (FRAM block
/// driver in production, a `HashMap` in simulation/tests).
pub trait StorageBackend {
    fn read_blob(&self, key: &str, buf: &mut [u8]) -> Option<usize>;
    fn write_blob(&mut self, key: &str, data: &[u8]) -> bool;
}

fn crc16(data: &[u8]) -> u16 {
    const ALGO: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);
    ALGO.checksum(data)
}

fn frame<T: Serialize>(record: &T) -> heapless::Vec<u8, MAX_RECORD_BYTES> {
    let mut buf = heapless::Vec::<u8, MAX_RECORD_BYTES>::new();
    buf.resize_default(MAX_RECORD_BYTES).ok();
    let used = postcard::to_slice(record, &mut buf[..MAX_RECORD_BYTES - 2])
        .map(|s| s.len())
        .unwrap_or(0);
    buf.truncate(used);
    let crc = crc16(&buf[..used]);
    let _ = buf.push(crc.to_le_bytes()[0]);
    let _ = buf.push(crc.to_le_bytes()[1]);
    buf
}

fn unframe<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T, NvmReadError> {
    if bytes.len() < 2 {
        return Err(NvmReadError::CrcMismatch);
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 2);
    let stored_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16(payload) != stored_crc {
        return Err(NvmReadError::CrcMismatch);
    }
    postcard::from_bytes(payload).map_err(|_| NvmReadError::CrcMismatch)
}

struct PendingWrite {
    record: RecordId,
    bytes: heapless::Vec<u8, MAX_RECORD_BYTES>,
}

/// Persistent Store Interface, parameterized over the raw backend.
pub struct NvmStore {
    queue: Deque<PendingWrite, WRITE_QUEUE_DEPTH>,
}

impl Default for NvmStore {
    fn default() -> Self {
        Self { queue: Deque::new() }
    }
}

impl NvmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read. On CRC mismatch or missing key, returns a
    /// default-initialized record and `Err` — callers are expected to use
    /// the returned default and separately report the failure to
    /// diagnostics (the store does not hold a diagnostics reference).
    pub fn read<T: DeserializeOwned + Default>(
        &self,
        backend: &dyn StorageBackend,
        record: RecordId,
    ) -> (T, Result<(), NvmReadError>) {
        let mut buf = [0u8; MAX_RECORD_BYTES];
        match backend.read_blob(record.key(), &mut buf) {
            None => (T::default(), Err(NvmReadError::BackendUnavailable)),
            Some(len) => match unframe::<T>(&buf[..len]) {
                Ok(value) => (value, Ok(())),
                Err(e) => (T::default(), Err(e)),
            },
        }
    }

    /// Queue a write; never blocks. Returns `Err(QueueFull)` only if the
    /// in-flight queue itself has no room.
    pub fn write<T: Serialize>(&mut self, record: RecordId, value: &T) -> Result<(), NvmWriteError> {
        let bytes = frame(value);
        self.queue
            .push_back(PendingWrite { record, bytes })
            .map_err(|_| NvmWriteError::QueueFull)
    }

    /// Drain at most one queued write into the backend (single in-flight
    /// write). Call once per tick from the lowest-priority periodic task.
    pub fn poll(&mut self, backend: &mut dyn StorageBackend) -> Option<RecordId> {
        let pending = self.queue.pop_front()?;
        backend.write_blob(pending.record.key(), &pending.bytes);
        Some(pending.record)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }
}
