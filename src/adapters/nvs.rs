//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StorageBackend`] for the persistent-store interface
//! (§4.B) against an in-process map, standing in for the real firmware's
//! ESP-IDF NVS partition (no hardware target is claimed by this crate).
//!
//! # Security
//!
//! - Namespace isolation: every record lives under a single `bms`
//!   namespace; the persistent-store interface's own `RecordId` keys
//!   are already a closed set, so no further validation is needed here.

use log::info;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::nvm::StorageBackend;

pub struct NvsAdapter {
    store: RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new adapter. Returns `Err` only to mirror the real
    /// firmware's fallible flash-init path; the simulation backend cannot
    /// itself fail.
    pub fn new() -> Result<Self, &'static str> {
        info!("NvsAdapter: simulation backend");
        Ok(Self { store: RefCell::new(HashMap::new()) })
    }
}

impl StorageBackend for NvsAdapter {
    fn read_blob(&self, key: &str, buf: &mut [u8]) -> Option<usize> {
        let data = self.store.borrow().get(key).cloned()?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Some(len)
    }

    fn write_blob(&mut self, key: &str, data: &[u8]) -> bool {
        self.store.borrow_mut().insert(key.to_string(), data.to_vec());
        true
    }
}
