//! Driver context: read-only configuration plus the bounded debug log,
//! handed to the dispatcher explicitly instead of living in globals.

use std::collections::VecDeque;
use std::sync::Mutex;

use usbcomm_core::config::{TransferConfig, UsbCommConfig};
use usbcomm_core::wire::{DriverVersion, DATA_STRUCT_SIZE_MAX};

pub struct DriverContext {
    pub version: DriverVersion,
    pub transfer: TransferConfig,
    pub debug_log: DebugLog,
}

impl DriverContext {
    pub fn from_config(config: &UsbCommConfig) -> Self {
        Self {
            version: DriverVersion::from_bytes_truncated(config.driver.version.as_bytes()),
            transfer: config.transfer.clone(),
            debug_log: DebugLog::new(config.driver.debug_log_capacity),
        }
    }
}

/// Ring of recent diagnostic records returned by `ReturnDriverDebugLog`.
pub struct DebugLog {
    capacity: usize,
    records: Mutex<VecDeque<String>>,
}

impl DebugLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn record(&self, line: impl Into<String>) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest records, oldest first, newline-separated, that fit in one
    /// byte-array structure. A single record longer than that is cut.
    pub fn excerpt(&self) -> Vec<u8> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut picked: Vec<&str> = Vec::new();
        let mut used = 0;
        for line in records.iter().rev() {
            let cost = line.len() + usize::from(!picked.is_empty());
            if used + cost > DATA_STRUCT_SIZE_MAX {
                break;
            }
            used += cost;
            picked.push(line);
        }
        if picked.is_empty() {
            if let Some(newest) = records.back() {
                return newest.as_bytes()[..newest.len().min(DATA_STRUCT_SIZE_MAX)].to_vec();
            }
        }
        picked.reverse();
        picked.join("\n").into_bytes()
    }
}
