//! # platforms
//!
//! Latest known state per platform name, fed by platform-status messages and
//! read by route translation.
//!
//! Each status message wholly replaces the previous snapshot for that name.
//! Entries are never evicted; stale records are tolerated.

use std::collections::HashMap;

use range_types::{Coordinate, PlatformStatus};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformRecord {
    pub name: String,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub position: Coordinate,
    /// Gateway receive time, ms since the Unix epoch
    pub updated_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct PlatformStateCache {
    records: HashMap<String, PlatformRecord>,
}

impl PlatformStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, status: &PlatformStatus, received_at_ms: u64) {
        let record = PlatformRecord {
            name: status.platform_name.clone(),
            speed_mps: status.speed_mps,
            heading_deg: status.heading_deg,
            position: status.position,
            updated_at_ms: received_at_ms,
        };
        self.records.insert(record.name.clone(), record);
    }

    /// `None` means the platform has never reported; callers apply their
    /// configured fallback rather than assuming zero.
    pub fn speed_of(&self, platform_name: &str) -> Option<f64> {
        self.records.get(platform_name).map(|r| r.speed_mps)
    }

    /// Copy of every record, sorted by name.
    pub fn snapshot(&self) -> Vec<PlatformRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}
