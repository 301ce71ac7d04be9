use serde::{Deserialize, Serialize};

use crate::domain::{Booking, Machine, Notice, Report, Resident, Room, Wash, WatchFreeFlags};

/// Bumped whenever the persisted layout changes; older snapshots are reseeded.
pub const SCHEMA_VERSION: u32 = 3;

/// Everything the app persists, written as one snapshot after each mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub version: u32,
    pub next_id: i64,
    pub machines: Vec<Machine>,
    pub washes: Vec<Wash>,
    /// Newest first.
    pub notices: Vec<Notice>,
    pub rooms: Vec<Room>,
    pub bookings: Vec<Booking>,
    pub reports: Vec<Report>,
    pub residents: Vec<Resident>,
    pub watch_free: WatchFreeFlags,
}

impl AggregateState {
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            next_id: 1,
            machines: Vec::new(),
            washes: Vec::new(),
            notices: Vec::new(),
            rooms: Vec::new(),
            bookings: Vec::new(),
            reports: Vec::new(),
            residents: Vec::new(),
            watch_free: WatchFreeFlags::new(),
        }
    }

    pub fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// A snapshot is usable when it matches the current schema and still
    /// carries the catalogs the app cannot run without.
    pub fn is_usable(&self) -> bool {
        self.version == SCHEMA_VERSION && !self.machines.is_empty() && !self.rooms.is_empty()
    }
}
