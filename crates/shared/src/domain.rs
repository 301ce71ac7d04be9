use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(MachineId);
id_newtype!(WashId);
id_newtype!(RoomId);
id_newtype!(BookingId);
id_newtype!(NoticeId);
id_newtype!(ReportId);
id_newtype!(ResidentId);

/// Longest span a single room booking may cover.
pub const MAX_BOOKING_HOURS: i64 = 24;

pub fn max_booking_duration() -> Duration {
    Duration::hours(MAX_BOOKING_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Free,
    Running,
    Awaiting,
    Maint,
}

/// Lifecycle of a machine. The countdown only exists while running and the
/// completion time only while the load waits for collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    Free,
    Running { eta: u32 },
    Awaiting { last_completed_at: DateTime<Utc> },
    Maint,
}

impl MachineState {
    pub fn status(&self) -> MachineStatus {
        match self {
            MachineState::Free => MachineStatus::Free,
            MachineState::Running { .. } => MachineStatus::Running,
            MachineState::Awaiting { .. } => MachineStatus::Awaiting,
            MachineState::Maint => MachineStatus::Maint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub label: String,
    pub location: String,
    pub floor: i32,
    #[serde(flatten)]
    pub state: MachineState,
    pub nudge_count: u32,
    pub flag_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<ResidentId>,
}

impl Machine {
    pub fn new(id: MachineId, label: impl Into<String>, location: impl Into<String>, floor: i32) -> Self {
        Self {
            id,
            label: label.into(),
            location: location.into(),
            floor,
            state: MachineState::Free,
            nudge_count: 0,
            flag_count: 0,
            owner_id: None,
        }
    }

    pub fn status(&self) -> MachineStatus {
        self.state.status()
    }

    pub fn eta(&self) -> Option<u32> {
        match self.state {
            MachineState::Running { eta } => Some(eta),
            _ => None,
        }
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            MachineState::Awaiting { last_completed_at } => Some(last_completed_at),
            _ => None,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self.state, MachineState::Free)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WashStatus {
    Running,
    Awaiting,
    Collected,
}

/// One wash cycle, kept after the machine moves on to the next load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wash {
    pub id: WashId,
    pub machine_id: MachineId,
    pub machine_label: String,
    pub location: String,
    pub floor: i32,
    pub start_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    pub status: WashStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<ResidentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub label: String,
    pub has_ac: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

/// What a reader sees for a booking; `Completed` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingView {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub room_label: String,
    pub has_ac: bool,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<ResidentId>,
}

impl Booking {
    /// Cancelled and rejected bookings release their slot.
    pub fn holds_slot(&self) -> bool {
        !matches!(
            self.status,
            BookingStatus::Cancelled | BookingStatus::Rejected
        )
    }

    pub fn overlaps(&self, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> bool {
        start_at < self.end_at && end_at > self.start_at
    }

    pub fn view(&self, now: DateTime<Utc>) -> BookingView {
        match self.status {
            BookingStatus::Cancelled => BookingView::Cancelled,
            BookingStatus::Rejected => BookingView::Rejected,
            _ if self.end_at <= now => BookingView::Completed,
            BookingStatus::Pending => BookingView::Pending,
            BookingStatus::Approved => BookingView::Approved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: NoticeId,
    pub title: String,
    pub time: DateTime<Utc>,
    pub kind: NoticeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub machine_id: MachineId,
    pub machine_label: String,
    pub reason: String,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_b64: Option<String>,
    pub affect_status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<ResidentId>,
    pub created_at: DateTime<Utc>,
}

/// Report reasons that may take a machine out of service.
pub const OUT_OF_SERVICE_REASONS: [&str; 2] = ["Not working", "Leaking water"];

/// Whether a report should force the machine into maintenance: the reason
/// must be a fault and the reporter must have confirmed it.
pub fn report_takes_machine_offline(reason: &str, confirmed: bool) -> bool {
    confirmed && OUT_OF_SERVICE_REASONS.contains(&reason)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub id: ResidentId,
    pub name: String,
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `location -> floor -> watching`.
pub type WatchFreeFlags = BTreeMap<String, BTreeMap<i32, bool>>;
