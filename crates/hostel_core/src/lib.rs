//! Laundry machines and common-room bookings for a hostel: the machine
//! lifecycle, the booking ledger, notices, watch-free flags, and the service
//! that owns and persists them.

pub mod bookings;
pub mod clock;
pub mod config;
pub mod error;
pub mod hostel;
pub mod live_status;
pub mod machines;
pub mod seed;
pub mod service;
pub mod ticker;
pub mod watch;

pub use bookings::{validate_window, ApprovalMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_settings, load_settings_from, Settings};
pub use error::BookingError;
pub use hostel::{Hostel, TickSummary, NOTICE_CAPACITY};
pub use live_status::{HttpLiveStatusFeed, LiveStatusFeed, LiveStatusPoller, PollOutcome};
pub use machines::{FlagOutcome, NudgeOutcome, ReminderChannel, ReportInput};
pub use service::{HostelEvent, HostelService, MachineView};
pub use ticker::{TickTarget, TickerHandle};

#[cfg(test)]
#[path = "tests/hostel_tests.rs"]
mod tests;
