use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons a booking request or change is refused. Nothing is written when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("booking must end after it starts (start {start_at}, end {end_at})")]
    EndsBeforeStart {
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },
    #[error("booking lasts {requested_minutes} minutes; the limit is {max_hours} hours")]
    TooLong {
        requested_minutes: i64,
        max_hours: i64,
    },
    #[error("{room_label} is already booked for part of that time")]
    Conflict { room_label: String },
}
