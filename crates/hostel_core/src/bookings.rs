use chrono::{DateTime, Duration, Utc};
use shared::domain::{
    max_booking_duration, Booking, BookingId, BookingStatus, BookingView, NoticeKind, ResidentId,
    Room, RoomId, MAX_BOOKING_HOURS,
};
use tracing::{debug, info};

use crate::{error::BookingError, hostel::Hostel};

/// How pending bookings reach `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// An admin approves or rejects each request.
    Manual,
    /// Requests left pending for `after` are approved on the next tick.
    Automatic { after: Duration },
}

/// Ordering and length checks shared by every booking write.
pub fn validate_window(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Result<(), BookingError> {
    if end_at <= start_at {
        return Err(BookingError::EndsBeforeStart { start_at, end_at });
    }
    let length = end_at - start_at;
    if length > max_booking_duration() {
        return Err(BookingError::TooLong {
            requested_minutes: length.num_minutes(),
            max_hours: MAX_BOOKING_HOURS,
        });
    }
    Ok(())
}

impl Hostel {
    pub fn rooms(&self) -> &[Room] {
        &self.state.rooms
    }

    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.state.rooms.iter().find(|r| r.id == room_id)
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.state.bookings
    }

    pub fn booking(&self, booking_id: BookingId) -> Option<&Booking> {
        self.state.bookings.iter().find(|b| b.id == booking_id)
    }

    /// Bookings with their read-time status; ended bookings show as completed.
    pub fn booking_views(&self, now: DateTime<Utc>) -> Vec<(Booking, BookingView)> {
        self.state
            .bookings
            .iter()
            .map(|b| (b.clone(), b.view(now)))
            .collect()
    }

    /// Whether `[start_at, end_at)` overlaps a live booking of the room.
    /// Touching intervals do not conflict. `exclude` skips the booking being
    /// changed so it cannot collide with its own previous slot.
    pub fn check_conflict(
        &self,
        room_id: RoomId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        exclude: Option<BookingId>,
    ) -> bool {
        self.state.bookings.iter().any(|b| {
            b.room_id == room_id
                && Some(b.id) != exclude
                && b.holds_slot()
                && b.overlaps(start_at, end_at)
        })
    }

    fn ensure_free_slot(
        &self,
        room_id: RoomId,
        room_label: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        exclude: Option<BookingId>,
    ) -> Result<(), BookingError> {
        if self.check_conflict(room_id, start_at, end_at, exclude) {
            return Err(BookingError::Conflict {
                room_label: room_label.to_string(),
            });
        }
        Ok(())
    }

    fn booking_index(&self, booking_id: BookingId) -> Option<usize> {
        let index = self.state.bookings.iter().position(|b| b.id == booking_id);
        if index.is_none() {
            debug!(booking_id = booking_id.0, "booking not found; ignoring");
        }
        index
    }

    /// Files a pending request. Returns `Ok(None)` for an unknown room.
    pub fn submit_booking(
        &mut self,
        room_id: RoomId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        reason: &str,
        requested_by: Option<ResidentId>,
        now: DateTime<Utc>,
    ) -> Result<Option<BookingId>, BookingError> {
        let Some(room) = self.room(room_id).cloned() else {
            debug!(room_id = room_id.0, "room not found; ignoring booking");
            return Ok(None);
        };
        validate_window(start_at, end_at)?;
        self.ensure_free_slot(room.id, &room.label, start_at, end_at, None)?;

        let booking_id = BookingId(self.state.allocate_id());
        self.state.bookings.push(Booking {
            id: booking_id,
            room_id: room.id,
            room_label: room.label.clone(),
            has_ac: room.has_ac,
            start_at,
            end_at,
            reason: reason.trim().to_string(),
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
            requested_by,
        });
        info!(booking_id = booking_id.0, room_id = room.id.0, "booking requested");
        self.push_notice(
            format!("Booking request for {} submitted", room.label),
            NoticeKind::Info,
            now,
        );
        Ok(Some(booking_id))
    }

    fn transition(
        &mut self,
        booking_id: BookingId,
        allowed: &[BookingStatus],
        to: BookingStatus,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let index = self.booking_index(booking_id)?;
        let booking = &mut self.state.bookings[index];
        if !allowed.contains(&booking.status) {
            debug!(
                booking_id = booking_id.0,
                status = ?booking.status,
                target = ?to,
                "booking not in a state that allows this; ignoring"
            );
            return None;
        }
        booking.status = to;
        booking.updated_at = now;
        info!(booking_id = booking_id.0, status = ?to, "booking updated");
        Some(booking.room_label.clone())
    }

    pub fn approve_booking(&mut self, booking_id: BookingId, now: DateTime<Utc>) -> bool {
        let Some(room) =
            self.transition(booking_id, &[BookingStatus::Pending], BookingStatus::Approved, now)
        else {
            return false;
        };
        self.push_notice(
            format!("Booking for {room} approved"),
            NoticeKind::Success,
            now,
        );
        true
    }

    pub fn reject_booking(&mut self, booking_id: BookingId, now: DateTime<Utc>) -> bool {
        let Some(room) =
            self.transition(booking_id, &[BookingStatus::Pending], BookingStatus::Rejected, now)
        else {
            return false;
        };
        self.push_notice(
            format!("Booking for {room} rejected"),
            NoticeKind::Warning,
            now,
        );
        true
    }

    pub fn cancel_booking(&mut self, booking_id: BookingId, now: DateTime<Utc>) -> bool {
        let Some(room) = self.transition(
            booking_id,
            &[BookingStatus::Pending, BookingStatus::Approved],
            BookingStatus::Cancelled,
            now,
        ) else {
            return false;
        };
        self.push_notice(
            format!("Booking for {room} cancelled"),
            NoticeKind::Info,
            now,
        );
        true
    }

    /// Moves the end of an approved booking; the change goes back for approval.
    /// `Ok(false)` when the booking is missing or not approved.
    pub fn extend_booking(
        &mut self,
        booking_id: BookingId,
        new_end_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        let Some(index) = self.booking_index(booking_id) else {
            return Ok(false);
        };
        let current = self.state.bookings[index].clone();
        if current.status != BookingStatus::Approved {
            debug!(booking_id = booking_id.0, status = ?current.status, "only approved bookings can be extended");
            return Ok(false);
        }

        validate_window(current.start_at, new_end_at)?;
        self.ensure_free_slot(
            current.room_id,
            &current.room_label,
            current.start_at,
            new_end_at,
            Some(booking_id),
        )?;

        let booking = &mut self.state.bookings[index];
        booking.end_at = new_end_at;
        booking.status = BookingStatus::Pending;
        booking.updated_at = now;
        info!(booking_id = booking_id.0, "booking extended; awaiting approval");
        self.push_notice(
            format!("Extension for {} submitted for approval", current.room_label),
            NoticeKind::Info,
            now,
        );
        Ok(true)
    }

    /// Rewrites the window (and optionally the reason) of a pending or
    /// approved booking; the change goes back for approval.
    pub fn modify_booking(
        &mut self,
        booking_id: BookingId,
        new_start_at: DateTime<Utc>,
        new_end_at: DateTime<Utc>,
        new_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        let Some(index) = self.booking_index(booking_id) else {
            return Ok(false);
        };
        let current = self.state.bookings[index].clone();
        if !matches!(current.status, BookingStatus::Pending | BookingStatus::Approved) {
            debug!(booking_id = booking_id.0, status = ?current.status, "booking can no longer be modified");
            return Ok(false);
        }

        validate_window(new_start_at, new_end_at)?;
        self.ensure_free_slot(
            current.room_id,
            &current.room_label,
            new_start_at,
            new_end_at,
            Some(booking_id),
        )?;

        let booking = &mut self.state.bookings[index];
        booking.start_at = new_start_at;
        booking.end_at = new_end_at;
        if let Some(reason) = new_reason {
            booking.reason = reason.trim().to_string();
        }
        booking.status = BookingStatus::Pending;
        booking.updated_at = now;
        info!(booking_id = booking_id.0, "booking modified; awaiting approval");
        self.push_notice(
            format!("Changes to the {} booking submitted for approval", current.room_label),
            NoticeKind::Info,
            now,
        );
        Ok(true)
    }

    /// Approves every request that has waited at least `after` since it was
    /// last changed.
    pub(crate) fn approve_due_bookings(&mut self, after: Duration, now: DateTime<Utc>) -> usize {
        let due: Vec<BookingId> = self
            .state
            .bookings
            .iter()
            .filter(|b| {
                // A delay too large to represent is never due.
                b.status == BookingStatus::Pending
                    && b.updated_at
                        .checked_add_signed(after)
                        .is_some_and(|due| due <= now)
            })
            .map(|b| b.id)
            .collect();

        due.into_iter()
            .filter(|booking_id| self.approve_booking(*booking_id, now))
            .count()
    }
}
