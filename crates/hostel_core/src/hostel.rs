use chrono::{DateTime, Utc};
use shared::{
    domain::{Notice, NoticeId, NoticeKind},
    state::AggregateState,
};
use tracing::debug;

use crate::bookings::ApprovalMode;

/// Most recent notices kept; older ones are evicted first.
pub const NOTICE_CAPACITY: usize = 50;

/// Owns the aggregate and applies every state transition. All methods are
/// synchronous and take the current time explicitly.
#[derive(Debug, Clone)]
pub struct Hostel {
    pub(crate) state: AggregateState,
    fresh_notices: Vec<Notice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub finished: usize,
    pub finishing_soon: usize,
    pub watch_free_fired: usize,
    pub auto_approved: usize,
}

impl Hostel {
    pub fn new(state: AggregateState) -> Self {
        Self {
            state,
            fresh_notices: Vec::new(),
        }
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn into_state(self) -> AggregateState {
        self.state
    }

    /// Newest first.
    pub fn notices(&self) -> &[Notice] {
        &self.state.notices
    }

    pub(crate) fn push_notice(
        &mut self,
        title: impl Into<String>,
        kind: NoticeKind,
        now: DateTime<Utc>,
    ) {
        let notice = Notice {
            id: NoticeId(self.state.allocate_id()),
            title: title.into(),
            time: now,
            kind,
        };
        debug!(kind = ?notice.kind, title = %notice.title, "notice");
        self.state.notices.insert(0, notice.clone());
        self.state.notices.truncate(NOTICE_CAPACITY);
        self.fresh_notices.push(notice);
    }

    /// Notices raised since the last call, oldest first.
    pub fn take_fresh_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.fresh_notices)
    }

    /// One minute of simulated time: machine countdowns, then the watch-free
    /// diff over the per-floor free counts, then timed booking approval.
    pub fn tick(&mut self, now: DateTime<Utc>, approval: ApprovalMode) -> TickSummary {
        let free_before = self.free_counts();
        let (finished, finishing_soon) = self.advance_machines(now);
        let free_after = self.free_counts();
        let watch_free_fired = self.fire_watch_free(&free_before, &free_after, now);

        let auto_approved = match approval {
            ApprovalMode::Manual => 0,
            ApprovalMode::Automatic { after } => self.approve_due_bookings(after, now),
        };

        TickSummary {
            finished,
            finishing_soon,
            watch_free_fired,
            auto_approved,
        }
    }
}
