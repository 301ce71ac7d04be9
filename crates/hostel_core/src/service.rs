use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{
        Booking, BookingId, BookingView, Machine, MachineId, MachineStatus, Notice, ReportId,
        ResidentId, RoomId,
    },
    protocol::LiveStatusSnapshot,
    state::AggregateState,
};
use storage::StateStore;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::Settings,
    error::BookingError,
    hostel::{Hostel, TickSummary},
    live_status::{HttpLiveStatusFeed, LiveStatusFeed, LiveStatusPoller, PollOutcome},
    machines::{FlagOutcome, NudgeOutcome, ReportInput},
    seed::{default_state, restore_or_seed},
    ticker::{TickTarget, TickerHandle},
};

#[derive(Debug, Clone)]
pub enum HostelEvent {
    /// Any mutation finished and was written through.
    StateChanged,
    Notice(Notice),
    LiveStatusUpdated(LiveStatusSnapshot),
    Reseeded,
    Error(String),
}

/// A machine as it should be displayed: the live feed may override the
/// status shown for the designated machine, never the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineView {
    pub machine: Machine,
    pub display_status: MachineStatus,
    pub live: Option<LiveStatusSnapshot>,
}

/// Owns the aggregate. Every operation runs to completion under one lock,
/// including the write-through save, so operations never interleave.
pub struct HostelService {
    settings: Settings,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    hostel: Mutex<Hostel>,
    current_resident: RwLock<Option<ResidentId>>,
    ticker: Mutex<Option<TickerHandle>>,
    live: Option<LiveStatusPoller>,
    live_machine: RwLock<Option<MachineId>>,
    events: broadcast::Sender<HostelEvent>,
}

impl HostelService {
    /// Opens with the system clock and, when configured, the HTTP live feed.
    pub async fn open(settings: Settings, store: Arc<dyn StateStore>) -> Result<Arc<Self>> {
        let feed = settings.live_status_url.clone().map(|status_url| {
            Arc::new(HttpLiveStatusFeed::new(status_url, settings.live_log_url.clone()))
                as Arc<dyn LiveStatusFeed>
        });
        Self::open_with_dependencies(settings, store, Arc::new(SystemClock), feed).await
    }

    pub async fn open_with_dependencies(
        settings: Settings,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        feed: Option<Arc<dyn LiveStatusFeed>>,
    ) -> Result<Arc<Self>> {
        let loaded = store
            .load()
            .await
            .context("failed to load hostel state")?;
        let (state, reseeded) = restore_or_seed(loaded);
        if reseeded {
            info!("seeded default hostel state");
            store
                .save(&state)
                .await
                .context("failed to save seeded hostel state")?;
        }

        let live_machine = resolve_live_machine(&settings, &state);
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            settings,
            store,
            clock,
            hostel: Mutex::new(Hostel::new(state)),
            current_resident: RwLock::new(None),
            ticker: Mutex::new(None),
            live: feed.map(LiveStatusPoller::new),
            live_machine: RwLock::new(live_machine),
            events,
        }))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HostelEvent> {
        self.events.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The resident acting in this session; owns the washes they start.
    pub async fn set_current_resident(&self, resident: Option<ResidentId>) {
        *self.current_resident.write().await = resident;
    }

    pub async fn current_resident(&self) -> Option<ResidentId> {
        *self.current_resident.read().await
    }

    async fn mutate<T>(&self, op: impl FnOnce(&mut Hostel, DateTime<Utc>) -> T) -> T {
        let mut hostel = self.hostel.lock().await;
        let now = self.clock.now();
        let result = op(&mut hostel, now);
        let fresh = hostel.take_fresh_notices();
        self.persist(hostel.state()).await;

        for notice in fresh {
            let _ = self.events.send(HostelEvent::Notice(notice));
        }
        let _ = self.events.send(HostelEvent::StateChanged);
        drop(hostel);
        result
    }

    async fn persist(&self, state: &AggregateState) {
        if let Err(err) = self.store.save(state).await {
            error!(error = %err, "failed to persist hostel state");
            let _ = self
                .events
                .send(HostelEvent::Error(format!("failed to save state: {err:#}")));
        }
    }

    pub async fn snapshot(&self) -> AggregateState {
        self.hostel.lock().await.state().clone()
    }

    pub async fn notices(&self) -> Vec<Notice> {
        self.hostel.lock().await.notices().to_vec()
    }

    pub async fn machine_views(&self) -> Vec<MachineView> {
        let live_machine = *self.live_machine.read().await;
        let live = match &self.live {
            Some(poller) => poller.last_known().await,
            None => None,
        };

        let hostel = self.hostel.lock().await;
        hostel
            .machines()
            .iter()
            .map(|machine| {
                let stored = machine.status();
                let (display_status, live) = match (&live, live_machine) {
                    (Some(snapshot), Some(id)) if id == machine.id => {
                        (snapshot.availability.overlay(stored), Some(snapshot.clone()))
                    }
                    _ => (stored, None),
                };
                MachineView {
                    machine: machine.clone(),
                    display_status,
                    live,
                }
            })
            .collect()
    }

    pub async fn booking_views(&self) -> Vec<(Booking, BookingView)> {
        let now = self.clock.now();
        self.hostel.lock().await.booking_views(now)
    }

    pub async fn tick(&self) -> TickSummary {
        let approval = self.settings.approval_mode;
        self.mutate(|hostel, now| hostel.tick(now, approval)).await
    }

    pub async fn start_wash(&self, machine_id: MachineId, minutes: u32) -> bool {
        let owner = self.current_resident().await;
        self.mutate(|hostel, now| hostel.start_wash(machine_id, minutes, owner, now))
            .await
    }

    pub async fn mark_collected(&self, machine_id: MachineId) -> bool {
        self.mutate(|hostel, now| hostel.mark_collected(machine_id, now))
            .await
    }

    pub async fn nudge_machine(&self, machine_id: MachineId) -> Option<NudgeOutcome> {
        self.mutate(|hostel, now| hostel.nudge_machine(machine_id, now))
            .await
    }

    pub async fn flag_machine(&self, machine_id: MachineId) -> Option<FlagOutcome> {
        self.mutate(|hostel, now| hostel.flag_machine(machine_id, now))
            .await
    }

    pub async fn submit_report(&self, input: ReportInput) -> Option<ReportId> {
        let reporter = self.current_resident().await;
        self.mutate(|hostel, now| hostel.submit_report(input, reporter, now))
            .await
    }

    pub async fn restore_machine(&self, machine_id: MachineId) -> bool {
        self.mutate(|hostel, now| hostel.restore_machine(machine_id, now))
            .await
    }

    pub async fn request_watch_free(&self, location: &str, floor: i32) {
        self.mutate(|hostel, now| hostel.request_watch_free(location, floor, now))
            .await
    }

    pub async fn cancel_watch_free(&self, location: &str, floor: i32) -> bool {
        self.mutate(|hostel, _| hostel.cancel_watch_free(location, floor))
            .await
    }

    pub async fn check_conflict(
        &self,
        room_id: RoomId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> bool {
        self.hostel
            .lock()
            .await
            .check_conflict(room_id, start_at, end_at, None)
    }

    pub async fn submit_booking(
        &self,
        room_id: RoomId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<BookingId>, BookingError> {
        let requester = self.current_resident().await;
        self.mutate(|hostel, now| {
            hostel.submit_booking(room_id, start_at, end_at, reason, requester, now)
        })
        .await
    }

    pub async fn approve_booking(&self, booking_id: BookingId) -> bool {
        self.mutate(|hostel, now| hostel.approve_booking(booking_id, now))
            .await
    }

    pub async fn reject_booking(&self, booking_id: BookingId) -> bool {
        self.mutate(|hostel, now| hostel.reject_booking(booking_id, now))
            .await
    }

    pub async fn cancel_booking(&self, booking_id: BookingId) -> bool {
        self.mutate(|hostel, now| hostel.cancel_booking(booking_id, now))
            .await
    }

    pub async fn extend_booking(
        &self,
        booking_id: BookingId,
        new_end_at: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        self.mutate(|hostel, now| hostel.extend_booking(booking_id, new_end_at, now))
            .await
    }

    pub async fn modify_booking(
        &self,
        booking_id: BookingId,
        new_start_at: DateTime<Utc>,
        new_end_at: DateTime<Utc>,
        new_reason: Option<&str>,
    ) -> Result<bool, BookingError> {
        self.mutate(|hostel, now| {
            hostel.modify_booking(booking_id, new_start_at, new_end_at, new_reason, now)
        })
        .await
    }

    /// Throws away all state and starts again from the default catalog.
    pub async fn reseed(&self) {
        let mut hostel = self.hostel.lock().await;
        *hostel = Hostel::new(default_state());
        self.persist(hostel.state()).await;
        *self.live_machine.write().await = resolve_live_machine(&self.settings, hostel.state());
        warn!("hostel state reseeded");
        let _ = self.events.send(HostelEvent::Reseeded);
        let _ = self.events.send(HostelEvent::StateChanged);
        drop(hostel);
    }

    /// Starts the ticker, or returns the one already running.
    pub async fn ensure_ticker(self: &Arc<Self>) -> TickerHandle {
        let mut slot = self.ticker.lock().await;
        if let Some(handle) = slot.as_ref() {
            if handle.is_running().await {
                return handle.clone();
            }
        }

        let target: Arc<dyn TickTarget> = self.clone();
        let handle = TickerHandle::spawn(Arc::downgrade(&target), self.settings.tick_interval());
        info!(period_secs = handle.period().as_secs(), "ticker started");
        *slot = Some(handle.clone());
        handle
    }

    pub async fn stop_ticker(&self) {
        let handle = self.ticker.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
            info!("ticker stopped");
        }
    }

    /// Refreshes the live machine's feed. `None` when no feed is configured.
    pub async fn poll_live_status(&self) -> Option<PollOutcome> {
        let poller = self.live.as_ref()?;
        let outcome = poller.poll(self.clock.now()).await;
        if let PollOutcome::Updated(snapshot) = &outcome {
            let _ = self
                .events
                .send(HostelEvent::LiveStatusUpdated(snapshot.clone()));
        }
        Some(outcome)
    }

    /// Becoming visible is the trigger for a live refresh.
    pub async fn on_visibility_change(&self, visible: bool) -> Option<PollOutcome> {
        if !visible {
            return None;
        }
        self.poll_live_status().await
    }
}

#[async_trait]
impl TickTarget for HostelService {
    async fn on_tick(&self) {
        let summary = self.tick().await;
        if summary != TickSummary::default() {
            info!(
                finished = summary.finished,
                finishing_soon = summary.finishing_soon,
                watch_free_fired = summary.watch_free_fired,
                auto_approved = summary.auto_approved,
                "tick"
            );
        }
    }
}

fn resolve_live_machine(settings: &Settings, state: &AggregateState) -> Option<MachineId> {
    let label = settings.live_machine_label.as_deref()?;
    let machine = state.machines.iter().find(|m| m.label == label);
    if machine.is_none() {
        warn!(%label, "live machine label does not match any machine");
    }
    machine.map(|m| m.id)
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
