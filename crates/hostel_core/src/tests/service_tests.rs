use super::*;
use anyhow::anyhow;
use chrono::{Duration, TimeZone};
use serde_json::{json, Value};
use shared::{domain::BookingStatus, protocol::LiveAvailability};
use storage::MemoryStore;

use crate::{bookings::ApprovalMode, clock::ManualClock};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
}

async fn open_with(
    settings: Settings,
    store: Arc<MemoryStore>,
    feed: Option<Arc<dyn LiveStatusFeed>>,
) -> (Arc<HostelService>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let service = HostelService::open_with_dependencies(settings, store, clock.clone(), feed)
        .await
        .expect("open service");
    (service, clock)
}

async fn open_default() -> (Arc<HostelService>, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let (service, clock) = open_with(Settings::default(), store.clone(), None).await;
    (service, store, clock)
}

async fn stored_state(store: &MemoryStore) -> AggregateState {
    let raw = store.raw().await.expect("saved payload");
    serde_json::from_str(&raw).expect("valid snapshot")
}

struct FixedFeed(Value);

#[async_trait]
impl LiveStatusFeed for FixedFeed {
    async fn fetch_status(&self) -> Result<Value> {
        Ok(self.0.clone())
    }

    async fn fetch_log(&self) -> Result<Value> {
        Ok(json!(["fill", "wash 12:04"]))
    }
}

struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl StateStore for ReadOnlyStore {
    async fn load(&self) -> Result<Option<AggregateState>> {
        self.0.load().await
    }

    async fn save(&self, _state: &AggregateState) -> Result<()> {
        Err(anyhow!("disk is read-only"))
    }
}

#[tokio::test]
async fn opening_an_empty_store_seeds_and_saves() {
    let (service, store, _) = open_default().await;

    let snapshot = service.snapshot().await;
    assert!(!snapshot.machines.is_empty());
    assert!(!snapshot.rooms.is_empty());
    assert_eq!(stored_state(&store).await, snapshot);
}

#[tokio::test]
async fn unreadable_snapshot_is_replaced_with_seed_data() {
    let store = Arc::new(MemoryStore::with_payload("{ not json"));
    let (service, _) = open_with(Settings::default(), store.clone(), None).await;

    assert_eq!(service.snapshot().await, default_state());
    assert_eq!(stored_state(&store).await, default_state());
}

#[tokio::test]
async fn current_snapshot_is_restored_as_is() {
    let mut hostel = Hostel::new(default_state());
    let machine_id = hostel.machines()[0].id;
    hostel.start_wash(machine_id, 30, None, start_time());
    let saved = hostel.into_state();

    let store = Arc::new(MemoryStore::with_payload(
        serde_json::to_string(&saved).expect("encode"),
    ));
    let (service, _) = open_with(Settings::default(), store, None).await;

    assert_eq!(service.snapshot().await, saved);
}

#[tokio::test]
async fn every_operation_writes_through() {
    let (service, store, clock) = open_default().await;
    let machine_id = service.snapshot().await.machines[0].id;

    assert!(service.start_wash(machine_id, 2).await);
    let saved = stored_state(&store).await;
    assert_eq!(saved.machines[0].eta(), Some(2));

    clock.advance(Duration::minutes(1));
    service.tick().await;
    assert_eq!(stored_state(&store).await.machines[0].eta(), Some(1));

    clock.advance(Duration::minutes(1));
    service.tick().await;
    let saved = stored_state(&store).await;
    assert_eq!(
        saved.machines[0].last_completed_at(),
        Some(start_time() + Duration::minutes(2))
    );
    assert_eq!(saved, service.snapshot().await);
}

#[tokio::test]
async fn mutations_publish_notices_then_state_changed() {
    let (service, _, _) = open_default().await;
    let machine_id = service.snapshot().await.machines[0].id;
    let mut events = service.subscribe_events();

    service.start_wash(machine_id, 10).await;

    match events.recv().await.expect("event") {
        HostelEvent::Notice(notice) => assert!(notice.title.starts_with("Started wash on")),
        other => panic!("expected a notice, got {other:?}"),
    }
    assert!(matches!(
        events.recv().await.expect("event"),
        HostelEvent::StateChanged
    ));
}

#[tokio::test]
async fn save_failures_are_reported_but_keep_the_change_in_memory() {
    let seeded = MemoryStore::with_payload(
        serde_json::to_string(&default_state()).expect("encode"),
    );
    let clock = Arc::new(ManualClock::new(start_time()));
    let service = HostelService::open_with_dependencies(
        Settings::default(),
        Arc::new(ReadOnlyStore(seeded)),
        clock,
        None,
    )
    .await
    .expect("open without needing a save");
    let machine_id = service.snapshot().await.machines[0].id;
    let mut events = service.subscribe_events();

    assert!(service.start_wash(machine_id, 10).await);

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        saw_error |= matches!(event, HostelEvent::Error(_));
    }
    assert!(saw_error);
    assert_eq!(service.snapshot().await.machines[0].eta(), Some(10));
}

#[tokio::test]
async fn current_resident_owns_washes_and_requests() {
    let (service, _, _) = open_default().await;
    let snapshot = service.snapshot().await;
    let resident = snapshot.residents[0].id;
    let machine_id = snapshot.machines[0].id;
    let room_id = snapshot.rooms[0].id;

    service.set_current_resident(Some(resident)).await;
    service.start_wash(machine_id, 30).await;
    let booking_id = service
        .submit_booking(
            room_id,
            start_time() + Duration::hours(2),
            start_time() + Duration::hours(3),
            "reading club",
        )
        .await
        .expect("valid")
        .expect("room exists");

    let snapshot = service.snapshot().await;
    assert_eq!(snapshot.machines[0].owner_id, Some(resident));
    assert_eq!(snapshot.washes.last().and_then(|w| w.owner_id), Some(resident));
    let booking = snapshot
        .bookings
        .iter()
        .find(|b| b.id == booking_id)
        .expect("booking");
    assert_eq!(booking.requested_by, Some(resident));
    assert_eq!(booking.created_at, start_time());
}

#[tokio::test]
async fn refused_booking_leaves_state_and_store_untouched() {
    let (service, store, _) = open_default().await;
    let room_id = service.snapshot().await.rooms[0].id;
    let before = store.raw().await;

    let err = service
        .submit_booking(
            room_id,
            start_time(),
            start_time() + Duration::hours(30),
            "too long",
        )
        .await
        .expect_err("over the limit");
    assert!(matches!(err, BookingError::TooLong { .. }));
    assert!(service.snapshot().await.bookings.is_empty());

    let after = stored_state(&store).await;
    let before: AggregateState =
        serde_json::from_str(&before.expect("seeded")).expect("valid snapshot");
    assert_eq!(after, before);
}

#[tokio::test]
async fn booking_lifecycle_through_the_service() {
    let (service, _, clock) = open_default().await;
    let room_id = service.snapshot().await.rooms[1].id;
    let start = start_time() + Duration::hours(4);

    let id = service
        .submit_booking(room_id, start, start + Duration::hours(1), "choir")
        .await
        .expect("valid")
        .expect("room exists");
    assert!(service.check_conflict(room_id, start, start + Duration::minutes(30)).await);

    assert!(service.approve_booking(id).await);
    assert_eq!(
        service.extend_booking(id, start + Duration::hours(2)).await,
        Ok(true)
    );
    assert!(service.approve_booking(id).await);
    assert_eq!(
        service
            .modify_booking(id, start, start + Duration::hours(3), Some("choir rehearsal"))
            .await,
        Ok(true)
    );
    assert!(service.reject_booking(id).await);
    assert!(!service.cancel_booking(id).await);

    clock.advance(Duration::hours(8));
    let views = service.booking_views().await;
    let (booking, view) = views.iter().find(|(b, _)| b.id == id).expect("booking");
    assert_eq!(booking.status, BookingStatus::Rejected);
    assert_eq!(*view, BookingView::Rejected);
}

#[tokio::test]
async fn automatic_approval_runs_on_tick() {
    let settings = Settings {
        approval_mode: ApprovalMode::Automatic {
            after: Duration::minutes(2),
        },
        ..Settings::default()
    };
    let store = Arc::new(MemoryStore::new());
    let (service, clock) = open_with(settings, store, None).await;
    let room_id = service.snapshot().await.rooms[0].id;
    let start = start_time() + Duration::hours(1);
    let id = service
        .submit_booking(room_id, start, start + Duration::hours(1), "games")
        .await
        .expect("valid")
        .expect("room exists");

    clock.advance(Duration::minutes(1));
    assert_eq!(service.tick().await.auto_approved, 0);
    clock.advance(Duration::minutes(1));
    assert_eq!(service.tick().await.auto_approved, 1);

    let snapshot = service.snapshot().await;
    let booking = snapshot.bookings.iter().find(|b| b.id == id).expect("booking");
    assert_eq!(booking.status, BookingStatus::Approved);
}

#[tokio::test]
async fn watch_free_through_the_service() {
    let (service, _, _) = open_default().await;
    let snapshot = service.snapshot().await;
    let machine = snapshot.machines[0].clone();
    let floor_mates: Vec<MachineId> = snapshot
        .machines
        .iter()
        .filter(|m| m.location == machine.location && m.floor == machine.floor)
        .map(|m| m.id)
        .collect();
    for id in &floor_mates {
        service.start_wash(*id, 30).await;
    }

    service.request_watch_free(&machine.location, machine.floor).await;
    service.mark_collected(machine.id).await;

    let notices = service.notices().await;
    let expected = format!(
        "A machine is free on {} floor {}",
        machine.location, machine.floor
    );
    assert_eq!(notices[0].title, expected);
    assert!(!service.cancel_watch_free(&machine.location, machine.floor).await);
}

#[tokio::test]
async fn machine_operations_through_the_service() {
    let (service, _, _) = open_default().await;
    let machine_id = service.snapshot().await.machines[1].id;

    service.start_wash(machine_id, 15).await;
    assert_eq!(
        service.nudge_machine(machine_id).await.map(|o| o.nudge_count),
        Some(1)
    );
    assert!(service.flag_machine(machine_id).await.is_some());
    let report = service
        .submit_report(ReportInput {
            machine_id,
            reason: "Not working".into(),
            notes: "door will not open".into(),
            photo: None,
            affect_status: true,
        })
        .await;
    assert!(report.is_some());
    assert_eq!(
        service.snapshot().await.machines[1].status(),
        MachineStatus::Maint
    );
    assert!(service.restore_machine(machine_id).await);
    assert!(service.snapshot().await.machines[1].is_free());
    assert_eq!(service.nudge_machine(MachineId(-1)).await, None);
}

#[tokio::test]
async fn reseed_discards_everything() {
    let (service, store, _) = open_default().await;
    let room_id = service.snapshot().await.rooms[0].id;
    service
        .submit_booking(
            room_id,
            start_time(),
            start_time() + Duration::hours(1),
            "party",
        )
        .await
        .expect("valid");
    let mut events = service.subscribe_events();

    service.reseed().await;

    assert_eq!(service.snapshot().await, default_state());
    assert_eq!(stored_state(&store).await, default_state());
    assert!(matches!(
        events.recv().await.expect("event"),
        HostelEvent::Reseeded
    ));
}

#[tokio::test(start_paused = true)]
async fn ensure_ticker_is_idempotent_and_drives_ticks() {
    let (service, _, _) = open_default().await;
    let machine_id = service.snapshot().await.machines[0].id;
    service.start_wash(machine_id, 5).await;

    let first = service.ensure_ticker().await;
    let second = service.ensure_ticker().await;
    assert!(first.same_as(&second));
    assert_eq!(first.period(), std::time::Duration::from_secs(60));

    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    assert_eq!(service.snapshot().await.machines[0].eta(), Some(4));

    service.stop_ticker().await;
    assert!(!first.is_running().await);
    tokio::time::sleep(std::time::Duration::from_secs(300)).await;
    assert_eq!(service.snapshot().await.machines[0].eta(), Some(4));

    let restarted = service.ensure_ticker().await;
    assert!(!restarted.same_as(&first));
    service.stop_ticker().await;
}

#[tokio::test]
async fn live_feed_overrides_only_the_displayed_status() {
    let seed = default_state();
    let live_label = seed.machines[0].label.clone();
    let settings = Settings {
        live_machine_label: Some(live_label),
        ..Settings::default()
    };
    let feed: Arc<dyn LiveStatusFeed> = Arc::new(FixedFeed(json!("available")));
    let (service, _) = open_with(settings, Arc::new(MemoryStore::new()), Some(feed)).await;
    let machines = service.snapshot().await.machines;
    service.start_wash(machines[0].id, 20).await;
    service.start_wash(machines[1].id, 20).await;

    let views = service.machine_views().await;
    assert_eq!(views[0].display_status, MachineStatus::Running);
    assert!(views[0].live.is_none());

    let mut events = service.subscribe_events();
    let outcome = service.on_visibility_change(true).await;
    let Some(PollOutcome::Updated(snapshot)) = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(snapshot.availability, LiveAvailability::Available);
    assert_eq!(snapshot.log_snippet.as_deref(), Some("wash 12:04"));
    assert!(matches!(
        events.recv().await.expect("event"),
        HostelEvent::LiveStatusUpdated(_)
    ));

    let views = service.machine_views().await;
    assert_eq!(views[0].display_status, MachineStatus::Free);
    assert_eq!(views[0].machine.status(), MachineStatus::Running);
    assert_eq!(views[1].display_status, MachineStatus::Running);
    assert!(views[1].live.is_none());
    assert_eq!(
        service.snapshot().await.machines[0].status(),
        MachineStatus::Running
    );
}

#[tokio::test]
async fn live_feed_needs_a_known_machine_label() {
    let feed: Arc<dyn LiveStatusFeed> = Arc::new(FixedFeed(json!(false)));
    let settings = Settings {
        live_machine_label: Some("Z9-W9".into()),
        ..Settings::default()
    };
    let (service, _) = open_with(settings, Arc::new(MemoryStore::new()), Some(feed)).await;

    assert!(matches!(
        service.poll_live_status().await,
        Some(PollOutcome::Updated(_))
    ));
    assert!(service
        .machine_views()
        .await
        .iter()
        .all(|view| view.live.is_none() && view.display_status == view.machine.status()));
}

#[tokio::test]
async fn hidden_views_and_missing_feeds_do_not_poll() {
    let (service, _, _) = open_default().await;
    assert_eq!(service.on_visibility_change(true).await, None);
    assert_eq!(service.poll_live_status().await, None);

    let feed: Arc<dyn LiveStatusFeed> = Arc::new(FixedFeed(json!(true)));
    let (service, _) = open_with(Settings::default(), Arc::new(MemoryStore::new()), Some(feed)).await;
    assert_eq!(service.on_visibility_change(false).await, None);
}
