use shared::{
    domain::{Machine, MachineId, MachineState, Room, RoomId},
    state::AggregateState,
};
use storage::{normalize_database_url, StateStore, Storage};

#[tokio::test]
async fn snapshot_survives_reopening_the_database_file() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let db_path = temp_root.path().join("nested").join("hostel.db");
    let database_url = normalize_database_url(&db_path.to_string_lossy());

    let mut state = AggregateState::empty();
    let machine_id = MachineId(state.allocate_id());
    let mut machine = Machine::new(machine_id, "W7", "Block B", 3);
    machine.state = MachineState::Running { eta: 12 };
    machine.nudge_count = 2;
    state.machines.push(machine);
    let room_id = RoomId(state.allocate_id());
    state.rooms.push(Room {
        id: room_id,
        label: "Study Room".into(),
        has_ac: false,
    });

    {
        let storage = Storage::new(&database_url).await.expect("open");
        storage.save(&state).await.expect("save");
    }
    assert!(db_path.exists(), "database file should be created");

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let loaded = reopened.load().await.expect("load").expect("snapshot");
    assert_eq!(loaded.machines[0].eta(), Some(12));
    assert_eq!(loaded.machines[0].nudge_count, 2);
    assert_eq!(loaded.next_id, state.next_id);
    assert!(loaded.notices.is_empty());
}
