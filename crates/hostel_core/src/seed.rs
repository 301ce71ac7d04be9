use shared::{
    domain::{Machine, MachineId, Resident, ResidentId, Room, RoomId},
    state::AggregateState,
};
use tracing::warn;

/// `(location, floors, machines per floor, label prefix)`
const LAUNDRY_LAYOUT: [(&str, i32, usize, &str); 2] = [
    ("Block A", 3, 3, "A"),
    ("Block B", 2, 2, "B"),
];

const ROOMS: [(&str, bool); 4] = [
    ("Common Room A", true),
    ("Common Room B", false),
    ("Study Room 1", true),
    ("Music Room", false),
];

const RESIDENTS: [(&str, &str, Option<&str>, Option<&str>); 4] = [
    ("Aisha Khan", "A-104", Some("+65 8123 4567"), None),
    ("Ben Ortiz", "B-210", None, Some("ben.ortiz@hostel.example")),
    ("Chen Wei", "A-305", None, None),
    ("Dana Mensah", "B-118", Some("+65 9011 2233"), Some("dana@hostel.example")),
];

/// Fresh catalog: every machine free, no bookings, washes, reports or notices.
pub fn default_state() -> AggregateState {
    let mut state = AggregateState::empty();

    for (location, floors, per_floor, prefix) in LAUNDRY_LAYOUT {
        for floor in 1..=floors {
            for slot in 1..=per_floor {
                let id = MachineId(state.allocate_id());
                let label = format!("{prefix}{floor}-W{slot}");
                state.machines.push(Machine::new(id, label, location, floor));
            }
        }
    }

    for (label, has_ac) in ROOMS {
        let id = RoomId(state.allocate_id());
        state.rooms.push(Room {
            id,
            label: label.to_string(),
            has_ac,
        });
    }

    for (name, room, phone, email) in RESIDENTS {
        let id = ResidentId(state.allocate_id());
        state.residents.push(Resident {
            id,
            name: name.to_string(),
            room: room.to_string(),
            phone: phone.map(str::to_string),
            email: email.map(str::to_string),
        });
    }

    state
}

/// Uses the loaded snapshot when it is current, otherwise reseeds. The flag
/// tells whether a reseed happened.
pub fn restore_or_seed(loaded: Option<AggregateState>) -> (AggregateState, bool) {
    match loaded {
        Some(state) if state.is_usable() => (state, false),
        Some(state) => {
            warn!(
                stored_version = state.version,
                machines = state.machines.len(),
                rooms = state.rooms.len(),
                "stored state is outdated or incomplete; reseeding"
            );
            (default_state(), true)
        }
        None => (default_state(), true),
    }
}
