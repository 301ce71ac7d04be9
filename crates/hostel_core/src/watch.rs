use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use shared::domain::NoticeKind;
use tracing::info;

use crate::hostel::Hostel;

/// Free machines per `(location, floor)`.
pub type FreeCounts = BTreeMap<(String, i32), usize>;

impl Hostel {
    /// Asks to be told the next time a machine frees up on this floor.
    pub fn request_watch_free(&mut self, location: &str, floor: i32, now: DateTime<Utc>) {
        self.state
            .watch_free
            .entry(location.to_string())
            .or_default()
            .insert(floor, true);
        self.push_notice(
            format!("Watching {location} floor {floor}; you'll hear when a machine is free"),
            NoticeKind::Info,
            now,
        );
    }

    pub fn cancel_watch_free(&mut self, location: &str, floor: i32) -> bool {
        match self
            .state
            .watch_free
            .get_mut(location)
            .and_then(|floors| floors.get_mut(&floor))
        {
            Some(watching) if *watching => {
                *watching = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_watching(&self, location: &str, floor: i32) -> bool {
        self.state
            .watch_free
            .get(location)
            .and_then(|floors| floors.get(&floor))
            .copied()
            .unwrap_or(false)
    }

    pub fn free_counts(&self) -> FreeCounts {
        let mut counts = FreeCounts::new();
        for machine in &self.state.machines {
            let entry = counts
                .entry((machine.location.clone(), machine.floor))
                .or_insert(0);
            if machine.is_free() {
                *entry += 1;
            }
        }
        counts
    }

    /// Fires each watched floor whose free count went from zero to non-zero
    /// between the two snapshots, then clears its flag.
    pub fn fire_watch_free(
        &mut self,
        before: &FreeCounts,
        after: &FreeCounts,
        now: DateTime<Utc>,
    ) -> usize {
        let mut fired = Vec::new();
        for (location, floors) in &mut self.state.watch_free {
            for (floor, watching) in floors.iter_mut().filter(|(_, watching)| **watching) {
                let key = (location.clone(), *floor);
                let was = before.get(&key).copied().unwrap_or(0);
                let is = after.get(&key).copied().unwrap_or(0);
                if was == 0 && is > 0 {
                    *watching = false;
                    fired.push(key);
                }
            }
        }

        for (location, floor) in &fired {
            info!(%location, floor, "watched floor has a free machine");
            self.push_notice(
                format!("A machine is free on {location} floor {floor}"),
                NoticeKind::Success,
                now,
            );
        }
        fired.len()
    }
}
