use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use shared::domain::{
    Machine, MachineId, MachineState, NoticeKind, Report, ReportId, ResidentId, Wash, WashId,
    WashStatus,
};
use tracing::{debug, info};

use crate::hostel::Hostel;

/// Nudges before the owner gets a direct reminder.
pub const NUDGE_ESCALATION_THRESHOLD: u32 = 3;
/// Independent flags that force the machine back to awaiting collection.
pub const FLAG_PENALTY_THRESHOLD: u32 = 2;
/// Remaining minutes at which the "almost done" notice goes out.
pub const FINISHING_SOON_MINUTES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderChannel {
    Sms,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NudgeOutcome {
    pub nudge_count: u32,
    pub escalated: bool,
    pub reminder: Option<ReminderChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagOutcome {
    pub flag_count: u32,
    pub penalty_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportInput {
    pub machine_id: MachineId,
    pub reason: String,
    pub notes: String,
    pub photo: Option<Vec<u8>>,
    pub affect_status: bool,
}

impl Hostel {
    pub fn machines(&self) -> &[Machine] {
        &self.state.machines
    }

    pub fn machine(&self, machine_id: MachineId) -> Option<&Machine> {
        self.state.machines.iter().find(|m| m.id == machine_id)
    }

    pub fn washes(&self) -> &[Wash] {
        &self.state.washes
    }

    fn machine_index(&self, machine_id: MachineId) -> Option<usize> {
        let index = self.state.machines.iter().position(|m| m.id == machine_id);
        if index.is_none() {
            debug!(machine_id = machine_id.0, "machine not found; ignoring");
        }
        index
    }

    /// Starts a cycle. Offering this only for free machines is up to the caller.
    pub fn start_wash(
        &mut self,
        machine_id: MachineId,
        minutes: u32,
        owner: Option<ResidentId>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(index) = self.machine_index(machine_id) else {
            return false;
        };

        let wash_id = WashId(self.state.allocate_id());
        let machine = &mut self.state.machines[index];
        machine.state = MachineState::Running { eta: minutes };
        machine.nudge_count = 0;
        machine.flag_count = 0;
        machine.owner_id = owner;

        let wash = Wash {
            id: wash_id,
            machine_id,
            machine_label: machine.label.clone(),
            location: machine.location.clone(),
            floor: machine.floor,
            start_at: now,
            end_at: None,
            status: WashStatus::Running,
            owner_id: owner,
        };
        let label = machine.label.clone();
        self.state.washes.push(wash);

        info!(machine_id = machine_id.0, minutes, "wash started");
        self.push_notice(format!("Started wash on {label}"), NoticeKind::Info, now);
        true
    }

    /// Counts every running machine down by one minute. Returns how many
    /// finished and how many crossed the "almost done" mark.
    pub(crate) fn advance_machines(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let mut finished = Vec::new();
        let mut finishing_soon = Vec::new();

        for machine in &mut self.state.machines {
            let MachineState::Running { eta } = machine.state else {
                continue;
            };
            let remaining = eta.saturating_sub(1);
            if remaining == 0 {
                machine.state = MachineState::Awaiting {
                    last_completed_at: now,
                };
                finished.push((machine.id, machine.label.clone()));
            } else {
                machine.state = MachineState::Running { eta: remaining };
                if remaining == FINISHING_SOON_MINUTES {
                    finishing_soon.push(machine.label.clone());
                }
            }
        }

        for label in &finishing_soon {
            self.push_notice(
                format!("{label} finishing in ~{FINISHING_SOON_MINUTES} minutes"),
                NoticeKind::Info,
                now,
            );
        }

        for (machine_id, label) in &finished {
            for wash in self
                .state
                .washes
                .iter_mut()
                .filter(|w| w.machine_id == *machine_id && w.status == WashStatus::Running)
            {
                wash.status = WashStatus::Awaiting;
                wash.end_at = Some(now);
            }
            info!(machine_id = machine_id.0, "wash finished");
            self.push_notice(
                format!("{label} finished, please collect"),
                NoticeKind::Success,
                now,
            );
        }

        (finished.len(), finishing_soon.len())
    }

    pub fn mark_collected(&mut self, machine_id: MachineId, now: DateTime<Utc>) -> bool {
        let Some(index) = self.machine_index(machine_id) else {
            return false;
        };

        let free_before = self.free_counts();
        let machine = &mut self.state.machines[index];
        machine.state = MachineState::Free;
        let label = machine.label.clone();

        for wash in self.state.washes.iter_mut().filter(|w| {
            w.machine_id == machine_id
                && matches!(w.status, WashStatus::Running | WashStatus::Awaiting)
        }) {
            wash.status = WashStatus::Collected;
            wash.end_at = Some(now);
        }

        self.push_notice(format!("{label} is free now"), NoticeKind::Success, now);
        let free_after = self.free_counts();
        self.fire_watch_free(&free_before, &free_after, now);
        true
    }

    pub fn nudge_machine(&mut self, machine_id: MachineId, now: DateTime<Utc>) -> Option<NudgeOutcome> {
        let index = self.machine_index(machine_id)?;
        let machine = &mut self.state.machines[index];
        machine.nudge_count += 1;
        let nudge_count = machine.nudge_count;
        let label = machine.label.clone();
        let owner_id = machine.owner_id;

        if nudge_count < NUDGE_ESCALATION_THRESHOLD {
            self.push_notice(
                format!("Nudged the owner of {label} ({nudge_count})"),
                NoticeKind::Info,
                now,
            );
            return Some(NudgeOutcome {
                nudge_count,
                escalated: false,
                reminder: None,
            });
        }

        self.push_notice(
            format!("{label} has been nudged {nudge_count} times; reminding the owner"),
            NoticeKind::Warning,
            now,
        );
        let reminder = self.dispatch_reminder(owner_id, &label, now);
        Some(NudgeOutcome {
            nudge_count,
            escalated: true,
            reminder,
        })
    }

    /// Records a reminder to the owner when they left a way to reach them.
    fn dispatch_reminder(
        &mut self,
        owner_id: Option<ResidentId>,
        label: &str,
        now: DateTime<Utc>,
    ) -> Option<ReminderChannel> {
        let owner = self
            .state
            .residents
            .iter()
            .find(|r| Some(r.id) == owner_id)?;
        let (channel, via) = match (&owner.phone, &owner.email) {
            (Some(phone), _) => (ReminderChannel::Sms, format!("SMS to {phone}")),
            (None, Some(email)) => (ReminderChannel::Email, format!("email to {email}")),
            (None, None) => return None,
        };
        let title = format!("Reminder sent to {} by {via}: collect laundry from {label}", owner.name);
        self.push_notice(title, NoticeKind::Info, now);
        Some(channel)
    }

    /// Two flags without a new cycle in between put the machine back into
    /// awaiting collection, whatever it was doing.
    pub fn flag_machine(&mut self, machine_id: MachineId, now: DateTime<Utc>) -> Option<FlagOutcome> {
        let index = self.machine_index(machine_id)?;
        let machine = &mut self.state.machines[index];
        machine.flag_count += 1;
        let label = machine.label.clone();

        if machine.flag_count < FLAG_PENALTY_THRESHOLD {
            let flag_count = machine.flag_count;
            self.push_notice(
                format!("{label} flagged; one more flag will apply a penalty"),
                NoticeKind::Info,
                now,
            );
            return Some(FlagOutcome {
                flag_count,
                penalty_applied: false,
            });
        }

        machine.flag_count = 0;
        machine.nudge_count = 0;
        machine.state = MachineState::Awaiting {
            last_completed_at: now,
        };
        info!(machine_id = machine_id.0, "flag penalty applied");
        self.push_notice(
            format!("{label} flagged twice: owner warned to collect their laundry"),
            NoticeKind::Report,
            now,
        );
        Some(FlagOutcome {
            flag_count: 0,
            penalty_applied: true,
        })
    }

    pub fn submit_report(
        &mut self,
        input: ReportInput,
        reported_by: Option<ResidentId>,
        now: DateTime<Utc>,
    ) -> Option<ReportId> {
        let index = self.machine_index(input.machine_id)?;
        let report_id = ReportId(self.state.allocate_id());
        let machine = &mut self.state.machines[index];
        let label = machine.label.clone();

        if input.affect_status {
            machine.state = MachineState::Maint;
            info!(machine_id = input.machine_id.0, reason = %input.reason, "machine taken out of service");
        }

        self.state.reports.push(Report {
            id: report_id,
            machine_id: input.machine_id,
            machine_label: label.clone(),
            reason: input.reason.clone(),
            notes: input.notes,
            photo_b64: input.photo.as_deref().map(|bytes| STANDARD.encode(bytes)),
            affect_status: input.affect_status,
            reported_by,
            created_at: now,
        });

        let title = if input.affect_status {
            format!("Report on {label}: {} (marked for maintenance)", input.reason)
        } else {
            format!("Report on {label}: {}", input.reason)
        };
        self.push_notice(title, NoticeKind::Report, now);
        Some(report_id)
    }

    /// Puts a machine under maintenance back into service.
    pub fn restore_machine(&mut self, machine_id: MachineId, now: DateTime<Utc>) -> bool {
        let Some(index) = self.machine_index(machine_id) else {
            return false;
        };
        if self.state.machines[index].state != MachineState::Maint {
            debug!(machine_id = machine_id.0, "machine not under maintenance; ignoring");
            return false;
        }

        let free_before = self.free_counts();
        let machine = &mut self.state.machines[index];
        machine.state = MachineState::Free;
        machine.nudge_count = 0;
        machine.flag_count = 0;
        machine.owner_id = None;
        let label = machine.label.clone();

        self.push_notice(format!("{label} is back in service"), NoticeKind::Success, now);
        let free_after = self.free_counts();
        self.fire_watch_free(&free_before, &free_after, now);
        true
    }
}
