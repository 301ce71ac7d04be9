use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hostel_core::{load_settings, HostelEvent, HostelService, PollOutcome, ReportInput};
use shared::domain::{
    report_takes_machine_offline, BookingId, MachineId, ResidentId, RoomId,
};
use storage::{normalize_database_url, Storage};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Laundry machines and room bookings for the hostel")]
struct Cli {
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
    /// Resident id to act as.
    #[arg(long = "as")]
    acting_as: Option<i64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Machines with their displayed status.
    Status,
    Notices {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Starts a wash. Machines are named by label or id.
    Start {
        machine: String,
        #[arg(long, default_value_t = 45)]
        minutes: u32,
    },
    Collect {
        machine: String,
    },
    Nudge {
        machine: String,
    },
    Flag {
        machine: String,
    },
    Report {
        machine: String,
        reason: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Confirms the fault so the machine is taken out of service.
        #[arg(long)]
        out_of_service: bool,
    },
    Restore {
        machine: String,
    },
    /// Watches a floor for the next free machine.
    Watch {
        location: String,
        floor: i32,
        #[arg(long)]
        cancel: bool,
    },
    Book {
        room_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[arg(long, default_value = "")]
        reason: String,
    },
    Approve {
        booking_id: i64,
    },
    Reject {
        booking_id: i64,
    },
    Cancel {
        booking_id: i64,
    },
    Extend {
        booking_id: i64,
        new_end: DateTime<Utc>,
    },
    Modify {
        booking_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[arg(long)]
        reason: Option<String>,
    },
    Bookings,
    /// Advances the simulation by one minute.
    Tick,
    /// Runs the ticker until ctrl-c, printing notices as they happen.
    Run,
    Reseed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await?;
    storage
        .health_check()
        .await
        .with_context(|| format!("database at {database_url} is not usable"))?;
    let service = HostelService::open(settings, Arc::new(storage)).await?;
    service
        .set_current_resident(cli.acting_as.map(ResidentId))
        .await;

    match cli.command {
        Command::Status => {
            if let Some(PollOutcome::Failed) = service.on_visibility_change(true).await {
                println!("live feed unavailable; showing stored status");
            }
            print_status(&service).await
        }
        Command::Notices { limit } => {
            for notice in service.notices().await.into_iter().take(limit) {
                println!(
                    "{}  [{:?}] {}",
                    notice.time.format("%Y-%m-%d %H:%M"),
                    notice.kind,
                    notice.title
                );
            }
        }
        Command::Start { machine, minutes } => {
            let id = resolve_machine(&service, &machine).await?;
            report_applied(service.start_wash(id, minutes).await, &machine);
        }
        Command::Collect { machine } => {
            let id = resolve_machine(&service, &machine).await?;
            report_applied(service.mark_collected(id).await, &machine);
        }
        Command::Nudge { machine } => {
            let id = resolve_machine(&service, &machine).await?;
            match service.nudge_machine(id).await {
                Some(outcome) if outcome.escalated => println!(
                    "nudged {machine} ({} times); reminder: {:?}",
                    outcome.nudge_count, outcome.reminder
                ),
                Some(outcome) => println!("nudged {machine} ({} times)", outcome.nudge_count),
                None => println!("no change"),
            }
        }
        Command::Flag { machine } => {
            let id = resolve_machine(&service, &machine).await?;
            match service.flag_machine(id).await {
                Some(outcome) if outcome.penalty_applied => {
                    println!("{machine} flagged twice; penalty applied")
                }
                Some(outcome) => println!("{machine} flagged ({})", outcome.flag_count),
                None => println!("no change"),
            }
        }
        Command::Report {
            machine,
            reason,
            notes,
            photo,
            out_of_service,
        } => {
            let machine_id = resolve_machine(&service, &machine).await?;
            let photo = photo
                .map(|path| {
                    std::fs::read(&path)
                        .with_context(|| format!("failed to read photo {}", path.display()))
                })
                .transpose()?;
            let input = ReportInput {
                machine_id,
                affect_status: report_takes_machine_offline(&reason, out_of_service),
                reason,
                notes,
                photo,
            };
            match service.submit_report(input).await {
                Some(report_id) => println!("filed report_id={}", report_id.0),
                None => println!("no change"),
            }
        }
        Command::Restore { machine } => {
            let id = resolve_machine(&service, &machine).await?;
            report_applied(service.restore_machine(id).await, &machine);
        }
        Command::Watch {
            location,
            floor,
            cancel,
        } => {
            if cancel {
                report_applied(
                    service.cancel_watch_free(&location, floor).await,
                    &format!("{location} floor {floor}"),
                );
            } else {
                service.request_watch_free(&location, floor).await;
                println!("watching {location} floor {floor}");
            }
        }
        Command::Book {
            room_id,
            start,
            end,
            reason,
        } => match service
            .submit_booking(RoomId(room_id), start, end, &reason)
            .await?
        {
            Some(booking_id) => println!("requested booking_id={}", booking_id.0),
            None => println!("no room with id {room_id}"),
        },
        Command::Approve { booking_id } => report_applied(
            service.approve_booking(BookingId(booking_id)).await,
            &format!("booking {booking_id}"),
        ),
        Command::Reject { booking_id } => report_applied(
            service.reject_booking(BookingId(booking_id)).await,
            &format!("booking {booking_id}"),
        ),
        Command::Cancel { booking_id } => report_applied(
            service.cancel_booking(BookingId(booking_id)).await,
            &format!("booking {booking_id}"),
        ),
        Command::Extend {
            booking_id,
            new_end,
        } => report_applied(
            service.extend_booking(BookingId(booking_id), new_end).await?,
            &format!("booking {booking_id}"),
        ),
        Command::Modify {
            booking_id,
            start,
            end,
            reason,
        } => report_applied(
            service
                .modify_booking(BookingId(booking_id), start, end, reason.as_deref())
                .await?,
            &format!("booking {booking_id}"),
        ),
        Command::Bookings => {
            for (booking, view) in service.booking_views().await {
                println!(
                    "{:>4}  {:<16} {} -> {}  {:?}  {}",
                    booking.id.0,
                    booking.room_label,
                    booking.start_at.format("%Y-%m-%d %H:%M"),
                    booking.end_at.format("%Y-%m-%d %H:%M"),
                    view,
                    booking.reason
                );
            }
        }
        Command::Tick => {
            let summary = service.tick().await;
            println!(
                "finished={} finishing_soon={} watch_free_fired={} auto_approved={}",
                summary.finished,
                summary.finishing_soon,
                summary.watch_free_fired,
                summary.auto_approved
            );
        }
        Command::Run => run(service).await?,
        Command::Reseed => {
            service.reseed().await;
            println!("state reseeded");
        }
    }

    Ok(())
}

async fn run(service: Arc<HostelService>) -> Result<()> {
    let mut events = service.subscribe_events();
    let ticker = service.ensure_ticker().await;
    info!(period_secs = ticker.period().as_secs(), "running; press ctrl-c to stop");

    if let Some(PollOutcome::Failed) = service.on_visibility_change(true).await {
        println!("live feed unavailable; showing stored status");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(HostelEvent::Notice(notice)) => println!("[{:?}] {}", notice.kind, notice.title),
                Ok(HostelEvent::LiveStatusUpdated(snapshot)) => {
                    println!("live: {:?}", snapshot.availability)
                }
                Ok(HostelEvent::Error(message)) => eprintln!("error: {message}"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    info!(skipped, "event listener fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    service.stop_ticker().await;
    Ok(())
}

async fn print_status(service: &HostelService) {
    for view in service.machine_views().await {
        let machine = &view.machine;
        let detail = match (machine.eta(), machine.last_completed_at()) {
            (Some(eta), _) => format!("{eta} min left"),
            (None, Some(at)) => format!("done at {}", at.format("%H:%M")),
            (None, None) => String::new(),
        };
        let live = view
            .live
            .as_ref()
            .and_then(|snapshot| snapshot.log_snippet.as_deref())
            .map(|snippet| format!("  live: {snippet}"))
            .unwrap_or_default();
        println!(
            "{:>4}  {:<8} {} floor {:<2} {:<9} {}{}",
            machine.id.0,
            machine.label,
            machine.location,
            machine.floor,
            format!("{:?}", view.display_status),
            detail,
            live
        );
    }
}

/// Accepts a machine label (`A1-W2`) or its numeric id.
async fn resolve_machine(service: &HostelService, name: &str) -> Result<MachineId> {
    let machines = service.snapshot().await.machines;
    if let Some(machine) = machines.iter().find(|m| m.label.eq_ignore_ascii_case(name)) {
        return Ok(machine.id);
    }
    if let Ok(id) = name.parse::<i64>() {
        if machines.iter().any(|m| m.id.0 == id) {
            return Ok(MachineId(id));
        }
    }
    bail!("no machine named '{name}'")
}

fn report_applied(applied: bool, subject: &str) {
    if applied {
        println!("updated {subject}");
    } else {
        println!("no change to {subject}");
    }
}
