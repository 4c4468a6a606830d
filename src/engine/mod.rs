mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;
pub use mutations::ImportReport;
pub use queries::BookingHandoff;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::DayHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one fsync is in flight are
/// written together and share the next fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes cannot leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// One owner's schedule: catalog, profile and calendar, WAL-backed.
///
/// Calendar mutations serialize on the `calendar` write guard; the overlap
/// check and the insert of `book_appointment` happen under one guard.
pub struct Engine {
    pub(super) services: DashMap<Ulid, Service>,
    pub(super) clients: DashMap<Ulid, Client>,
    pub(super) settings: RwLock<Settings>,
    pub(super) calendar: RwLock<CalendarState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<DayHub>,
}

/// Apply a catalog event. Calendar and settings events are ignored.
fn apply_to_catalog(services: &DashMap<Ulid, Service>, clients: &DashMap<Ulid, Client>, event: &Event) {
    match event {
        Event::ServiceSaved { service } => {
            services.insert(service.id, service.clone());
        }
        Event::ServiceDeleted { id } => {
            services.remove(id);
        }
        Event::ClientSaved { client } => {
            clients.insert(client.id, client.clone());
        }
        Event::ClientDeleted { id } => {
            clients.remove(id);
        }
        _ => {}
    }
}

/// Apply a calendar event (no locking; caller holds the guard).
fn apply_to_calendar(cal: &mut CalendarState, event: &Event) {
    match event {
        Event::AppointmentBooked { appointment } => cal.insert(appointment.clone()),
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(appt) = cal.get_mut(id) {
                appt.status = *status;
            }
        }
        Event::AppointmentDeleted { id, .. } => {
            cal.remove(*id);
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<DayHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into owned state before any lock exists.
        let services = DashMap::new();
        let clients = DashMap::new();
        let mut settings = Settings::default();
        let mut calendar = CalendarState::new();
        for event in &events {
            match event {
                Event::SettingsUpdated { settings: s } => settings = s.clone(),
                Event::AppointmentBooked { .. }
                | Event::AppointmentStatusChanged { .. }
                | Event::AppointmentDeleted { .. } => apply_to_calendar(&mut calendar, event),
                _ => apply_to_catalog(&services, &clients, event),
            }
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}: {} services, {} clients, {} appointments",
                events.len(),
                wal_path.display(),
                services.len(),
                clients.len(),
                calendar.len()
            );
        }

        Ok(Self {
            services,
            clients,
            settings: RwLock::new(settings),
            calendar: RwLock::new(calendar),
            wal_tx,
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply to the calendar, notify the touched day.
    pub(super) async fn persist_and_apply(&self, cal: &mut CalendarState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event);
        self.notify.send(event);
        Ok(())
    }

    /// WAL-append and apply a catalog event. Holds the calendar read guard
    /// so durations cannot change under a booking's overlap check.
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        let _cal = self.calendar.read().await;
        self.wal_append(event).await?;
        apply_to_catalog(&self.services, &self.clients, event);
        Ok(())
    }
}
