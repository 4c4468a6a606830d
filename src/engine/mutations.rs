use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::mapping::DomainSnapshot;
use crate::model::*;

use super::conflict::{validate_appointment, validate_client, validate_service, validate_settings};
use super::{Engine, EngineError, WalCommand};

/// Outcome of a bulk import. Appointments that collide with an already
/// imported one, or point at a missing service or client, are skipped.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub services: usize,
    pub clients: usize,
    pub appointments: usize,
    pub skipped: Vec<(Ulid, EngineError)>,
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    /// Insert or replace a service.
    pub async fn save_service(&self, service: Service) -> Result<(), EngineError> {
        validate_service(&service)?;
        if !self.services.contains_key(&service.id) && self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        self.persist_catalog(&Event::ServiceSaved { service }).await
    }

    /// Appointments still linked to a deleted service fall back to the
    /// default duration.
    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_catalog(&Event::ServiceDeleted { id }).await
    }

    pub async fn save_client(&self, client: Client) -> Result<(), EngineError> {
        validate_client(&client)?;
        if !self.clients.contains_key(&client.id) && self.clients.len() >= MAX_CLIENTS {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        self.persist_catalog(&Event::ClientSaved { client }).await
    }

    pub async fn delete_client(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.clients.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_catalog(&Event::ClientDeleted { id }).await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), EngineError> {
        self.modify_settings(|_| settings).await.map(|_| ())
    }

    /// Read-modify-write of the profile under one guard.
    pub async fn modify_settings(&self, f: impl FnOnce(Settings) -> Settings) -> Result<Settings, EngineError> {
        let mut guard = self.settings.write().await;
        let updated = f(guard.clone());
        validate_settings(&updated)?;
        self.wal_append(&Event::SettingsUpdated {
            settings: updated.clone(),
        })
        .await?;
        *guard = updated.clone();
        Ok(updated)
    }

    // ── Calendar ─────────────────────────────────────────────

    /// Propose-and-commit. The overlap check and the insert run under one
    /// calendar write guard, so of two concurrent bookings for overlapping
    /// spans exactly one wins and the other gets `SlotTaken`.
    pub async fn book_appointment(&self, appointment: Appointment) -> Result<AppointmentInfo, EngineError> {
        if !appointment.status.is_initial() {
            return Err(EngineError::InvalidTransition {
                from: None,
                to: appointment.status,
            });
        }
        let mut cal = self.calendar.write().await;
        self.commit_appointment(&mut cal, appointment).await
    }

    /// Shared by booking and import. Any status is accepted here; callers
    /// decide which ones are allowed.
    async fn commit_appointment(
        &self,
        cal: &mut CalendarState,
        appointment: Appointment,
    ) -> Result<AppointmentInfo, EngineError> {
        validate_appointment(&appointment)?;
        if let Some(service_id) = appointment.service_id
            && !self.services.contains_key(&service_id)
        {
            return Err(EngineError::NotFound(service_id));
        }
        if let Some(client_id) = appointment.client_id
            && !self.clients.contains_key(&client_id)
        {
            return Err(EngineError::NotFound(client_id));
        }
        if cal.len() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }
        if cal.get(&appointment.id).is_some() {
            return Err(EngineError::AlreadyExists(appointment.id));
        }

        let span = self.span_of(&appointment);
        if appointment.is_active() {
            self.check_no_conflict(cal, &span)?;
        }

        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(cal, &event).await?;
        metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);
        Ok(AppointmentInfo { appointment, span })
    }

    pub async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<AppointmentInfo, EngineError> {
        let mut cal = self.calendar.write().await;
        let current = cal.get(&id).ok_or(EngineError::NotFound(id))?;
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: Some(current.status),
                to: status,
            });
        }
        let mut updated = current.clone();
        updated.status = status;

        let event = Event::AppointmentStatusChanged {
            id,
            start: updated.start,
            status,
        };
        self.persist_and_apply(&mut cal, &event).await?;
        let span = self.span_of(&updated);
        Ok(AppointmentInfo {
            appointment: updated,
            span,
        })
    }

    pub async fn delete_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        let mut cal = self.calendar.write().await;
        let start = cal.get(&id).ok_or(EngineError::NotFound(id))?.start;
        let event = Event::AppointmentDeleted { id, start };
        self.persist_and_apply(&mut cal, &event).await
    }

    // ── Bulk ─────────────────────────────────────────────────

    /// Load a mapped store export. Catalog rows are upserted; appointments
    /// go through the same overlap check as live bookings, but may carry
    /// any status.
    pub async fn import(&self, snapshot: DomainSnapshot) -> Result<ImportReport, EngineError> {
        let rows = snapshot.services.len() + snapshot.clients.len() + snapshot.appointments.len();
        if rows > MAX_IMPORT_ROWS {
            return Err(EngineError::LimitExceeded("import too large"));
        }

        self.update_settings(snapshot.settings).await?;
        let mut report = ImportReport::default();
        for service in snapshot.services {
            self.save_service(service).await?;
            report.services += 1;
        }
        for client in snapshot.clients {
            self.save_client(client).await?;
            report.clients += 1;
        }

        let mut cal = self.calendar.write().await;
        for appointment in snapshot.appointments {
            let id = appointment.id;
            match self.commit_appointment(&mut cal, appointment).await {
                Ok(_) => report.appointments += 1,
                Err(e @ (EngineError::SlotTaken(_) | EngineError::AlreadyExists(_) | EngineError::NotFound(_))) => {
                    tracing::warn!("import skipped appointment {id}: {e}");
                    report.skipped.push((id, e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Rewrite the WAL with the minimum events that recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Both guards stay held until the new log is in place: the calendar
        // write guard also shuts out catalog writers (they hold its read
        // side), the settings guard shuts out profile updates.
        let cal = self.calendar.write().await;
        let settings_guard = self.settings.read().await;
        let settings = settings_guard.clone();

        let mut events = Vec::with_capacity(1 + self.services.len() + self.clients.len() + cal.len());
        events.push(Event::SettingsUpdated { settings });
        events.extend(self.services.iter().map(|e| Event::ServiceSaved {
            service: e.value().clone(),
        }));
        events.extend(self.clients.iter().map(|e| Event::ClientSaved {
            client: e.value().clone(),
        }));
        events.extend(cal.appointments.iter().map(|a| Event::AppointmentBooked {
            appointment: a.clone(),
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(settings_guard);
        drop(cal);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
