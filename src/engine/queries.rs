use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::availability::{self, Deposit, GridSlot, Snapshot};
use crate::clock;
use crate::limits::MAX_DURATION_MS;
use crate::message::{self, BookingRequest};
use crate::model::*;

use super::{Engine, EngineError};

/// A rendered public booking request and the link that sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingHandoff {
    pub text: String,
    pub link: String,
    pub deposit: Option<Deposit>,
}

impl Engine {
    fn services_snapshot(&self) -> Vec<Service> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn get_client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|e| e.value().clone())
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut services = self.services_snapshot();
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        services
    }

    pub fn list_clients(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        clients
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Run `f` over a snapshot holding every appointment that can touch
    /// `date`: those starting that day, earlier ones still running, and the
    /// next day's early ones a late slot can run into.
    async fn with_day_snapshot<R>(&self, date: NaiveDate, f: impl FnOnce(&Snapshot<'_>) -> R) -> R {
        let config = self.settings.read().await.calendar;
        let services = self.services_snapshot();
        let (day_start, day_end) = clock::day_bounds(date);
        let cal = self.calendar.read().await;
        let relevant = cal.starting_between(day_start - MAX_DURATION_MS, day_end + MAX_DURATION_MS);
        let snapshot = Snapshot::new(relevant, &services, config);
        f(&snapshot)
    }

    /// Bookable starts on `date` for a service, as of the host clock.
    pub async fn free_slots(&self, date: NaiveDate, service_id: Ulid) -> Result<Vec<Ms>, EngineError> {
        self.free_slots_at(date, service_id, clock::now_ms()).await
    }

    pub async fn free_slots_at(&self, date: NaiveDate, service_id: Ulid, now: Ms) -> Result<Vec<Ms>, EngineError> {
        let service = self.get_service(&service_id).ok_or(EngineError::NotFound(service_id))?;
        Ok(self
            .with_day_snapshot(date, |snap| availability::free_slots(date, &service, snap, now))
            .await)
    }

    /// Staff grid for `date`, continuations included.
    pub async fn classify(&self, date: NaiveDate) -> Vec<GridSlot> {
        self.with_day_snapshot(date, |snap| availability::classify(date, snap))
            .await
    }

    /// Every appointment starting on `date`, cancelled ones included.
    pub async fn appointments_on(&self, date: NaiveDate) -> Vec<AppointmentInfo> {
        let (day_start, day_end) = clock::day_bounds(date);
        let cal = self.calendar.read().await;
        cal.starting_between(day_start, day_end)
            .iter()
            .map(|a| AppointmentInfo {
                appointment: a.clone(),
                span: self.span_of(a),
            })
            .collect()
    }

    /// First non-cancelled appointment later today.
    pub async fn next_appointment(&self, now: Ms) -> Option<AppointmentInfo> {
        let date = clock::date_of(now)?;
        let (_, day_end) = clock::day_bounds(date);
        let cal = self.calendar.read().await;
        cal.starting_between(now + 1, day_end)
            .iter()
            .find(|a| a.is_active())
            .map(|a| AppointmentInfo {
                appointment: a.clone(),
                span: self.span_of(a),
            })
    }

    pub async fn get_appointment(&self, id: &Ulid) -> Option<AppointmentInfo> {
        let cal = self.calendar.read().await;
        cal.get(id).map(|a| AppointmentInfo {
            appointment: a.clone(),
            span: self.span_of(a),
        })
    }

    /// Deposit for booking `service_id`, optionally for a known client.
    pub async fn deposit_quote(&self, service_id: Ulid, client_id: Option<Ulid>) -> Result<Option<Deposit>, EngineError> {
        let service = self.get_service(&service_id).ok_or(EngineError::NotFound(service_id))?;
        let requires = match client_id {
            Some(id) => self.get_client(&id).ok_or(EngineError::NotFound(id))?.requires_deposit,
            None => false,
        };
        let config = self.settings.read().await.deposit;
        Ok(availability::compute_deposit(&service, &config, requires))
    }

    /// Public booking flow: compose the handoff for a chosen slot. Nothing
    /// is reserved; the slot stays free until staff book it.
    ///
    /// For `SPECIFIC` deposits the flag comes from a known client whose
    /// phone digits match; strangers are not asked for one.
    pub async fn booking_message(
        &self,
        service_id: Ulid,
        start: Ms,
        client_name: &str,
        client_phone: &str,
    ) -> Result<BookingHandoff, EngineError> {
        let service = self.get_service(&service_id).ok_or(EngineError::NotFound(service_id))?;
        let settings = self.settings().await;

        let digits = message::digits_only(client_phone);
        let requires = !digits.is_empty()
            && self
                .clients
                .iter()
                .any(|c| c.requires_deposit && message::digits_only(&c.phone) == digits);
        let deposit = availability::compute_deposit(&service, &settings.deposit, requires);

        let text = message::compose(&BookingRequest {
            service_name: &service.name,
            start,
            client_name,
            client_phone,
            deposit_amount: deposit.map(|d| d.amount),
        })?;
        let link = message::link(settings.business_phone.as_deref(), &text);
        Ok(BookingHandoff { text, link, deposit })
    }

    /// Receive every calendar change touching `date`.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        self.notify.subscribe(date)
    }
}
