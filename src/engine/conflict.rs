use rust_decimal::Decimal;
use ulid::Ulid;

use crate::availability::{effective_span, first_conflict};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn validate_start(start: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&start) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Invalid(what));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), EngineError> {
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone too long"));
    }
    Ok(())
}

pub(crate) fn validate_service(service: &Service) -> Result<(), EngineError> {
    validate_name(&service.name, "service name is empty")?;
    if service.duration_minutes == 0 {
        return Err(EngineError::Invalid("service duration must be positive"));
    }
    if service.duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("service longer than a day"));
    }
    if service.price < Decimal::ZERO {
        return Err(EngineError::Invalid("price must not be negative"));
    }
    Ok(())
}

pub(crate) fn validate_client(client: &Client) -> Result<(), EngineError> {
    validate_name(&client.name, "client name is empty")?;
    validate_phone(&client.phone)?;
    validate_notes(client.notes.as_deref())
}

pub(crate) fn validate_settings(settings: &Settings) -> Result<(), EngineError> {
    validate_name(&settings.business_name, "business name is empty")?;
    if let Some(phone) = &settings.business_phone {
        validate_phone(phone)?;
    }
    if settings.calendar.start_hour > 23 || settings.calendar.end_hour > 24 {
        return Err(EngineError::Invalid("hours must lie within one day"));
    }
    if settings.deposit.percentage > 100 {
        return Err(EngineError::Invalid("deposit percentage above 100"));
    }
    Ok(())
}

/// Shape checks that need no state: range, durations, block rules.
pub(crate) fn validate_appointment(appointment: &Appointment) -> Result<(), EngineError> {
    validate_start(appointment.start)?;
    validate_notes(appointment.notes.as_deref())?;
    if appointment
        .custom_duration_minutes
        .is_some_and(|m| m > MAX_DURATION_MINUTES)
    {
        return Err(EngineError::LimitExceeded("block longer than a day"));
    }
    if appointment.is_blocked() && (appointment.client_id.is_some() || appointment.service_id.is_some()) {
        return Err(EngineError::Invalid("blocks carry no client or service"));
    }
    Ok(())
}

impl Engine {
    pub(super) fn service_minutes(&self, service_id: Option<Ulid>) -> Option<u32> {
        service_id.and_then(|id| self.services.get(&id).map(|s| s.duration_minutes))
    }

    pub(super) fn span_of(&self, appointment: &Appointment) -> Span {
        effective_span(appointment, self.service_minutes(appointment.service_id))
    }

    /// The propose half of propose-and-commit. Caller holds the calendar
    /// write guard across this check and the commit.
    pub(super) fn check_no_conflict(&self, cal: &CalendarState, proposed: &Span) -> Result<(), EngineError> {
        // Nothing that starts a full max duration earlier can still be running.
        let nearby: Vec<(Ulid, Span)> = cal
            .starting_between(proposed.start - MAX_DURATION_MS, proposed.end)
            .iter()
            .filter(|a| a.is_active())
            .map(|a| (a.id, self.span_of(a)))
            .collect();
        match first_conflict(proposed, &nearby) {
            Some(existing) => {
                metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
                Err(EngineError::SlotTaken(existing))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(minutes: u32, price: i64) -> Service {
        Service {
            id: Ulid::new(),
            name: "Escova".into(),
            price: Decimal::from(price),
            duration_minutes: minutes,
        }
    }

    #[test]
    fn service_rules() {
        assert!(validate_service(&svc(45, 50)).is_ok());
        assert!(matches!(validate_service(&svc(0, 50)), Err(EngineError::Invalid(_))));
        assert!(matches!(
            validate_service(&svc(MAX_DURATION_MINUTES + 1, 50)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(validate_service(&svc(45, -1)), Err(EngineError::Invalid(_))));
        assert!(validate_service(&svc(45, 0)).is_ok());
    }

    #[test]
    fn settings_rules() {
        let mut settings = Settings::default();
        assert!(validate_settings(&settings).is_ok());
        settings.calendar = BusinessCalendarConfig::new(10, 9);
        assert!(validate_settings(&settings).is_ok());
        settings.calendar = BusinessCalendarConfig::new(8, 25);
        assert!(validate_settings(&settings).is_err());
        settings.calendar = BusinessCalendarConfig::default();
        settings.deposit.percentage = 101;
        assert!(validate_settings(&settings).is_err());
        settings.deposit.percentage = 30;
        settings.business_name = "  ".into();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn block_shape() {
        let block = Appointment {
            id: Ulid::new(),
            client_id: Some(Ulid::new()),
            service_id: None,
            start: MIN_VALID_TIMESTAMP_MS,
            status: AppointmentStatus::Blocked,
            custom_duration_minutes: Some(30),
            notes: None,
        };
        assert!(matches!(validate_appointment(&block), Err(EngineError::Invalid(_))));
        let early = Appointment { client_id: None, start: 0, ..block };
        assert!(matches!(validate_appointment(&early), Err(EngineError::LimitExceeded(_))));
    }
}
