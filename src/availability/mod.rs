//! Pure availability computations over an immutable snapshot.
//!
//! Nothing here reads ambient state or reserves anything: answers are only
//! as fresh as the snapshot passed in. The authoritative overlap check
//! lives in `Engine::book_appointment`.

mod conflict;
mod deposit;
mod grid;
mod slots;

pub use conflict::{effective_duration_minutes, effective_span, first_conflict, merge_overlapping, overlaps};
pub use deposit::{Deposit, compute as compute_deposit, is_required as deposit_required};
pub use grid::{GridSlot, SlotClass, classify};
pub use slots::SlotGenerator;

use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock;
use crate::model::*;

/// Everything one availability query needs.
pub struct Snapshot<'a> {
    appointments: &'a [Appointment],
    service_minutes: HashMap<Ulid, u32>,
    config: BusinessCalendarConfig,
}

impl<'a> Snapshot<'a> {
    pub fn new(
        appointments: &'a [Appointment],
        services: &[Service],
        config: BusinessCalendarConfig,
    ) -> Self {
        let service_minutes = services
            .iter()
            .map(|s| (s.id, s.duration_minutes))
            .collect();
        Self {
            appointments,
            service_minutes,
            config,
        }
    }

    pub fn config(&self) -> &BusinessCalendarConfig {
        &self.config
    }

    pub fn appointments(&self) -> &'a [Appointment] {
        self.appointments
    }

    pub fn span_of(&self, appointment: &Appointment) -> Span {
        let service_minutes = appointment
            .service_id
            .and_then(|id| self.service_minutes.get(&id).copied());
        effective_span(appointment, service_minutes)
    }

    /// Non-cancelled appointments with their effective spans, in snapshot order.
    pub fn active_spans(&self) -> impl Iterator<Item = (&'a Appointment, Span)> + '_ {
        self.appointments
            .iter()
            .filter(|a| a.is_active())
            .map(move |a| (a, self.span_of(a)))
    }
}

/// Bookable start instants on `date` for `service`, ascending.
///
/// A candidate survives when `[candidate, candidate + service duration)`
/// overlaps no non-cancelled appointment and, on the current day, it is
/// not earlier than `now`.
pub fn free_slots(date: NaiveDate, service: &Service, snapshot: &Snapshot<'_>, now: Ms) -> Vec<Ms> {
    let slots = SlotGenerator::new(date, snapshot.config());
    let duration = service.duration_minutes as Ms * MINUTE_MS;
    let window = slots.window();
    if window.duration_ms() == 0 {
        return Vec::new();
    }
    let reach = Span::new(window.start, window.end + duration);

    let mut busy: Vec<Span> = snapshot
        .active_spans()
        .map(|(_, span)| span)
        .filter(|span| span.overlaps(&reach))
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    let is_today = clock::date_of(now) == Some(date);
    let mut free = Vec::with_capacity(slots.len());
    let mut bi = 0;

    for candidate in slots {
        if is_today && candidate < now {
            continue;
        }
        while bi < busy.len() && busy[bi].end <= candidate {
            bi += 1;
        }
        let proposed = Span::new(candidate, candidate + duration);
        let taken = bi < busy.len() && overlaps(&busy[bi], &proposed);
        if !taken {
            free.push(candidate);
        }
    }

    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
    }

    fn service(minutes: u32) -> Service {
        Service {
            id: Ulid::new(),
            name: format!("{minutes} min"),
            price: Decimal::from(100),
            duration_minutes: minutes,
        }
    }

    fn booked(start: Ms, service: &Service, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: None,
            service_id: Some(service.id),
            start,
            status,
            custom_duration_minutes: None,
            notes: None,
        }
    }

    fn block(start: Ms, minutes: u32) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: None,
            service_id: None,
            start,
            status: AppointmentStatus::Blocked,
            custom_duration_minutes: Some(minutes),
            notes: Some("Horário Bloqueado".into()),
        }
    }

    // Far in the past relative to every test day: no past-time filtering.
    const LONG_AGO: Ms = -DAY_MS;

    #[test]
    fn scenario_a_free_slots_around_an_hour_long_booking() {
        let hour = service(60);
        let half = service(30);
        let appts = vec![booked(10 * H, &hour, AppointmentStatus::Confirmed)];
        let services = vec![hour.clone(), half.clone()];
        let snap = Snapshot::new(&appts, &services, BusinessCalendarConfig::new(9, 12));

        let free = free_slots(epoch(), &half, &snap, LONG_AGO);
        assert_eq!(free, vec![9 * H, 9 * H + 30 * M, 11 * H, 11 * H + 30 * M]);
    }

    #[test]
    fn scenario_d_past_candidates_dropped_on_current_day() {
        let svc = service(30);
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&[], &services, BusinessCalendarConfig::new(8, 19));
        let now = 10 * H + 15 * M;

        let free = free_slots(epoch(), &svc, &snap, now);
        assert!(!free.contains(&(10 * H)));
        assert_eq!(free.first(), Some(&(10 * H + 30 * M)));
    }

    #[test]
    fn past_filter_only_applies_to_today() {
        let svc = service(30);
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&[], &services, BusinessCalendarConfig::new(9, 10));
        let tomorrow = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        let now = 9 * H + 45 * M; // today

        assert_eq!(free_slots(tomorrow, &svc, &snap, now).len(), 2);
        assert_eq!(free_slots(epoch(), &svc, &snap, now), Vec::<Ms>::new());
    }

    #[test]
    fn candidate_equal_to_now_is_kept() {
        let svc = service(30);
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&[], &services, BusinessCalendarConfig::new(9, 10));
        assert_eq!(free_slots(epoch(), &svc, &snap, 9 * H), vec![9 * H, 9 * H + 30 * M]);
    }

    #[test]
    fn scenario_e_misconfigured_hours_are_empty() {
        let svc = service(30);
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&[], &services, BusinessCalendarConfig::new(10, 9));
        assert!(free_slots(epoch(), &svc, &snap, LONG_AGO).is_empty());
    }

    #[test]
    fn long_service_cannot_run_into_next_booking() {
        let two_hours = service(120);
        let appts = vec![booked(11 * H, &two_hours, AppointmentStatus::Pending)];
        let services = vec![two_hours.clone()];
        let snap = Snapshot::new(&appts, &services, BusinessCalendarConfig::new(9, 15));

        let free = free_slots(epoch(), &two_hours, &snap, LONG_AGO);
        // 09:00 fits exactly before 11:00; 09:30..12:30 all collide.
        assert_eq!(
            free,
            vec![9 * H, 13 * H, 13 * H + 30 * M, 14 * H, 14 * H + 30 * M]
        );
    }

    #[test]
    fn off_grid_block_hides_both_neighbours() {
        let svc = service(30);
        let appts = vec![block(10 * H + 15 * M, 45)];
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&appts, &services, BusinessCalendarConfig::new(10, 12));

        let free = free_slots(epoch(), &svc, &snap, LONG_AGO);
        assert_eq!(free, vec![11 * H, 11 * H + 30 * M]);
    }

    #[test]
    fn cancelled_appointments_do_not_block() {
        let svc = service(60);
        let appts = vec![booked(9 * H, &svc, AppointmentStatus::Cancelled)];
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&appts, &services, BusinessCalendarConfig::new(9, 10));
        assert_eq!(free_slots(epoch(), &svc, &snap, LONG_AGO), vec![9 * H, 9 * H + 30 * M]);
    }

    #[test]
    fn unknown_service_link_uses_sixty_minutes() {
        let svc = service(30);
        let ghost = Service { id: Ulid::new(), ..service(240) };
        let appts = vec![booked(9 * H, &ghost, AppointmentStatus::Confirmed)];
        let services = vec![svc.clone()];
        let snap = Snapshot::new(&appts, &services, BusinessCalendarConfig::new(9, 11));
        assert_eq!(free_slots(epoch(), &svc, &snap, LONG_AGO), vec![10 * H, 10 * H + 30 * M]);
    }

    #[test]
    fn no_free_slot_overlaps_any_active_appointment() {
        let durations = [30, 45, 60, 90];
        let services: Vec<Service> = durations.iter().map(|d| service(*d)).collect();
        let appts = vec![
            booked(8 * H + 30 * M, &services[2], AppointmentStatus::Confirmed),
            block(11 * H + 10 * M, 25),
            booked(13 * H, &services[3], AppointmentStatus::Pending),
            booked(15 * H, &services[1], AppointmentStatus::Completed),
            booked(16 * H, &services[0], AppointmentStatus::Cancelled),
        ];
        let snap = Snapshot::new(&appts, &services, BusinessCalendarConfig::new(8, 18));

        for svc in &services {
            for slot in free_slots(epoch(), svc, &snap, LONG_AGO) {
                let proposed = Span::from_minutes(slot, svc.duration_minutes);
                for (appt, span) in snap.active_spans() {
                    assert!(
                        !overlaps(&proposed, &span),
                        "slot {slot} for {} overlaps {:?}",
                        svc.name,
                        appt.id
                    );
                }
            }
        }
    }
}
