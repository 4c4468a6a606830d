use ulid::Ulid;

use crate::model::*;

/// The overlap predicate every booking decision goes through.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// Resolve how long an appointment occupies the calendar.
///
/// Blocks use their custom duration; everything else uses the linked
/// service. A missing or zero value falls back to 60 minutes.
pub fn effective_duration_minutes(appointment: &Appointment, service_minutes: Option<u32>) -> u32 {
    let minutes = if appointment.is_blocked() {
        appointment.custom_duration_minutes
    } else {
        service_minutes
    };
    minutes
        .filter(|m| *m > 0)
        .unwrap_or(FALLBACK_DURATION_MINUTES)
}

pub fn effective_span(appointment: &Appointment, service_minutes: Option<u32>) -> Span {
    Span::from_minutes(
        appointment.start,
        effective_duration_minutes(appointment, service_minutes),
    )
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// First busy entry overlapping `proposed`, in iteration order.
pub fn first_conflict<'a, I>(proposed: &Span, busy: I) -> Option<Ulid>
where
    I: IntoIterator<Item = &'a (Ulid, Span)>,
{
    busy.into_iter()
        .find(|(_, span)| overlaps(proposed, span))
        .map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;

    fn appt(status: AppointmentStatus, custom: Option<u32>) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: None,
            service_id: Some(Ulid::new()),
            start: 0,
            status,
            custom_duration_minutes: custom,
            notes: None,
        }
    }

    #[test]
    fn overlap_is_symmetric_over_a_grid() {
        let points: Vec<Ms> = (0..6).map(|i| i * 15 * M).collect();
        let mut spans = Vec::new();
        for &s in &points {
            for &e in &points {
                if s <= e {
                    spans.push(Span::new(s, e));
                }
            }
        }
        for a in &spans {
            for b in &spans {
                assert_eq!(overlaps(a, b), overlaps(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn touching_boundaries_do_not_conflict() {
        let first = Span::from_minutes(0, 60);
        let second = Span::from_minutes(60 * M, 30);
        assert!(!overlaps(&first, &second));
        let nudged = Span::from_minutes(60 * M - 1, 30);
        assert!(overlaps(&first, &nudged));
    }

    #[test]
    fn blocked_uses_custom_duration() {
        let block = appt(AppointmentStatus::Blocked, Some(45));
        assert_eq!(effective_duration_minutes(&block, Some(120)), 45);
    }

    #[test]
    fn blocked_without_custom_falls_back() {
        let block = appt(AppointmentStatus::Blocked, None);
        assert_eq!(effective_duration_minutes(&block, Some(120)), 60);
        let zero = appt(AppointmentStatus::Blocked, Some(0));
        assert_eq!(effective_duration_minutes(&zero, None), 60);
    }

    #[test]
    fn service_duration_or_fallback() {
        let booked = appt(AppointmentStatus::Confirmed, Some(15));
        assert_eq!(effective_duration_minutes(&booked, Some(90)), 90);
        assert_eq!(effective_duration_minutes(&booked, None), 60);
        assert_eq!(effective_span(&booked, Some(90)), Span::new(0, 90 * M));
    }

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    #[test]
    fn first_conflict_reports_owner() {
        let a = Ulid::new();
        let b = Ulid::new();
        let busy = vec![(a, Span::new(0, 100)), (b, Span::new(200, 300))];
        assert_eq!(first_conflict(&Span::new(250, 260), &busy), Some(b));
        assert_eq!(first_conflict(&Span::new(100, 200), &busy), None);
    }
}
