use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{SlotGenerator, Snapshot};

/// How the staff grid treats one candidate slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClass {
    /// An appointment (or block) begins exactly here: render its card.
    AppointmentStart {
        id: Ulid,
        status: AppointmentStatus,
        duration_minutes: u32,
        blocked: bool,
    },
    /// Strictly inside an earlier appointment. Already represented by that
    /// appointment's card; renderers must skip it.
    Continuation { id: Ulid },
    /// Nothing here: offer it for booking.
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSlot {
    pub at: Ms,
    pub class: SlotClass,
}

impl GridSlot {
    pub fn is_visible(&self) -> bool {
        !matches!(self.class, SlotClass::Continuation { .. })
    }
}

/// Classify every candidate slot of `date` for the staff grid.
///
/// A start wins over a continuation; with the non-overlap invariant upheld
/// both cannot apply to the same slot, and when it is violated the record
/// starting here stays visible instead of being swallowed.
pub fn classify(date: NaiveDate, snapshot: &Snapshot<'_>) -> Vec<GridSlot> {
    let slots = SlotGenerator::new(date, snapshot.config());
    let window = slots.window();
    if window.duration_ms() == 0 {
        return Vec::new();
    }

    let active: Vec<(&Appointment, Span)> = snapshot
        .active_spans()
        .filter(|(_, span)| span.overlaps(&window))
        .collect();

    slots
        .map(|at| {
            let class = if let Some((appt, span)) = active.iter().find(|(a, _)| a.start == at) {
                SlotClass::AppointmentStart {
                    id: appt.id,
                    status: appt.status,
                    duration_minutes: (span.duration_ms() / MINUTE_MS) as u32,
                    blocked: appt.is_blocked(),
                }
            } else if let Some((appt, _)) = active.iter().find(|(_, span)| span.strictly_contains(at)) {
                SlotClass::Continuation { id: appt.id }
            } else {
                SlotClass::Free
            };
            GridSlot { at, class }
        })
        .collect()
}
