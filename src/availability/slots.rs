use chrono::NaiveDate;

use crate::clock;
use crate::model::*;

/// Candidate start instants for one day: `date@start_hour:00`, then every
/// `SLOT_MINUTES`, stopping before `date@end_hour:00`.
///
/// Cloning restarts the sequence from wherever the clone was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGenerator {
    next: Ms,
    end: Ms,
    step: Ms,
}

impl SlotGenerator {
    pub fn new(date: NaiveDate, config: &BusinessCalendarConfig) -> Self {
        let step = config.slot_minutes() as Ms * MINUTE_MS;
        let end_hour = config.end_hour.min(24);
        if config.start_hour >= end_hour {
            let origin = clock::day_start(date);
            return Self { next: origin, end: origin, step };
        }
        Self {
            next: clock::at_hour(date, config.start_hour),
            end: clock::at_hour(date, end_hour),
            step,
        }
    }

    /// Opening instant through closing instant (exclusive).
    pub fn window(&self) -> Span {
        Span::new(self.next, self.end)
    }
}

impl Iterator for SlotGenerator {
    type Item = Ms;

    fn next(&mut self) -> Option<Ms> {
        if self.next >= self.end {
            return None;
        }
        let candidate = self.next;
        self.next += self.step;
        Some(candidate)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.next >= self.end {
            0
        } else {
            ((self.end - self.next + self.step - 1) / self.step) as usize
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SlotGenerator {}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
    }

    #[test]
    fn closing_hour_is_exclusive() {
        let slots: Vec<Ms> = SlotGenerator::new(epoch(), &BusinessCalendarConfig::new(9, 11)).collect();
        assert_eq!(slots, vec![9 * H, 9 * H + 30 * M, 10 * H, 10 * H + 30 * M]);
    }

    #[test]
    fn size_hint_matches_count() {
        let generator = SlotGenerator::new(epoch(), &BusinessCalendarConfig::new(8, 19));
        assert_eq!(generator.len(), 22);
        assert_eq!(generator.count(), 22);
    }

    #[test]
    fn clone_restarts() {
        let mut generator = SlotGenerator::new(epoch(), &BusinessCalendarConfig::new(9, 10));
        let snapshot = generator.clone();
        assert_eq!(generator.next(), Some(9 * H));
        assert_eq!(generator.next(), Some(9 * H + 30 * M));
        assert_eq!(generator.next(), None);
        assert_eq!(snapshot.collect::<Vec<_>>().len(), 2);
    }

    #[test]
    fn misconfigured_hours_yield_nothing() {
        assert_eq!(SlotGenerator::new(epoch(), &BusinessCalendarConfig::new(10, 9)).count(), 0);
        assert_eq!(SlotGenerator::new(epoch(), &BusinessCalendarConfig::new(9, 9)).count(), 0);
    }

    #[test]
    fn end_hour_past_midnight_is_clamped() {
        let slots: Vec<Ms> = SlotGenerator::new(epoch(), &BusinessCalendarConfig::new(23, 30)).collect();
        assert_eq!(slots, vec![23 * H, 23 * H + 30 * M]);
    }

    #[test]
    fn later_dates_are_offset_by_whole_days() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 3).unwrap();
        let first = SlotGenerator::new(date, &BusinessCalendarConfig::new(9, 12)).next();
        assert_eq!(first, Some(2 * DAY_MS + 9 * H));
    }
}
