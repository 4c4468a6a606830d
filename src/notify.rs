use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::clock;
use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-day broadcast of calendar changes, so an open schedule view can
/// refresh its snapshot when someone else books into it.
pub struct DayHub {
    channels: DashMap<NaiveDate, broadcast::Sender<Event>>,
}

impl Default for DayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DayHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        self.channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Route an event to the day it touches. Catalog and settings events
    /// touch no day and go nowhere.
    pub fn send(&self, event: &Event) {
        let Some(date) = event.calendar_instant().and_then(clock::date_of) else {
            return;
        };
        let mut idle = false;
        if let Some(sender) = self.channels.get(&date) {
            idle = sender.send(event.clone()).is_err();
        }
        if idle {
            self.channels.remove_if(&date, |_, s| s.receiver_count() == 0);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
