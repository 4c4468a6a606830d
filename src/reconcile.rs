//! Optimistic list for callers that render a record before the store has
//! accepted it.
//!
//! `begin` shows the record immediately under a correlation id; the
//! durable id replaces it on `confirm`, and `fail` takes it back out. No
//! record is ever left tentative once its commit has resolved.

use std::fmt;
use std::future::Future;

use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordId {
    Tentative(CorrelationId),
    Durable(Ulid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub id: RecordId,
    pub value: T,
}

impl<T> Entry<T> {
    pub fn in_flight(&self) -> bool {
        matches!(self.id, RecordId::Tentative(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    UnknownCorrelation(CorrelationId),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::UnknownCorrelation(c) => write!(f, "no in-flight record for {c}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

#[derive(Debug)]
pub struct OptimisticList<T> {
    entries: Vec<Entry<T>>,
    next_correlation: u64,
}

impl<T> Default for OptimisticList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_correlation: 0,
        }
    }
}

impl<T> OptimisticList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_durable(items: impl IntoIterator<Item = (Ulid, T)>) -> Self {
        Self {
            entries: items
                .into_iter()
                .map(|(id, value)| Entry {
                    id: RecordId::Durable(id),
                    value,
                })
                .collect(),
            next_correlation: 0,
        }
    }

    pub fn entries(&self) -> &[Entry<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Ulid) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| e.id == RecordId::Durable(id))
            .map(|e| &e.value)
    }

    pub fn in_flight(&self) -> usize {
        self.entries.iter().filter(|e| e.in_flight()).count()
    }

    /// Show `value` right away as a tentative record.
    pub fn begin(&mut self, value: T) -> CorrelationId {
        let correlation = CorrelationId(self.next_correlation);
        self.next_correlation += 1;
        self.entries.push(Entry {
            id: RecordId::Tentative(correlation),
            value,
        });
        correlation
    }

    /// The store accepted the record: swap in its durable id.
    pub fn confirm(&mut self, correlation: CorrelationId, durable: Ulid) -> Result<(), ReconcileError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == RecordId::Tentative(correlation))
            .ok_or(ReconcileError::UnknownCorrelation(correlation))?;
        entry.id = RecordId::Durable(durable);
        Ok(())
    }

    /// The store rejected the record: roll it back.
    pub fn fail(&mut self, correlation: CorrelationId) -> Result<T, ReconcileError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id == RecordId::Tentative(correlation))
            .ok_or(ReconcileError::UnknownCorrelation(correlation))?;
        Ok(self.entries.remove(pos).value)
    }

    /// Run the whole begin / commit / confirm-or-fail cycle. The commit
    /// error is handed back untouched after the rollback.
    pub async fn insert_with<F, Fut, E>(&mut self, value: T, commit: F) -> Result<Ulid, E>
    where
        T: Clone,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<Ulid, E>>,
    {
        let correlation = self.begin(value.clone());
        match commit(value).await {
            Ok(durable) => {
                if let Err(e) = self.confirm(correlation, durable) {
                    tracing::warn!("optimistic confirm lost its record: {e}");
                }
                Ok(durable)
            }
            Err(e) => {
                if let Err(lost) = self.fail(correlation) {
                    tracing::warn!("optimistic rollback lost its record: {lost}");
                }
                Err(e)
            }
        }
    }
}
