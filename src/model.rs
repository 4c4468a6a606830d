use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Wall-clock milliseconds of the business's local time, counted from
/// 1970-01-01T00:00 on that clock. See `clock` for conversions.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Grid cadence shared by the staff grid and the public booking flow.
pub const SLOT_MINUTES: u32 = 30;

/// Duration used when an appointment has no resolvable length.
pub const FALLBACK_DURATION_MINUTES: u32 = 60;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + minutes as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open overlap. Touching spans do not overlap. A zero-length span
    /// overlaps a span that strictly contains its instant, never itself.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `t` lies strictly inside the span (not on its start).
    pub fn strictly_contains(&self, t: Ms) -> bool {
        self.start < t && t < self.end
    }
}

// ── Settings ─────────────────────────────────────────────────────

/// Daily opening window. `start_hour >= end_hour` is tolerated and yields
/// no slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessCalendarConfig {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl BusinessCalendarConfig {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour }
    }

    pub fn is_open(&self) -> bool {
        self.start_hour < self.end_hour
    }

    pub fn slot_minutes(&self) -> u32 {
        SLOT_MINUTES
    }
}

impl Default for BusinessCalendarConfig {
    fn default() -> Self {
        Self::new(8, 19)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositScope {
    /// Every booking.
    All,
    /// First-time clients. Without visit history this behaves like `All`.
    New,
    /// Only clients flagged `requires_deposit`.
    Specific,
}

impl DepositScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositScope::All => "ALL",
            DepositScope::New => "NEW",
            DepositScope::Specific => "SPECIFIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ALL" => Some(DepositScope::All),
            "NEW" => Some(DepositScope::New),
            "SPECIFIC" => Some(DepositScope::Specific),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositConfig {
    pub enabled: bool,
    /// 0..=100
    pub percentage: u32,
    pub scope: DepositScope,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: 30,
            scope: DepositScope::All,
        }
    }
}

/// Owner profile: everything the engine reads besides the catalog and the
/// calendar itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub business_name: String,
    pub business_phone: Option<String>,
    pub calendar: BusinessCalendarConfig,
    pub deposit: DepositConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            business_name: "Meu Negócio".into(),
            business_phone: None,
            calendar: BusinessCalendarConfig::default(),
            deposit: DepositConfig::default(),
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub phone: String,
    pub notes: Option<String>,
    pub requires_deposit: bool,
}

// ── Calendar ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Blocked,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(AppointmentStatus::Pending),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "BLOCKED" => Some(AppointmentStatus::Blocked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Statuses a record may be created with.
    pub fn is_initial(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::Blocked
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, next) {
            (Pending, Confirmed | Completed | Cancelled) => true,
            (Confirmed, Pending | Completed | Cancelled) => true,
            (Blocked, Cancelled) => true,
            _ => false,
        }
    }
}

/// An appointment or a block. Blocks carry no client/service and size
/// themselves with `custom_duration_minutes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub start: Ms,
    pub status: AppointmentStatus,
    pub custom_duration_minutes: Option<u32>,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn is_blocked(&self) -> bool {
        self.status == AppointmentStatus::Blocked
    }

    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

/// Ordered set of appointments for one calendar owner, sorted by `start`.
#[derive(Debug, Clone, Default)]
pub struct CalendarState {
    pub appointments: Vec<Appointment>,
}

impl CalendarState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start <= appointment.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn get(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    /// Appointments starting before `before`. Everything at or after it
    /// cannot overlap a window ending there.
    pub fn starting_before(&self, before: Ms) -> &[Appointment] {
        let right_bound = self.appointments.partition_point(|a| a.start < before);
        &self.appointments[..right_bound]
    }

    /// Appointments with `from <= start < before`.
    pub fn starting_between(&self, from: Ms, before: Ms) -> &[Appointment] {
        let left = self.appointments.partition_point(|a| a.start < from);
        let right = self.appointments.partition_point(|a| a.start < before).max(left);
        &self.appointments[left..right]
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceSaved { service: Service },
    ServiceDeleted { id: Ulid },
    ClientSaved { client: Client },
    ClientDeleted { id: Ulid },
    SettingsUpdated { settings: Settings },
    AppointmentBooked { appointment: Appointment },
    AppointmentStatusChanged { id: Ulid, start: Ms, status: AppointmentStatus },
    AppointmentDeleted { id: Ulid, start: Ms },
}

impl Event {
    /// Calendar instant the event touches, if any. Used to route
    /// notifications to per-day subscribers.
    pub fn calendar_instant(&self) -> Option<Ms> {
        match self {
            Event::AppointmentBooked { appointment } => Some(appointment.start),
            Event::AppointmentStatusChanged { start, .. } | Event::AppointmentDeleted { start, .. } => {
                Some(*start)
            }
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// An appointment with its resolved effective span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub appointment: Appointment,
    pub span: Span,
}
