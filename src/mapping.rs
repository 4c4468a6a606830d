//! Store boundary: rows exactly as the hosted database exports them
//! (snake_case columns, UUID ids, UTC timestamps) and their conversion to
//! domain entities. Nothing past this module sees a row type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use ulid::Ulid;

use crate::clock;
use crate::model::*;

#[derive(Debug)]
pub enum MappingError {
    Json(serde_json::Error),
    BadId(String),
    BadTimestamp(String),
    BadPrice(String),
    UnknownStatus(String),
    UnknownScope(String),
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::Json(e) => write!(f, "malformed export: {e}"),
            MappingError::BadId(s) => write!(f, "not a UUID or ULID: {s:?}"),
            MappingError::BadTimestamp(s) => write!(f, "unparseable timestamp: {s:?}"),
            MappingError::BadPrice(s) => write!(f, "unparseable price: {s}"),
            MappingError::UnknownStatus(s) => write!(f, "unknown appointment status: {s:?}"),
            MappingError::UnknownScope(s) => write!(f, "unknown deposit scope: {s:?}"),
        }
    }
}

impl std::error::Error for MappingError {}

impl From<serde_json::Error> for MappingError {
    fn from(e: serde_json::Error) -> Self {
        MappingError::Json(e)
    }
}

// ── Rows ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ProfileRow {
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub start_hour: Option<u32>,
    pub end_hour: Option<u32>,
    pub deposit_enabled: Option<bool>,
    pub deposit_percentage: Option<u32>,
    pub deposit_scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub price: Value,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ClientRow {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub requires_deposit: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentRow {
    pub id: String,
    pub client_id: Option<String>,
    pub service_id: Option<String>,
    pub custom_duration: Option<u32>,
    pub date: String,
    pub status: String,
    pub notes: Option<String>,
}

/// One owner's tables as exported from the hosted store.
#[derive(Debug, Default, Deserialize)]
pub struct StoreExport {
    #[serde(default)]
    pub profile: Option<ProfileRow>,
    #[serde(default)]
    pub services: Vec<ServiceRow>,
    #[serde(default)]
    pub clients: Vec<ClientRow>,
    #[serde(default)]
    pub appointments: Vec<AppointmentRow>,
}

/// Domain-shaped result of a mapped export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainSnapshot {
    pub settings: Settings,
    pub services: Vec<Service>,
    pub clients: Vec<Client>,
    pub appointments: Vec<Appointment>,
}

// ── Conversion ───────────────────────────────────────────────────

/// Zero and blank values count as missing, like the hosted app's
/// `value || default` reads.
fn nonzero(v: Option<u32>) -> Option<u32> {
    v.filter(|n| *n != 0)
}

fn nonblank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// Accepts canonical ULIDs and hyphenated or bare UUIDs. A UUID maps onto
/// the ULID with the same 128 bits.
pub fn parse_id(s: &str) -> Result<Ulid, MappingError> {
    let s = s.trim();
    if s.len() == 26
        && let Ok(id) = Ulid::from_string(s)
    {
        return Ok(id);
    }
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return Err(MappingError::BadId(s.to_string()));
    }
    u128::from_str_radix(&hex, 16)
        .map(Ulid::from)
        .map_err(|_| MappingError::BadId(s.to_string()))
}

fn parse_optional_id(s: Option<String>) -> Result<Option<Ulid>, MappingError> {
    match nonblank(s) {
        Some(s) => parse_id(&s).map(Some),
        None => Ok(None),
    }
}

fn parse_price(v: &Value) -> Result<Decimal, MappingError> {
    let parsed = match v {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Null => Some(Decimal::ZERO),
        _ => None,
    };
    parsed.ok_or_else(|| MappingError::BadPrice(v.to_string()))
}

/// RFC 3339 instants are moved onto the business wall clock in `tz`;
/// zone-less timestamps are taken as already local.
fn parse_instant<Tz: TimeZone>(s: &str, tz: &Tz) -> Result<Ms, MappingError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(s.trim()) {
        return Ok(clock::wall_clock_in(&instant, tz));
    }
    clock::parse_datetime(s).ok_or_else(|| MappingError::BadTimestamp(s.to_string()))
}

impl ProfileRow {
    pub fn into_settings(self) -> Result<Settings, MappingError> {
        let defaults = Settings::default();
        let scope = match nonblank(self.deposit_scope) {
            Some(s) => DepositScope::parse(&s).ok_or(MappingError::UnknownScope(s))?,
            None => defaults.deposit.scope,
        };
        Ok(Settings {
            business_name: nonblank(self.business_name).unwrap_or(defaults.business_name),
            business_phone: nonblank(self.phone),
            calendar: BusinessCalendarConfig::new(
                nonzero(self.start_hour).unwrap_or(defaults.calendar.start_hour),
                nonzero(self.end_hour).unwrap_or(defaults.calendar.end_hour),
            ),
            deposit: DepositConfig {
                enabled: self.deposit_enabled.unwrap_or(false),
                percentage: nonzero(self.deposit_percentage).unwrap_or(defaults.deposit.percentage),
                scope,
            },
        })
    }
}

impl TryFrom<ServiceRow> for Service {
    type Error = MappingError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(Service {
            id: parse_id(&row.id)?,
            price: parse_price(&row.price)?,
            name: row.name,
            duration_minutes: nonzero(row.duration_minutes).unwrap_or(FALLBACK_DURATION_MINUTES),
        })
    }
}

impl TryFrom<ClientRow> for Client {
    type Error = MappingError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        Ok(Client {
            id: parse_id(&row.id)?,
            name: row.name,
            phone: row.phone.unwrap_or_default(),
            notes: nonblank(row.notes),
            requires_deposit: row.requires_deposit.unwrap_or(false),
        })
    }
}

impl AppointmentRow {
    pub fn into_appointment<Tz: TimeZone>(self, tz: &Tz) -> Result<Appointment, MappingError> {
        let status =
            AppointmentStatus::parse(&self.status).ok_or(MappingError::UnknownStatus(self.status.clone()))?;
        Ok(Appointment {
            id: parse_id(&self.id)?,
            client_id: parse_optional_id(self.client_id)?,
            service_id: parse_optional_id(self.service_id)?,
            start: parse_instant(&self.date, tz)?,
            status,
            custom_duration_minutes: nonzero(self.custom_duration),
            notes: nonblank(self.notes),
        })
    }
}

impl StoreExport {
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert every row. The first bad row aborts the whole mapping.
    pub fn into_domain<Tz: TimeZone>(self, tz: &Tz) -> Result<DomainSnapshot, MappingError> {
        let settings = self.profile.unwrap_or_default().into_settings()?;
        let services = self
            .services
            .into_iter()
            .map(Service::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let clients = self
            .clients
            .into_iter()
            .map(Client::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let mut appointments = self
            .appointments
            .into_iter()
            .map(|row| row.into_appointment(tz))
            .collect::<Result<Vec<_>, _>>()?;
        appointments.sort_by_key(|a| a.start);
        Ok(DomainSnapshot {
            settings,
            services,
            clients,
            appointments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, Utc};

    const EXPORT: &str = r##"{
        "profile": {
            "business_name": "Studio Bela",
            "phone": "(11) 97777-0000",
            "start_hour": 9,
            "end_hour": 0,
            "deposit_enabled": true,
            "deposit_percentage": 0,
            "deposit_scope": "SPECIFIC"
        },
        "services": [
            {"id": "550e8400-e29b-41d4-a716-446655440000", "name": "Escova", "price": 45.9, "duration_minutes": 45, "color": "#fff"}
        ],
        "clients": [
            {"id": "01HZY4Q3Z8W9X0V1T2S3R4P5N6", "name": "Ana", "phone": "11988887777", "requires_deposit": true, "avatar_url": ""}
        ],
        "appointments": [
            {"id": "6ba7b810-9dad-11d1-80b4-00c04fd430c8", "client_id": "01HZY4Q3Z8W9X0V1T2S3R4P5N6",
             "service_id": "550e8400-e29b-41d4-a716-446655440000", "custom_duration": null,
             "date": "2026-10-17T13:00:00+00:00", "status": "CONFIRMED", "notes": "", "user_id": "x"},
            {"id": "6ba7b811-9dad-11d1-80b4-00c04fd430c8", "client_id": null, "service_id": null,
             "custom_duration": 90, "date": "2026-10-17T11:00:00Z", "status": "BLOCKED", "notes": "Almoço"}
        ]
    }"##;

    fn sao_paulo() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    #[test]
    fn maps_full_export_with_fallbacks() {
        let snap = StoreExport::from_json(EXPORT).unwrap().into_domain(&sao_paulo()).unwrap();

        assert_eq!(snap.settings.business_name, "Studio Bela");
        assert_eq!(snap.settings.calendar, BusinessCalendarConfig::new(9, 19));
        assert_eq!(snap.settings.deposit.percentage, 30);
        assert_eq!(snap.settings.deposit.scope, DepositScope::Specific);
        assert!(snap.settings.deposit.enabled);

        assert_eq!(snap.services[0].price, Decimal::from_str("45.9").unwrap());
        assert_eq!(snap.services[0].duration_minutes, 45);
        assert!(snap.clients[0].requires_deposit);

        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        // Sorted by start: the 08:00 block comes first.
        assert_eq!(snap.appointments[0].status, AppointmentStatus::Blocked);
        assert_eq!(snap.appointments[0].start, clock::at_hour(date, 8));
        assert_eq!(snap.appointments[0].custom_duration_minutes, Some(90));
        assert_eq!(snap.appointments[1].start, clock::at_hour(date, 10));
        assert_eq!(snap.appointments[1].service_id, Some(snap.services[0].id));
        assert_eq!(snap.appointments[1].client_id, Some(snap.clients[0].id));
        assert_eq!(snap.appointments[1].notes, None);
    }

    #[test]
    fn empty_profile_uses_defaults() {
        let snap = StoreExport::from_json("{}").unwrap().into_domain(&Utc).unwrap();
        assert_eq!(snap.settings, Settings::default());
        assert!(snap.appointments.is_empty());
    }

    #[test]
    fn uuid_and_ulid_ids() {
        let from_uuid = parse_id("00000000-0000-0000-0000-00000000002a").unwrap();
        assert_eq!(u128::from(from_uuid), 42);
        let ulid = Ulid::new();
        assert_eq!(parse_id(&ulid.to_string()).unwrap(), ulid);
        assert!(matches!(parse_id("not-an-id"), Err(MappingError::BadId(_))));
    }

    #[test]
    fn unknown_status_is_an_error() {
        let json = r#"{"appointments": [{"id": "01HZY4Q3Z8W9X0V1T2S3R4P5N6", "date": "2026-10-17 09:00", "status": "NO_SHOW"}]}"#;
        let err = StoreExport::from_json(json).unwrap().into_domain(&Utc).unwrap_err();
        assert!(matches!(err, MappingError::UnknownStatus(s) if s == "NO_SHOW"));
    }

    #[test]
    fn zone_less_timestamps_are_local() {
        let json = r#"{"appointments": [{"id": "01HZY4Q3Z8W9X0V1T2S3R4P5N6", "date": "2026-10-17 09:00", "status": "pending"}]}"#;
        let snap = StoreExport::from_json(json).unwrap().into_domain(&sao_paulo()).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(snap.appointments[0].start, clock::at_hour(date, 9));
        assert_eq!(snap.appointments[0].status, AppointmentStatus::Pending);
    }

    #[test]
    fn string_prices_are_accepted() {
        let row = ServiceRow {
            id: Ulid::new().to_string(),
            name: "Gel".into(),
            price: Value::String("120.00".into()),
            duration_minutes: None,
        };
        let svc = Service::try_from(row).unwrap();
        assert_eq!(svc.price, Decimal::from(120));
        assert_eq!(svc.duration_minutes, FALLBACK_DURATION_MINUTES);
    }
}
