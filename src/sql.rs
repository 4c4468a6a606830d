use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::clock;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertService(Service),
    UpsertClient(Client),
    InsertAppointment(Appointment),
    SetStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    UpdateSettings(SettingsPatch),
    DeleteService {
        id: Ulid,
    },
    DeleteClient {
        id: Ulid,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectServices,
    SelectClients,
    SelectSettings,
    SelectFreeSlots {
        date: NaiveDate,
        service_id: Ulid,
        /// Overrides the host clock when filtering past slots.
        now: Option<Ms>,
    },
    SelectSchedule {
        date: NaiveDate,
    },
    SelectAppointments {
        date: NaiveDate,
    },
    SelectNextAppointment {
        now: Option<Ms>,
    },
    SelectDeposit {
        service_id: Ulid,
        client_id: Option<Ulid>,
    },
    SelectBookingMessage {
        service_id: Ulid,
        start: Ms,
        name: String,
        phone: String,
    },
}

/// Partial profile update; absent columns keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub business_name: Option<String>,
    /// `Some(None)` clears the phone.
    pub phone: Option<Option<String>>,
    pub start_hour: Option<u32>,
    pub end_hour: Option<u32>,
    pub deposit_enabled: Option<bool>,
    pub deposit_percentage: Option<u32>,
    pub deposit_scope: Option<DepositScope>,
}

impl SettingsPatch {
    pub fn apply(self, mut settings: Settings) -> Settings {
        if let Some(name) = self.business_name {
            settings.business_name = name;
        }
        if let Some(phone) = self.phone {
            settings.business_phone = phone;
        }
        if let Some(h) = self.start_hour {
            settings.calendar.start_hour = h;
        }
        if let Some(h) = self.end_hour {
            settings.calendar.end_hour = h;
        }
        if let Some(enabled) = self.deposit_enabled {
            settings.deposit.enabled = enabled;
        }
        if let Some(pct) = self.deposit_percentage {
            settings.deposit.percentage = pct;
        }
        if let Some(scope) = self.deposit_scope {
            settings.deposit.scope = scope;
        }
        settings
    }
}

const SERVICE_COLUMNS: &[&str] = &["id", "name", "price", "duration_minutes"];
const CLIENT_COLUMNS: &[&str] = &["id", "name", "phone", "requires_deposit", "notes"];
const APPOINTMENT_COLUMNS: &[&str] = &[
    "id",
    "client_id",
    "service_id",
    "start",
    "status",
    "custom_duration",
    "notes",
];
const STATUS_COLUMNS: &[&str] = &["id", "status"];
const SETTINGS_COLUMNS: &[&str] = &[
    "business_name",
    "phone",
    "start_hour",
    "end_hour",
    "deposit_enabled",
    "deposit_percentage",
    "deposit_scope",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "services" => {
            let row = insert_row(insert, values, "services", SERVICE_COLUMNS)?;
            Ok(Command::UpsertService(Service {
                id: parse_id(row.required("id")?)?,
                name: parse_text(row.required("name")?)?,
                price: parse_decimal(row.required("price")?)?,
                duration_minutes: parse_u32(row.required("duration_minutes")?)?,
            }))
        }
        "clients" => {
            let row = insert_row(insert, values, "clients", CLIENT_COLUMNS)?;
            Ok(Command::UpsertClient(Client {
                id: parse_id(row.required("id")?)?,
                name: parse_text(row.required("name")?)?,
                phone: row.optional("phone").map(parse_text).transpose()?.unwrap_or_default(),
                notes: row.optional("notes").map(parse_text).transpose()?,
                requires_deposit: row
                    .optional("requires_deposit")
                    .map(parse_bool)
                    .transpose()?
                    .unwrap_or(false),
            }))
        }
        "appointments" => {
            let row = insert_row(insert, values, "appointments", APPOINTMENT_COLUMNS)?;
            Ok(Command::InsertAppointment(Appointment {
                id: parse_id(row.required("id")?)?,
                client_id: row.optional("client_id").map(parse_id).transpose()?,
                service_id: row.optional("service_id").map(parse_id).transpose()?,
                start: parse_instant(row.required("start")?)?,
                status: row
                    .optional("status")
                    .map(parse_status)
                    .transpose()?
                    .unwrap_or(AppointmentStatus::Pending),
                custom_duration_minutes: row.optional("custom_duration").map(parse_u32).transpose()?,
                notes: row.optional("notes").map(parse_text).transpose()?,
            }))
        }
        "appointment_status" => {
            let row = insert_row(insert, values, "appointment_status", STATUS_COLUMNS)?;
            Ok(Command::SetStatus {
                id: parse_id(row.required("id")?)?,
                status: parse_status(row.required("status")?)?,
            })
        }
        "settings" => {
            let row = insert_row(insert, values, "settings", SETTINGS_COLUMNS)?;
            Ok(Command::UpdateSettings(SettingsPatch {
                business_name: row.optional("business_name").map(parse_text).transpose()?,
                phone: match row.get("phone") {
                    None => None,
                    Some(e) if is_null(e) => Some(None),
                    Some(e) => Some(Some(parse_text(e)?)),
                },
                start_hour: row.optional("start_hour").map(parse_u32).transpose()?,
                end_hour: row.optional("end_hour").map(parse_u32).transpose()?,
                deposit_enabled: row.optional("deposit_enabled").map(parse_bool).transpose()?,
                deposit_percentage: row.optional("deposit_percentage").map(parse_u32).transpose()?,
                deposit_scope: row.optional("deposit_scope").map(parse_scope).transpose()?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "services" => Ok(Command::DeleteService { id }),
        "clients" => Ok(Command::DeleteClient { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Fields {
        table: "filter",
        cells: Vec::new(),
    };
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }
    let date = |f: &Fields<'_>| -> Result<NaiveDate, SqlError> {
        f.optional("date")
            .ok_or(SqlError::MissingFilter("date"))
            .and_then(parse_date)
    };
    let now = |f: &Fields<'_>| f.optional("now").map(parse_instant).transpose();

    match table.as_str() {
        "services" => Ok(Command::SelectServices),
        "clients" => Ok(Command::SelectClients),
        "settings" => Ok(Command::SelectSettings),
        "free_slots" => Ok(Command::SelectFreeSlots {
            date: date(&filters)?,
            service_id: filters.filter("service_id").and_then(parse_id)?,
            now: now(&filters)?,
        }),
        "schedule" => Ok(Command::SelectSchedule { date: date(&filters)? }),
        "appointments" => Ok(Command::SelectAppointments { date: date(&filters)? }),
        "next_appointment" => Ok(Command::SelectNextAppointment { now: now(&filters)? }),
        "deposit" => Ok(Command::SelectDeposit {
            service_id: filters.filter("service_id").and_then(parse_id)?,
            client_id: filters.optional("client_id").map(parse_id).transpose()?,
        }),
        "booking_message" => Ok(Command::SelectBookingMessage {
            service_id: filters.filter("service_id").and_then(parse_id)?,
            start: filters.filter("start").and_then(parse_instant)?,
            name: filters.filter("name").and_then(parse_text)?,
            phone: filters.filter("phone").and_then(parse_text)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `column = value` conjuncts. Other predicates are ignored.
fn extract_filters<'a>(expr: &'a Expr, filters: &mut Fields<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    filters.cells.push((col, right.as_ref()));
                }
            }
            _ => {}
        },
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => {}
    }
    Ok(())
}

// ── Rows and filters ──────────────────────────────────────────

/// Named cells of one VALUES row or one WHERE clause.
struct Fields<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.cells.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    /// Present and not NULL.
    fn optional(&self, col: &str) -> Option<&'a Expr> {
        self.get(col).filter(|e| !is_null(e))
    }

    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.optional(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn filter(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.optional(col).ok_or(SqlError::MissingFilter(col))
    }
}

/// Pair VALUES with the statement's column list, or with the table's
/// default column order when none is given.
fn insert_row<'a>(
    insert: &ast::Insert,
    values: &'a [Expr],
    table: &'static str,
    default_columns: &[&str],
) -> Result<Fields<'a>, SqlError> {
    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() > default_columns.len() {
            return Err(SqlError::WrongArity(table, default_columns.len(), values.len()));
        }
        default_columns[..values.len()].iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !default_columns.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }
    Ok(Fields {
        table,
        cells: columns.into_iter().zip(values.iter()).collect(),
    })
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_id(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// String or bare number, as text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// ULID, or a UUID as exported by the hosted store.
fn parse_id(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    crate::mapping::parse_id(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal(expr)?);
    }
    let s = parse_text(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad decimal {s}: {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Wall-clock ms, or `'YYYY-MM-DD HH:MM[:SS]'`.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Ok(ms) = parse_i64(expr) {
        return Ok(ms);
    }
    let s = parse_text(expr)?;
    clock::parse_datetime(&s).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    clock::parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date: {s}")))
}

fn parse_status(expr: &Expr) -> Result<AppointmentStatus, SqlError> {
    let s = parse_text(expr)?;
    AppointmentStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))
}

fn parse_scope(expr: &Expr) -> Result<DepositScope, SqlError> {
    let s = parse_text(expr)?;
    DepositScope::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown deposit scope: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing value for {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
