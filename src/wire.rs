use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SlotwiseAuthSource;
use crate::availability::SlotClass;
use crate::clock;
use crate::engine::{Engine, EngineError};
use crate::message;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct SlotwiseHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotwiseQueryParser>,
}

impl SlotwiseHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotwiseQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, run and meter one statement.
    async fn run(&self, engine: &Engine, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        result
    }
}

fn money(amount: rust_decimal::Decimal) -> String {
    format!("{amount:.2}")
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn rows(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

async fn execute_command(engine: &Engine, cmd: Command) -> PgWireResult<Response> {
    match cmd {
        Command::UpsertService(service) => {
            engine.save_service(service).await.map_err(engine_err)?;
            Ok(inserted())
        }
        Command::UpsertClient(client) => {
            engine.save_client(client).await.map_err(engine_err)?;
            Ok(inserted())
        }
        Command::InsertAppointment(appointment) => {
            engine.book_appointment(appointment).await.map_err(engine_err)?;
            Ok(inserted())
        }
        Command::SetStatus { id, status } => {
            engine.set_status(id, status).await.map_err(engine_err)?;
            Ok(inserted())
        }
        Command::UpdateSettings(patch) => {
            engine
                .modify_settings(|current| patch.apply(current))
                .await
                .map_err(engine_err)?;
            Ok(inserted())
        }
        Command::DeleteService { id } => {
            engine.delete_service(id).await.map_err(engine_err)?;
            Ok(deleted())
        }
        Command::DeleteClient { id } => {
            engine.delete_client(id).await.map_err(engine_err)?;
            Ok(deleted())
        }
        Command::DeleteAppointment { id } => {
            engine.delete_appointment(id).await.map_err(engine_err)?;
            Ok(deleted())
        }
        Command::SelectServices => {
            let schema = Arc::new(services_schema());
            let out = engine
                .list_services()
                .into_iter()
                .map(|s| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&s.id.to_string())?;
                    encoder.encode_field(&s.name)?;
                    encoder.encode_field(&money(s.price))?;
                    encoder.encode_field(&(s.duration_minutes as i32))?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(rows(schema, out))
        }
        Command::SelectClients => {
            let schema = Arc::new(clients_schema());
            let out = engine
                .list_clients()
                .into_iter()
                .map(|c| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&c.id.to_string())?;
                    encoder.encode_field(&c.name)?;
                    encoder.encode_field(&c.phone)?;
                    encoder.encode_field(&c.requires_deposit)?;
                    encoder.encode_field(&c.notes)?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(rows(schema, out))
        }
        Command::SelectSettings => {
            let s = engine.settings().await;
            let schema = Arc::new(settings_schema());
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.business_name)?;
            encoder.encode_field(&s.business_phone)?;
            encoder.encode_field(&(s.calendar.start_hour as i32))?;
            encoder.encode_field(&(s.calendar.end_hour as i32))?;
            encoder.encode_field(&s.deposit.enabled)?;
            encoder.encode_field(&(s.deposit.percentage as i32))?;
            encoder.encode_field(&s.deposit.scope.as_str())?;
            Ok(rows(schema, vec![Ok(encoder.take_row())]))
        }
        Command::SelectFreeSlots { date, service_id, now } => {
            let slots = match now {
                Some(now) => engine.free_slots_at(date, service_id, now).await,
                None => engine.free_slots(date, service_id).await,
            }
            .map_err(engine_err)?;
            let schema = Arc::new(free_slots_schema());
            let out = slots
                .into_iter()
                .map(|start| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&clock::format_time(start))?;
                    encoder.encode_field(&start)?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(rows(schema, out))
        }
        Command::SelectSchedule { date } => {
            let grid = engine.classify(date).await;
            let schema = Arc::new(schedule_schema());
            let out = grid
                .into_iter()
                .filter(|slot| slot.is_visible())
                .map(|slot| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&clock::format_time(slot.at))?;
                    encoder.encode_field(&slot.at)?;
                    match slot.class {
                        SlotClass::AppointmentStart {
                            id,
                            status,
                            duration_minutes,
                            blocked,
                        } => {
                            encoder.encode_field(&if blocked { "block" } else { "appointment" })?;
                            encoder.encode_field(&Some(id.to_string()))?;
                            encoder.encode_field(&Some(status.as_str()))?;
                            encoder.encode_field(&Some(duration_minutes as i32))?;
                        }
                        _ => {
                            encoder.encode_field(&"free")?;
                            encoder.encode_field(&None::<String>)?;
                            encoder.encode_field(&None::<&str>)?;
                            encoder.encode_field(&None::<i32>)?;
                        }
                    }
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(rows(schema, out))
        }
        Command::SelectAppointments { date } => {
            let infos = engine.appointments_on(date).await;
            Ok(appointment_rows(engine, infos))
        }
        Command::SelectNextAppointment { now } => {
            let info = engine.next_appointment(now.unwrap_or_else(clock::now_ms)).await;
            Ok(appointment_rows(engine, info.into_iter().collect()))
        }
        Command::SelectDeposit { service_id, client_id } => {
            let deposit = engine
                .deposit_quote(service_id, client_id)
                .await
                .map_err(engine_err)?;
            let schema = Arc::new(deposit_schema());
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&deposit.is_some())?;
            encoder.encode_field(&deposit.map(|d| money(d.amount)))?;
            encoder.encode_field(&deposit.map(|d| money(d.remaining)))?;
            Ok(rows(schema, vec![Ok(encoder.take_row())]))
        }
        Command::SelectBookingMessage {
            service_id,
            start,
            name,
            phone,
        } => {
            let handoff = engine
                .booking_message(service_id, start, &name, &phone)
                .await
                .map_err(engine_err)?;
            let schema = Arc::new(booking_message_schema());
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&handoff.text)?;
            encoder.encode_field(&handoff.link)?;
            encoder.encode_field(&handoff.deposit.map(|d| money(d.amount)))?;
            Ok(rows(schema, vec![Ok(encoder.take_row())]))
        }
    }
}

/// Appointment rows with display names and, for client bookings, the
/// staff reminder link.
fn appointment_rows(engine: &Engine, infos: Vec<AppointmentInfo>) -> Response {
    let schema = Arc::new(appointments_schema());
    let out = infos
        .into_iter()
        .map(|info| {
            let appt = &info.appointment;
            let client = appt.client_id.and_then(|id| engine.get_client(&id));
            let service_name = appt
                .service_id
                .and_then(|id| engine.get_service(&id))
                .map(|s| s.name);
            let reminder = client
                .as_ref()
                .filter(|c| !message::digits_only(&c.phone).is_empty())
                .map(|c| message::client_link(&c.phone, &message::reminder(&c.name, appt.start)));

            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&appt.id.to_string())?;
            encoder.encode_field(&clock::format_time(info.span.start))?;
            encoder.encode_field(&info.span.start)?;
            encoder.encode_field(&info.span.end)?;
            encoder.encode_field(&appt.status.as_str())?;
            encoder.encode_field(&client.map(|c| c.name))?;
            encoder.encode_field(&service_name)?;
            encoder.encode_field(&appt.notes)?;
            encoder.encode_field(&reminder)?;
            Ok(encoder.take_row())
        })
        .collect();
    rows(schema, out)
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("price", Type::VARCHAR),
        field("duration_minutes", Type::INT4),
    ]
}

fn clients_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("requires_deposit", Type::BOOL),
        field("notes", Type::VARCHAR),
    ]
}

fn settings_schema() -> Vec<FieldInfo> {
    vec![
        field("business_name", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("start_hour", Type::INT4),
        field("end_hour", Type::INT4),
        field("deposit_enabled", Type::BOOL),
        field("deposit_percentage", Type::INT4),
        field("deposit_scope", Type::VARCHAR),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![field("time", Type::VARCHAR), field("start", Type::INT8)]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("time", Type::VARCHAR),
        field("start", Type::INT8),
        field("kind", Type::VARCHAR),
        field("appointment_id", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("duration_minutes", Type::INT4),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("time", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("client_name", Type::VARCHAR),
        field("service_name", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("reminder_link", Type::VARCHAR),
    ]
}

fn deposit_schema() -> Vec<FieldInfo> {
    vec![
        field("required", Type::BOOL),
        field("amount", Type::VARCHAR),
        field("remaining", Type::VARCHAR),
    ]
}

fn booking_message_schema() -> Vec<FieldInfo> {
    vec![
        field("text", Type::VARCHAR),
        field("link", Type::VARCHAR),
        field("deposit_amount", Type::VARCHAR),
    ]
}

/// Row shape of a statement, judged from the table after `FROM`. Only
/// SELECTs return rows.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let lower = stmt.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == '"' || c == ';'))
        .unwrap_or_default();
    match table {
        "services" => services_schema(),
        "clients" => clients_schema(),
        "settings" => settings_schema(),
        "free_slots" => free_slots_schema(),
        "schedule" => schedule_schema(),
        "appointments" | "next_appointment" => appointments_schema(),
        "deposit" => deposit_schema(),
        "booking_message" => booking_message_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotwiseHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotwiseQueryParser;

#[async_trait]
impl QueryParser for SlotwiseQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotwiseHandler {
    type Statement = String;
    type QueryParser = SlotwiseQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over the statement text. Bound values are
/// emitted as quoted literals and never rescanned, and `$` inside a
/// literal of the statement itself is left alone.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        let index = sql[digits_start..digits_end].parse::<usize>().ok();
        match index.and_then(|n| n.checked_sub(1)).and_then(|n| params.get(n)) {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[i..digits_end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotwiseFactory {
    handler: Arc<SlotwiseHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SlotwiseAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotwiseFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotwiseAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotwiseHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotwiseFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SlotwiseFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Overlaps surface as exclusion violations, the way a Postgres EXCLUDE
/// constraint reports them.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotTaken(_) => "23P01",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
