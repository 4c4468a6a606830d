use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotwise_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotwise_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: appointments and blocks committed.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "slotwise_appointments_booked_total";

/// Counter: proposals rejected because the span was already taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotwise_slot_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotwise_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotwise_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotwise_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotwise_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotwise_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the server runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertService(_) => "upsert_service",
        Command::UpsertClient(_) => "upsert_client",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::SetStatus { .. } => "set_status",
        Command::UpdateSettings(_) => "update_settings",
        Command::DeleteService { .. } => "delete_service",
        Command::DeleteClient { .. } => "delete_client",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectServices => "select_services",
        Command::SelectClients => "select_clients",
        Command::SelectSettings => "select_settings",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectNextAppointment { .. } => "select_next_appointment",
        Command::SelectDeposit { .. } => "select_deposit",
        Command::SelectBookingMessage { .. } => "select_booking_message",
    }
}
