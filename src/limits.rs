use crate::model::{MINUTE_MS, Ms};

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_SERVICES: usize = 1_000;
pub const MAX_CLIENTS: usize = 100_000;
pub const MAX_APPOINTMENTS: usize = 500_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_PHONE_LEN: usize = 40;
pub const MAX_NOTES_LEN: usize = 2_000;

/// No appointment or block may run longer than a day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_DURATION_MS: Ms = MAX_DURATION_MINUTES as Ms * MINUTE_MS;

/// 2000-01-01T00:00 .. 2100-01-01T00:00 on the wall clock.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Largest encoded event a WAL frame may carry. Every validated event is
/// far below this; a bigger length word marks a corrupt tail.
pub const MAX_WAL_FRAME_LEN: usize = 64 * 1024;

/// Rows accepted in one bulk import.
pub const MAX_IMPORT_ROWS: usize = MAX_APPOINTMENTS;
