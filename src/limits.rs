use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single reservation may not run longer than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 86_400_000;
/// Availability queries cover at most one year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 86_400_000;

pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;
pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 100;
pub const MAX_EQUIPMENT_LEN: usize = 255;

/// Longest request line accepted on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;
