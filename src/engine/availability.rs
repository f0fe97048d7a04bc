use chrono::NaiveDate;
use serde::Serialize;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::Engine;

/// Inclusive calendar range `[start, end]`, both dates in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("invalid {field} date {value:?}, expected YYYY-MM-DD")]
    Malformed { field: &'static str, value: String },
    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("date range too wide")]
    TooWide,
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, RangeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| RangeError::Malformed {
        field,
        value: value.to_string(),
    })
}

fn midnight_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        let range = Self { start, end };
        if range.window().duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(RangeError::TooWide);
        }
        Ok(range)
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, RangeError> {
        Self::new(parse_date("start", start)?, parse_date("end", end)?)
    }

    /// `[start 00:00, end + 1 day 00:00)`: the end date counts through end of day.
    pub fn window(&self) -> Span {
        Span::new(midnight_ms(self.start), midnight_ms(self.end) + DAY_MS)
    }
}

/// Booked and free time for one room over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub room_id: RoomId,
    pub range: DateRange,
    pub booked: Vec<Reservation>,
    /// Gaps inside the window not covered by any booking.
    pub free: Vec<Span>,
}

impl Availability {
    pub fn is_empty(&self) -> bool {
        self.booked.is_empty()
    }
}

impl Engine {
    /// Every reservation on `room_id` intersecting `range`, inclusive of both
    /// boundary dates. No bookings is an empty result, not an error.
    pub async fn booked_slots(&self, room_id: RoomId, range: &DateRange) -> Availability {
        let window = range.window();
        let booked = self.find_in_range(room_id, &window).await;
        let free = free_within(&window, &booked);
        Availability {
            room_id,
            range: *range,
            booked,
            free,
        }
    }
}

fn free_within(window: &Span, booked: &[Reservation]) -> Vec<Span> {
    let mut busy: Vec<Span> = booked
        .iter()
        .map(|r| (r.span.start.max(window.start), r.span.end.min(window.end)))
        .filter(|(s, e)| s < e)
        .map(|(s, e)| Span::new(s, e))
        .collect();
    busy.sort_by_key(|s| s.start);
    subtract_intervals(&[*window], &merge_overlapping(&busy))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}
