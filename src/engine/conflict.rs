use crate::limits::*;
use crate::model::*;

use super::{Rejection, RoomSchedule};

/// Stateless checks on a candidate span: ordering, sane range, and that it
/// starts strictly after `now`.
pub fn validate_candidate(span: &Span, now: Ms) -> Result<(), Rejection> {
    if !span.is_valid() {
        return Err(Rejection::InvalidInterval);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(Rejection::OutOfRange("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(Rejection::OutOfRange("span too wide"));
    }
    if span.start <= now {
        return Err(Rejection::PastStart);
    }
    Ok(())
}

/// Reject if any live reservation on the room overlaps `span` (half-open).
/// Caller must hold the room's write lock for the result to mean anything.
pub fn check_no_overlap(schedule: &RoomSchedule, span: &Span) -> Result<(), Rejection> {
    match schedule.overlapping(span).next() {
        Some(existing) => Err(Rejection::Overlap {
            existing: existing.id,
        }),
        None => Ok(()),
    }
}
