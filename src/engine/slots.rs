use chrono::NaiveDate;

use crate::model::*;

use super::validate::validate_horizon;

/// Candidate slots for `date`, independent of bookings.
///
/// Walks from opening time in steps of `session + buffer`, emitting a slot
/// whenever a full session still fits before closing, up to the daily cap.
/// Empty in maintenance mode, for dates before `today` and for dates past
/// the booking horizon.
pub fn generate_slots(config: &StudioConfig, date: NaiveDate, today: NaiveDate) -> Vec<Slot> {
    if config.is_maintenance_mode
        || date < today
        || validate_horizon(date, today, config.booking_horizon_days).is_err()
    {
        return Vec::new();
    }
    let open = config.opening_span();
    let duration = config.wheel_session_duration;
    let step = duration + config.buffer_minutes_between_sessions;
    if duration == 0 || open.end <= open.start {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut cursor = open.start;
    while cursor + duration <= open.end && (slots.len() as u32) < config.max_daily_sessions {
        slots.push(Slot {
            date,
            start_time: time_of(cursor),
            end_time: time_of(cursor + duration),
        });
        cursor += step;
    }
    slots
}

/// Whether `start` is one of the generated slot starts for the day.
pub fn slot_starting_at(slots: &[Slot], start: Minute) -> Option<&Slot> {
    slots.iter().find(|s| minute_of(s.start_time) == start)
}
