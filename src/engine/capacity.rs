use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;
use super::slots::slot_starting_at;
use super::validate::{validate_horizon, validate_not_past, validate_party};

/// Peak number of wheels in use at any instant inside `query`.
///
/// Sweep line over the overlapping allocations, clamped to the query window.
/// Ends sort before starts at the same minute, so back-to-back bookings
/// never count as concurrent.
pub fn peak_wheels(day: &DayLedger, query: &Span, exclude: Option<Ulid>) -> u32 {
    let mut events: Vec<(Minute, i64)> = Vec::new();
    for a in day.overlapping(query) {
        if Some(a.booking_id) == exclude || a.wheels == 0 {
            continue;
        }
        events.push((a.span.start.max(query.start), a.wheels as i64));
        events.push((a.span.end.min(query.end), -(a.wheels as i64)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut current: i64 = 0;
    let mut peak: i64 = 0;
    for (_, delta) in events {
        current += delta;
        peak = peak.max(current);
    }
    peak as u32
}

/// Wheels in use at exactly minute `t`.
pub fn wheels_in_use_at(day: &DayLedger, t: Minute) -> u32 {
    day.allocations
        .iter()
        .filter(|a| a.span.contains_instant(t))
        .map(|a| a.wheels)
        .sum()
}

/// Admission control: succeeds with the free wheel count (before placing the
/// request) when `wheels` more fit under `total` for the whole of `span`.
pub fn check_capacity(
    day: &DayLedger,
    span: &Span,
    wheels: u32,
    total: u32,
    exclude: Option<Ulid>,
) -> Result<u32, EngineError> {
    let available = total.saturating_sub(peak_wheels(day, span, exclude));
    if wheels > available {
        return Err(EngineError::CapacityExceeded {
            needed: wheels,
            available,
            total,
        });
    }
    Ok(available)
}

/// Daily session cap check. `exclude` lets a booking move within its own day.
pub fn check_daily_limit(
    day: &DayLedger,
    max_daily_sessions: u32,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if day.session_count(exclude) >= max_daily_sessions as usize {
        return Err(EngineError::DailyLimitReached(max_daily_sessions));
    }
    Ok(())
}

/// A candidate placement of one party on one day.
pub struct Placement<'a> {
    pub package: &'a Package,
    pub people: u32,
    pub start: Minute,
    /// Booking being moved within this same day; its own wheels don't count.
    pub exclude: Option<Ulid>,
}

/// What an admitted placement will hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub span: Span,
    pub wheels: u32,
    /// Free wheels over `span` before the placement.
    pub available: u32,
}

/// Checks on a candidate start that need no ledger. Writers run them before
/// touching the date's ledger so a rejected request never creates one.
pub fn check_target(
    config: &StudioConfig,
    slots: &[Slot],
    date: NaiveDate,
    start: Minute,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    validate_not_past(date, now.date())?;
    validate_horizon(date, now.date(), config.booking_horizon_days)?;
    if slot_starting_at(slots, start).is_none() {
        return Err(EngineError::validation(format!(
            "{} is not a session start on {}",
            time_of(start).format("%H:%M"),
            date
        )));
    }
    if date == now.date() && start < minute_of(now.time()) {
        return Err(EngineError::validation("that session has already started"));
    }
    Ok(())
}

/// Full admission check for `placement` on `day`, given the day's generated
/// `slots`. Maintenance mode is the caller's concern.
pub fn admit(
    day: &DayLedger,
    config: &StudioConfig,
    slots: &[Slot],
    placement: &Placement<'_>,
    now: NaiveDateTime,
) -> Result<Admission, EngineError> {
    validate_party(placement.package, placement.people, config)?;
    let start = placement.start;
    check_target(config, slots, day.date, start, now)?;
    let end = start + placement.package.duration(config);
    if end > minute_of(config.closing_time) {
        return Err(EngineError::validation(format!(
            "{} would run past closing time",
            placement.package.name
        )));
    }
    check_daily_limit(day, config.max_daily_sessions, placement.exclude)?;

    let span = Span::new(start, end);
    let wheels = placement.package.wheels_required(placement.people, config);
    let available = check_capacity(day, &span, wheels, config.usable_wheels(), placement.exclude)?;
    Ok(Admission {
        span,
        wheels,
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(allocs: &[(Minute, Minute, u32)]) -> (DayLedger, Vec<Ulid>) {
        let mut day = DayLedger::new(NaiveDate::from_ymd_opt(2030, 1, 2).unwrap());
        let mut ids = Vec::new();
        for &(start, end, wheels) in allocs {
            let id = Ulid::new();
            ids.push(id);
            day.insert_allocation(Allocation {
                booking_id: id,
                span: Span::new(start, end),
                wheels,
            });
        }
        (day, ids)
    }

    #[test]
    fn empty_day_has_no_usage() {
        let (day, _) = ledger(&[]);
        assert_eq!(peak_wheels(&day, &Span::new(480, 540), None), 0);
        assert_eq!(check_capacity(&day, &Span::new(480, 540), 8, 8, None).unwrap(), 8);
    }

    #[test]
    fn same_slot_usage_adds_up() {
        let (day, _) = ledger(&[(480, 540, 3), (480, 540, 4)]);
        assert_eq!(peak_wheels(&day, &Span::new(480, 540), None), 7);
        assert!(check_capacity(&day, &Span::new(480, 540), 1, 8, None).is_ok());
        let err = check_capacity(&day, &Span::new(480, 540), 2, 8, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded { needed: 2, available: 1, total: 8 }
        ));
    }

    #[test]
    fn adjacent_bookings_are_not_concurrent() {
        let (day, _) = ledger(&[(480, 540, 8), (540, 600, 8)]);
        assert_eq!(peak_wheels(&day, &Span::new(480, 600), None), 8);
        assert_eq!(peak_wheels(&day, &Span::new(540, 600), None), 8);
        assert_eq!(peak_wheels(&day, &Span::new(600, 660), None), 0);
    }

    #[test]
    fn long_booking_spans_several_slots() {
        // A four-hour hand-building session holding 2 wheels from 08:00.
        let (day, _) = ledger(&[(480, 720, 2), (555, 615, 5)]);
        assert_eq!(peak_wheels(&day, &Span::new(555, 615), None), 7);
        assert_eq!(peak_wheels(&day, &Span::new(630, 690), None), 2);
        assert!(check_capacity(&day, &Span::new(555, 615), 2, 8, None).is_err());
        assert!(check_capacity(&day, &Span::new(630, 690), 6, 8, None).is_ok());
    }

    #[test]
    fn peak_is_max_not_sum_over_window() {
        // Two non-overlapping bookings inside the query never coexist.
        let (day, _) = ledger(&[(480, 510, 5), (520, 540, 5)]);
        assert_eq!(peak_wheels(&day, &Span::new(480, 540), None), 5);
    }

    #[test]
    fn staggered_overlaps() {
        let (day, _) = ledger(&[(480, 560, 3), (520, 600, 3), (590, 650, 3)]);
        assert_eq!(peak_wheels(&day, &Span::new(480, 650), None), 6);
        assert_eq!(peak_wheels(&day, &Span::new(600, 650), None), 3);
    }

    #[test]
    fn exclude_ignores_own_allocation() {
        let (day, ids) = ledger(&[(480, 540, 8)]);
        assert!(check_capacity(&day, &Span::new(480, 540), 8, 8, None).is_err());
        assert!(check_capacity(&day, &Span::new(480, 540), 8, 8, Some(ids[0])).is_ok());
    }

    #[test]
    fn zero_wheel_requests_always_fit() {
        let (day, _) = ledger(&[(480, 540, 8)]);
        assert_eq!(check_capacity(&day, &Span::new(480, 540), 0, 8, None).unwrap(), 0);
    }

    #[test]
    fn shrunk_inventory_reports_zero_available() {
        let (day, _) = ledger(&[(480, 540, 6)]);
        let err = check_capacity(&day, &Span::new(480, 540), 1, 4, None).unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { available: 0, .. }));
    }

    #[test]
    fn usage_at_instant() {
        let (day, _) = ledger(&[(480, 540, 2), (500, 600, 3)]);
        assert_eq!(wheels_in_use_at(&day, 479), 0);
        assert_eq!(wheels_in_use_at(&day, 510), 5);
        assert_eq!(wheels_in_use_at(&day, 540), 3);
    }

    fn wheel_package(duration: Option<u32>) -> Package {
        Package {
            id: 1,
            name: "Wheel Throwing".into(),
            code: "WHE-001".into(),
            package_type: PackageType::WheelThrowing,
            price: rust_decimal::Decimal::new(3000, 0),
            max_participants: 10,
            requires_wheel: true,
            duration_minutes: duration,
            is_active: true,
        }
    }

    fn morning(date: NaiveDate) -> NaiveDateTime {
        date.and_hms_opt(7, 0, 0).unwrap()
    }

    #[test]
    fn admit_on_generated_slot() {
        let config = StudioConfig::default();
        let (day, _) = ledger(&[(480, 540, 5)]);
        let slots = crate::engine::slots::generate_slots(&config, day.date, day.date);
        let pkg = wheel_package(None);
        let placement = Placement { package: &pkg, people: 3, start: 480, exclude: None };
        let admission = admit(&day, &config, &slots, &placement, morning(day.date)).unwrap();
        assert_eq!(admission.span, Span::new(480, 540));
        assert_eq!(admission.wheels, 3);
        assert_eq!(admission.available, 3);

        let placement = Placement { package: &pkg, people: 4, start: 480, exclude: None };
        assert!(matches!(
            admit(&day, &config, &slots, &placement, morning(day.date)),
            Err(EngineError::CapacityExceeded { needed: 4, available: 3, total: 8 })
        ));
    }

    #[test]
    fn admit_rejects_off_grid_and_started_sessions() {
        let config = StudioConfig::default();
        let (day, _) = ledger(&[]);
        let slots = crate::engine::slots::generate_slots(&config, day.date, day.date);
        let pkg = wheel_package(None);

        let off_grid = Placement { package: &pkg, people: 1, start: 540, exclude: None };
        assert!(matches!(
            admit(&day, &config, &slots, &off_grid, morning(day.date)),
            Err(EngineError::Validation(_))
        ));

        let started = Placement { package: &pkg, people: 1, start: 480, exclude: None };
        let late = day.date.and_hms_opt(8, 30, 0).unwrap();
        assert!(matches!(
            admit(&day, &config, &slots, &started, late),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn repairs_reduce_admission() {
        let config = StudioConfig {
            wheels_out_of_service: vec![7, 8],
            ..StudioConfig::default()
        };
        let (day, _) = ledger(&[(480, 540, 4)]);
        let slots = crate::engine::slots::generate_slots(&config, day.date, day.date);
        let pkg = wheel_package(None);
        let placement = Placement { package: &pkg, people: 3, start: 480, exclude: None };
        assert!(matches!(
            admit(&day, &config, &slots, &placement, morning(day.date)),
            Err(EngineError::CapacityExceeded { needed: 3, available: 2, total: 6 })
        ));
    }

    #[test]
    fn target_beyond_horizon_is_refused() {
        let config = StudioConfig::default();
        let today = NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
        let far = today + chrono::Days::new(29);
        let slots = crate::engine::slots::generate_slots(&config, far, today);
        let err = check_target(&config, &slots, far, 480, morning(today)).unwrap_err();
        assert!(err.to_string().contains("days ahead"), "{err}");
        let near = today + chrono::Days::new(28);
        let slots = crate::engine::slots::generate_slots(&config, near, today);
        assert!(check_target(&config, &slots, near, 480, morning(today)).is_ok());
    }

    #[test]
    fn admit_rejects_long_package_past_closing() {
        let config = StudioConfig::default();
        let (day, _) = ledger(&[]);
        let slots = crate::engine::slots::generate_slots(&config, day.date, day.date);
        let pkg = wheel_package(Some(120));
        // 16:45 + 2h = 18:45, after closing.
        let last = Placement { package: &pkg, people: 1, start: 1005, exclude: None };
        assert!(admit(&day, &config, &slots, &last, morning(day.date)).is_err());
        let early = Placement { package: &pkg, people: 1, start: 480, exclude: None };
        let admission = admit(&day, &config, &slots, &early, morning(day.date)).unwrap();
        assert_eq!(admission.span, Span::new(480, 600));
    }
}
