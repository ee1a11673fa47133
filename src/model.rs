use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight. All intra-day arithmetic uses this.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

pub fn minute_of(t: NaiveTime) -> Minute {
    t.hour() * 60 + t.minute()
}

/// Inverse of [`minute_of`]. Clamped to 23:59 so end-of-day never wraps.
pub fn time_of(m: Minute) -> NaiveTime {
    let m = m.min(MINUTES_PER_DAY - 1);
    NaiveTime::from_hms_opt(m / 60, m % 60, 0).unwrap_or_default()
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_times(start: NaiveTime, end: NaiveTime) -> Self {
        Self::new(minute_of(start), minute_of(end))
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Configuration & catalog ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioConfig {
    pub total_wheels: u32,
    pub booking_fee_per_person: Decimal,
    pub operating_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub buffer_minutes_between_sessions: u32,
    pub max_daily_sessions: u32,
    /// Minutes.
    pub wheel_session_duration: u32,
    pub is_maintenance_mode: bool,
    pub maintenance_message: String,
    /// Bookings open this many days ahead of today, inclusive.
    pub booking_horizon_days: u32,
    /// A booking can no longer be moved once its session is this close.
    pub reschedule_cutoff_hours: u32,
    /// Wheel numbers (1-based) under repair. Sorted, no duplicates.
    pub wheels_out_of_service: Vec<u32>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            total_wheels: 8,
            booking_fee_per_person: Decimal::new(1_000_00, 2),
            operating_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            closing_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            buffer_minutes_between_sessions: 15,
            max_daily_sessions: 20,
            wheel_session_duration: 60,
            is_maintenance_mode: false,
            maintenance_message: String::new(),
            booking_horizon_days: 28,
            reschedule_cutoff_hours: 24,
            wheels_out_of_service: Vec::new(),
        }
    }
}

impl StudioConfig {
    pub fn opening_span(&self) -> Span {
        Span {
            start: minute_of(self.operating_time),
            end: minute_of(self.closing_time),
        }
    }

    /// Wheels that can be booked: the inventory minus those under repair.
    pub fn usable_wheels(&self) -> u32 {
        self.total_wheels
            .saturating_sub(self.wheels_out_of_service.len() as u32)
    }

    /// In-service wheel numbers, ascending.
    pub fn wheels_in_service(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.total_wheels).filter(|n| self.wheels_out_of_service.binary_search(n).is_err())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    WheelThrowing,
    HandBuilding,
    Combo,
    Painting,
    Hobbyist,
    ColoredClay,
}

impl PackageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageType::WheelThrowing => "wheel_throwing",
            PackageType::HandBuilding => "hand_building",
            PackageType::Combo => "combo",
            PackageType::Painting => "painting",
            PackageType::Hobbyist => "hobbyist",
            PackageType::ColoredClay => "colored_clay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: u32,
    pub name: String,
    pub code: String,
    pub package_type: PackageType,
    pub price: Decimal,
    pub max_participants: u32,
    pub requires_wheel: bool,
    /// Falls back to the wheel session length when unset.
    pub duration_minutes: Option<u32>,
    pub is_active: bool,
}

impl Package {
    pub fn duration(&self, config: &StudioConfig) -> Minute {
        self.duration_minutes.unwrap_or(config.wheel_session_duration)
    }

    /// One wheel per participant, capped at the wheels in service.
    pub fn wheels_required(&self, people: u32, config: &StudioConfig) -> u32 {
        if self.requires_wheel {
            people.min(config.usable_wheels())
        } else {
            0
        }
    }
}

// ── Bookings ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rescheduled,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Everything except a cancellation keeps its wheels on the calendar.
    pub fn holds_capacity(self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// States a client may still act on (move, cancel, pay).
    pub fn is_open(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Rescheduled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rescheduled => "rescheduled",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reference: String,
    pub package_id: u32,
    pub number_of_people: u32,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Wheels held while the booking is active.
    pub wheels: u32,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub special_requests: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub cancellation_reason: Option<String>,
    /// Wheel numbers handed out at the front desk; empty until assigned.
    pub assigned_wheels: Vec<u32>,
    pub checked_in_at: Option<NaiveDateTime>,
    pub checked_out_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::from_times(self.start_time, self.end_time)
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }

    pub fn allocation(&self) -> Allocation {
        Allocation {
            booking_id: self.id,
            span: self.span(),
            wheels: self.wheels,
        }
    }
}

pub const REFERENCE_PREFIX: &str = "IM";

/// `IM-20261016-0007`
pub fn format_reference(date: NaiveDate, seq: u32) -> String {
    format!(
        "{REFERENCE_PREFIX}-{:04}{:02}{:02}-{seq:04}",
        date.year(),
        date.month(),
        date.day()
    )
}

pub fn parse_reference(reference: &str) -> Option<(NaiveDate, u32)> {
    let mut parts = reference.split('-');
    if parts.next()? != REFERENCE_PREFIX {
        return None;
    }
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
    let seq = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((date, seq))
}

/// Wheels held by one booking over its interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub booking_id: Ulid,
    pub span: Span,
    pub wheels: u32,
}

/// Everything booked on one date. `bookings` is authoritative;
/// `allocations` is the derived capacity calendar for that date.
#[derive(Debug, Clone)]
pub struct DayLedger {
    pub date: NaiveDate,
    pub bookings: HashMap<Ulid, Booking>,
    /// Non-cancelled bookings only, sorted by `span.start`.
    pub allocations: Vec<Allocation>,
}

impl DayLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bookings: HashMap::new(),
            allocations: Vec::new(),
        }
    }

    /// Insert allocation maintaining sort order by span.start.
    pub fn insert_allocation(&mut self, allocation: Allocation) {
        let pos = self
            .allocations
            .binary_search_by_key(&allocation.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.allocations.insert(pos, allocation);
    }

    pub fn remove_allocation(&mut self, booking_id: Ulid) -> Option<Allocation> {
        let pos = self
            .allocations
            .iter()
            .position(|a| a.booking_id == booking_id)?;
        Some(self.allocations.remove(pos))
    }

    /// Return only allocations whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Allocation> {
        let right_bound = self
            .allocations
            .partition_point(|a| a.span.start < query.end);
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Pending, confirmed and rescheduled bookings: the ones that count
    /// against the daily session cap.
    pub fn session_count(&self, exclude: Option<Ulid>) -> usize {
        self.bookings
            .values()
            .filter(|b| b.status.is_open() && Some(b.id) != exclude)
            .count()
    }

    /// Rebuild the calendar from the booking records.
    pub fn recompute_allocations(&self) -> Vec<Allocation> {
        let mut allocs: Vec<Allocation> = self
            .bookings
            .values()
            .filter(|b| b.status.holds_capacity())
            .map(Booking::allocation)
            .collect();
        allocs.sort_by_key(|a| (a.span.start, a.booking_id));
        allocs
    }

    /// Active bookings in start-time order.
    pub fn active_bookings(&self) -> Vec<&Booking> {
        let mut active: Vec<&Booking> = self
            .bookings
            .values()
            .filter(|b| b.status.holds_capacity())
            .collect();
        active.sort_by_key(|b| (b.start_time, b.created_at));
        active
    }
}

/// WAL record format, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ConfigUpdated {
        config: StudioConfig,
    },
    PackageSaved {
        package: Package,
    },
    BookingCreated {
        booking: Booking,
    },
    PaymentRecorded {
        id: Ulid,
        date: NaiveDate,
        payment_status: PaymentStatus,
        payment_reference: Option<String>,
        status: BookingStatus,
        at: NaiveDateTime,
    },
    BookingRescheduled {
        id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        status: BookingStatus,
        at: NaiveDateTime,
    },
    BookingCancelled {
        id: Ulid,
        date: NaiveDate,
        reason: Option<String>,
        at: NaiveDateTime,
    },
    BookingCompleted {
        id: Ulid,
        date: NaiveDate,
        at: NaiveDateTime,
    },
    WheelsAssigned {
        id: Ulid,
        date: NaiveDate,
        wheels: Vec<u32>,
        at: NaiveDateTime,
    },
    CheckedIn {
        id: Ulid,
        date: NaiveDate,
        at: NaiveDateTime,
    },
    CheckedOut {
        id: Ulid,
        date: NaiveDate,
        at: NaiveDateTime,
    },
}

// ── Commands ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub package_id: u32,
    pub number_of_people: u32,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub special_requests: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_status: PaymentStatus,
}

// ── Query result types ───────────────────────────────────────────

/// A generated candidate interval, before looking at bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Slot {
    pub fn span(&self) -> Span {
        Span::from_times(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// End of the package's interval, which may run past the base slot.
    pub end_time: NaiveTime,
    pub wheels_required: u32,
    /// Free wheels over the interval before this booking is placed.
    pub available_wheels: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub is_available: bool,
    pub reason: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub wheels_required: u32,
    pub available_wheels: u32,
    pub total_wheels: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub occupied_wheels: u32,
    pub available_wheels: u32,
    pub bookings: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    pub date: NaiveDate,
    pub operating_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub total_wheels: u32,
    pub is_maintenance_mode: bool,
    pub bookings_count: usize,
    pub slots: Vec<ScheduleSlot>,
    pub bookings: Vec<Booking>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioStatus {
    pub is_open: bool,
    pub is_maintenance_mode: bool,
    pub maintenance_message: String,
    pub operating_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub date: NaiveDate,
    pub bookings_count: usize,
    pub available_slots: u32,
    pub available_wheels: u32,
    pub total_wheels: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, 14).unwrap()
    }

    fn alloc(start: Minute, end: Minute, wheels: u32) -> Allocation {
        Allocation {
            booking_id: Ulid::new(),
            span: Span::new(start, end),
            wheels,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(480, 540);
        assert_eq!(s.duration(), 60);
        assert!(s.contains_instant(480));
        assert!(s.contains_instant(539));
        assert!(!s.contains_instant(540)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(480, 540);
        let b = Span::new(510, 570);
        let c = Span::new(540, 600);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn minute_conversions() {
        let t = NaiveTime::from_hms_opt(9, 15, 30).unwrap();
        assert_eq!(minute_of(t), 555);
        assert_eq!(time_of(555), NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(time_of(MINUTES_PER_DAY), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
    }

    #[test]
    fn default_config_matches_studio_defaults() {
        let c = StudioConfig::default();
        assert_eq!(c.total_wheels, 8);
        assert_eq!(c.booking_fee_per_person.to_string(), "1000.00");
        assert_eq!(c.opening_span(), Span::new(480, 1080));
        assert_eq!(c.max_daily_sessions, 20);
        assert!(!c.is_maintenance_mode);
    }

    #[test]
    fn wheels_required_caps_at_inventory() {
        let config = StudioConfig::default();
        let mut pkg = Package {
            id: 1,
            name: "Wheel".into(),
            code: "WHE-001".into(),
            package_type: PackageType::WheelThrowing,
            price: Decimal::new(2500, 0),
            max_participants: 10,
            requires_wheel: true,
            duration_minutes: None,
            is_active: true,
        };
        assert_eq!(pkg.wheels_required(3, &config), 3);
        assert_eq!(pkg.wheels_required(10, &config), 8);
        let repairs = StudioConfig {
            wheels_out_of_service: vec![2, 5],
            ..StudioConfig::default()
        };
        assert_eq!(pkg.wheels_required(10, &repairs), 6);
        assert_eq!(pkg.duration(&config), 60);
        pkg.requires_wheel = false;
        assert_eq!(pkg.wheels_required(3, &config), 0);
    }

    #[test]
    fn reference_format_and_parse() {
        let r = format_reference(date(), 7);
        assert_eq!(r, "IM-20300314-0007");
        assert_eq!(parse_reference(&r), Some((date(), 7)));
        assert_eq!(parse_reference("IM-2030-0001"), None);
        assert_eq!(parse_reference("XX-20300314-0001"), None);
        assert_eq!(parse_reference("IM-20300314-0001-9"), None);
    }

    #[test]
    fn allocation_ordering() {
        let mut day = DayLedger::new(date());
        day.insert_allocation(alloc(600, 660, 1));
        day.insert_allocation(alloc(480, 540, 2));
        day.insert_allocation(alloc(555, 615, 1));
        let starts: Vec<_> = day.allocations.iter().map(|a| a.span.start).collect();
        assert_eq!(starts, vec![480, 555, 600]);
    }

    #[test]
    fn remove_allocation_by_booking() {
        let mut day = DayLedger::new(date());
        let a = alloc(480, 540, 1);
        day.insert_allocation(a);
        assert!(day.remove_allocation(Ulid::new()).is_none());
        assert_eq!(day.remove_allocation(a.booking_id), Some(a));
        assert!(day.allocations.is_empty());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut day = DayLedger::new(date());
        day.insert_allocation(alloc(480, 540, 1));
        day.insert_allocation(alloc(530, 620, 1));
        day.insert_allocation(alloc(700, 760, 1));
        let hits: Vec<_> = day.overlapping(&Span::new(540, 600)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(530, 620));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut day = DayLedger::new(date());
        day.insert_allocation(alloc(480, 540, 4));
        assert_eq!(day.overlapping(&Span::new(540, 600)).count(), 0);
        assert_eq!(day.overlapping(&Span::new(420, 480)).count(), 0);
    }

    #[test]
    fn overlapping_long_allocation_spanning_query() {
        let mut day = DayLedger::new(date());
        day.insert_allocation(alloc(480, 1080, 1));
        assert_eq!(day.overlapping(&Span::new(700, 760)).count(), 1);
    }

    #[test]
    fn wheels_in_service_skip_repairs() {
        let config = StudioConfig {
            total_wheels: 5,
            wheels_out_of_service: vec![2, 4],
            ..StudioConfig::default()
        };
        assert_eq!(config.usable_wheels(), 3);
        assert_eq!(config.wheels_in_service().collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn finished_bookings_leave_the_session_count() {
        let mut day = DayLedger::new(date());
        let at = date().and_hms_opt(7, 0, 0).unwrap();
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Rescheduled,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ] {
            let id = Ulid::new();
            day.bookings.insert(
                id,
                Booking {
                    id,
                    reference: format_reference(date(), day.bookings.len() as u32 + 1),
                    package_id: 1,
                    number_of_people: 1,
                    date: date(),
                    start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    wheels: 1,
                    customer_name: "Njeri".into(),
                    customer_phone: "+254700000002".into(),
                    customer_email: "njeri@example.com".into(),
                    special_requests: None,
                    payment_reference: None,
                    payment_status: PaymentStatus::Pending,
                    status,
                    cancellation_reason: None,
                    assigned_wheels: Vec::new(),
                    checked_in_at: None,
                    checked_out_at: None,
                    created_at: at,
                    updated_at: at,
                },
            );
        }
        assert_eq!(day.session_count(None), 3);
    }

    #[test]
    fn status_predicates() {
        assert!(BookingStatus::Completed.holds_capacity());
        assert!(!BookingStatus::Cancelled.holds_capacity());
        assert!(BookingStatus::Rescheduled.is_open());
        assert!(!BookingStatus::Completed.is_open());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let at = date().and_hms_opt(10, 0, 0).unwrap();
        let events = vec![
            Event::ConfigUpdated {
                config: StudioConfig::default(),
            },
            Event::WheelsAssigned {
                id: Ulid::new(),
                date: date(),
                wheels: vec![3, 4],
                at,
            },
            Event::BookingCreated {
                booking: Booking {
                    id: Ulid::new(),
                    reference: format_reference(date(), 1),
                    package_id: 1,
                    number_of_people: 2,
                    date: date(),
                    start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    wheels: 2,
                    customer_name: "Wanjiru".into(),
                    customer_phone: "+254712345678".into(),
                    customer_email: "w@example.com".into(),
                    special_requests: None,
                    payment_reference: Some("QFT12ABC".into()),
                    payment_status: PaymentStatus::Pending,
                    status: BookingStatus::Pending,
                    cancellation_reason: None,
                    assigned_wheels: vec![1, 2],
                    checked_in_at: None,
                    checked_out_at: None,
                    created_at: at,
                    updated_at: at,
                },
            },
        ];
        for event in events {
            let bytes = bincode::serialize(&event).unwrap();
            let decoded: Event = bincode::deserialize(&bytes).unwrap();
            assert_eq!(event, decoded);
        }
    }
}
