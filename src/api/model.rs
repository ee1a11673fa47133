use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::ConfigSnapshot;
use crate::model::*;

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    #[serde(alias = "package")]
    pub package_id: u32,
    pub number_of_people: Option<u32>,
    #[serde(alias = "date")]
    pub booked_date: NaiveDate,
    #[serde(alias = "start_time", alias = "time")]
    pub session_start: NaiveTime,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub special_requests: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_status: Option<PaymentStatus>,
}

impl CreateBookingRequest {
    pub fn into_booking_request(self, default_people: Option<u32>) -> Option<BookingRequest> {
        Some(BookingRequest {
            package_id: self.package_id,
            number_of_people: self.number_of_people.or(default_people)?,
            date: self.booked_date,
            start_time: self.session_start,
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            customer_email: self.customer_email,
            special_requests: self.special_requests.filter(|s| !s.trim().is_empty()),
            payment_reference: self.payment_reference.filter(|s| !s.trim().is_empty()),
            payment_status: self.payment_status.unwrap_or(PaymentStatus::Pending),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub new_date: NaiveDate,
    pub new_time: NaiveTime,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// No body, or no `wheel_numbers`, lets the studio pick.
#[derive(Debug, Default, Deserialize)]
pub struct AssignWheelsRequest {
    pub wheel_numbers: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PackageRequest {
    pub name: String,
    pub code: Option<String>,
    pub package_type: PackageType,
    pub price: Decimal,
    pub max_participants: u32,
    pub requires_wheel: bool,
    pub duration_minutes: Option<u32>,
    pub is_active: Option<bool>,
}

impl PackageRequest {
    pub fn into_package(self, id: u32) -> Package {
        Package {
            id,
            name: self.name,
            code: self.code.unwrap_or_default(),
            package_type: self.package_type,
            price: self.price,
            max_participants: self.max_participants,
            requires_wheel: self.requires_wheel,
            duration_minutes: self.duration_minutes,
            is_active: self.is_active.unwrap_or(true),
        }
    }
}

// ── Query strings ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CheckAvailabilityQuery {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub package: u32,
    pub people: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub people: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PackagesQuery {
    pub include_inactive: Option<bool>,
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub version: u64,
    #[serde(flatten)]
    pub config: StudioConfig,
}

impl From<&ConfigSnapshot> for ConfigResponse {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            version: snapshot.version,
            config: snapshot.config.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Ulid,
    pub booking_reference: String,
    pub package_id: u32,
    pub number_of_people: u32,
    pub booked_date: NaiveDate,
    pub session_start: NaiveTime,
    pub session_end: NaiveTime,
    pub wheels_reserved: u32,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub special_requests: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub cancellation_reason: Option<String>,
    pub assigned_wheels: Vec<u32>,
    pub checked_in_at: Option<NaiveDateTime>,
    pub checked_out_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            booking_reference: b.reference,
            package_id: b.package_id,
            number_of_people: b.number_of_people,
            booked_date: b.date,
            session_start: b.start_time,
            session_end: b.end_time,
            wheels_reserved: b.wheels,
            customer_name: b.customer_name,
            customer_phone: b.customer_phone,
            customer_email: b.customer_email,
            special_requests: b.special_requests,
            payment_reference: b.payment_reference,
            payment_status: b.payment_status,
            status: b.status,
            cancellation_reason: b.cancellation_reason,
            assigned_wheels: b.assigned_wheels,
            checked_in_at: b.checked_in_at,
            checked_out_at: b.checked_out_at,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub wheels_required: u32,
    pub available_wheels: u32,
}

impl From<AvailableSlot> for SlotResponse {
    fn from(s: AvailableSlot) -> Self {
        Self {
            date: s.date,
            start_time: s.start_time,
            end_time: s.end_time,
            wheels_required: s.wheels_required,
            available_wheels: s.available_wheels,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageSlotsResponse {
    pub package_id: u32,
    pub date: NaiveDate,
    pub number_of_people: u32,
    pub slots: Vec<SlotResponse>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub is_available: bool,
    pub reason: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub wheels_required: u32,
    pub available_wheels: u32,
    pub total_wheels: u32,
}

impl From<AvailabilityCheck> for AvailabilityResponse {
    fn from(c: AvailabilityCheck) -> Self {
        Self {
            is_available: c.is_available,
            reason: c.reason,
            date: c.date,
            start_time: c.start_time,
            end_time: c.end_time,
            wheels_required: c.wheels_required,
            available_wheels: c.available_wheels,
            total_wheels: c.total_wheels,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleSlotResponse {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub occupied_wheels: u32,
    pub available_wheels: u32,
    pub bookings: Vec<Ulid>,
}

#[derive(Debug, Serialize)]
pub struct DailyScheduleResponse {
    pub date: NaiveDate,
    pub operating_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub total_wheels: u32,
    pub is_maintenance_mode: bool,
    pub bookings_count: usize,
    pub slots: Vec<ScheduleSlotResponse>,
    pub bookings: Vec<BookingResponse>,
}

impl From<DailySchedule> for DailyScheduleResponse {
    fn from(s: DailySchedule) -> Self {
        Self {
            date: s.date,
            operating_time: s.operating_time,
            closing_time: s.closing_time,
            total_wheels: s.total_wheels,
            is_maintenance_mode: s.is_maintenance_mode,
            bookings_count: s.bookings_count,
            slots: s
                .slots
                .into_iter()
                .map(|slot| ScheduleSlotResponse {
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    occupied_wheels: slot.occupied_wheels,
                    available_wheels: slot.available_wheels,
                    bookings: slot.bookings,
                })
                .collect(),
            bookings: s.bookings.into_iter().map(BookingResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

#[derive(Debug, Serialize)]
pub struct StudioSection {
    pub is_open: bool,
    pub maintenance_mode: bool,
    pub maintenance_message: String,
    pub operating_hours: OperatingHours,
}

#[derive(Debug, Serialize)]
pub struct TodaySection {
    pub date: NaiveDate,
    pub bookings_count: usize,
    pub available_slots: u32,
    pub available_wheels: u32,
    pub total_wheels: u32,
}

#[derive(Debug, Serialize)]
pub struct StudioStatusResponse {
    pub studio: StudioSection,
    pub today: TodaySection,
}

impl From<StudioStatus> for StudioStatusResponse {
    fn from(s: StudioStatus) -> Self {
        Self {
            studio: StudioSection {
                is_open: s.is_open,
                maintenance_mode: s.is_maintenance_mode,
                maintenance_message: s.maintenance_message,
                operating_hours: OperatingHours {
                    open: s.operating_time,
                    close: s.closing_time,
                },
            },
            today: TodaySection {
                date: s.date,
                bookings_count: s.bookings_count,
                available_slots: s.available_slots,
                available_wheels: s.available_wheels,
                total_wheels: s.total_wheels,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
