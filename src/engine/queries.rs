use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::{Placement, admit, check_daily_limit, peak_wheels, wheels_in_use_at};
use super::slots::generate_slots;
use super::validate::{is_valid_email, normalize_phone, validate_party};
use super::{Engine, EngineError};

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Slice `items` into page `page` (1-based). Sizes are clamped to
    /// `1..=MAX_PAGE_SIZE`; `None` means the default.
    pub fn paginate(items: Vec<T>, page: Option<usize>, page_size: Option<usize>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let count = items.len();
        let results = items
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            count,
            page,
            page_size,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            page: self.page,
            page_size: self.page_size,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub fn packages(&self, include_inactive: bool) -> Vec<Package> {
        self.store
            .packages()
            .into_iter()
            .filter(|p| include_inactive || p.is_active)
            .collect()
    }

    pub fn package(&self, id: u32) -> Result<Package, EngineError> {
        self.store
            .get_package(id)
            .ok_or_else(|| EngineError::NotFound(format!("package {id}")))
    }

    fn bookable_package(&self, id: u32) -> Result<Package, EngineError> {
        self.store
            .get_package(id)
            .filter(|p| p.is_active)
            .ok_or_else(|| EngineError::validation(format!("package {id} is not available")))
    }

    // ── Availability ─────────────────────────────────────────

    /// Bookable starts on `date` for `people` on package `package_id`, each
    /// with the wheels it needs and the wheels still free over its interval.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        package_id: u32,
        people: u32,
    ) -> Result<Vec<AvailableSlot>, EngineError> {
        let package = self.package(package_id)?;
        if !package.is_active {
            return Err(EngineError::validation(format!("package {package_id} is not available")));
        }
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        validate_party(&package, people, config)?;

        let now = self.now();
        let slots = generate_slots(config, date, now.date());
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        self.with_day(date, |day| {
            if check_daily_limit(day, config.max_daily_sessions, None).is_err() {
                return Vec::new();
            }
            slots
                .iter()
                .filter_map(|slot| {
                    let placement = Placement {
                        package: &package,
                        people,
                        start: minute_of(slot.start_time),
                        exclude: None,
                    };
                    let admission = admit(day, config, &slots, &placement, now).ok()?;
                    Some(AvailableSlot {
                        date,
                        start_time: slot.start_time,
                        end_time: time_of(admission.span.end),
                        wheels_required: admission.wheels,
                        available_wheels: admission.available,
                    })
                })
                .collect()
        })
        .await
    }

    /// Evaluate one candidate start. Capacity, calendar and maintenance
    /// problems come back as `is_available: false` with a reason; malformed
    /// input (unknown package, party size) is an error.
    pub async fn check_availability(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        package_id: u32,
        people: u32,
    ) -> Result<AvailabilityCheck, EngineError> {
        let package = self.bookable_package(package_id)?;
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        validate_party(&package, people, config)?;

        let start = minute_of(start_time);
        let end = start + package.duration(config);
        let wheels_required = package.wheels_required(people, config);
        let end_time = (end < MINUTES_PER_DAY).then(|| time_of(end));
        let now = self.now();
        let slots = generate_slots(config, date, now.date());

        self.with_day(date, |day| {
            let window = Span::new(start, end.min(MINUTES_PER_DAY));
            let available_wheels = config
                .usable_wheels()
                .saturating_sub(peak_wheels(day, &window, None));
            let verdict = if config.is_maintenance_mode {
                Err(EngineError::MaintenanceMode(config.maintenance_message.clone()))
            } else {
                let placement = Placement {
                    package: &package,
                    people,
                    start,
                    exclude: None,
                };
                admit(day, config, &slots, &placement, now)
            };
            AvailabilityCheck {
                is_available: verdict.is_ok(),
                reason: verdict.err().map(|e| e.to_string()),
                date,
                start_time: time_of(start),
                end_time,
                wheels_required,
                available_wheels,
                total_wheels: config.usable_wheels(),
            }
        })
        .await
    }

    /// Peak wheels in use over the wheel session starting at `start_time`.
    pub async fn occupied_wheels(&self, date: NaiveDate, start_time: NaiveTime) -> Result<u32, EngineError> {
        let snapshot = self.config.snapshot().await;
        let start = minute_of(start_time);
        let end = (start + snapshot.config.wheel_session_duration).min(MINUTES_PER_DAY);
        if end <= start {
            return Ok(0);
        }
        self.with_day(date, |day| peak_wheels(day, &Span::new(start, end), None))
            .await
    }

    pub async fn daily_schedule(&self, date: NaiveDate) -> Result<DailySchedule, EngineError> {
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        let slots = generate_slots(config, date, self.today());

        self.with_day(date, |day| {
            let slots = slots
                .iter()
                .map(|slot| {
                    let span = slot.span();
                    let occupied = peak_wheels(day, &span, None);
                    ScheduleSlot {
                        start_time: slot.start_time,
                        end_time: slot.end_time,
                        occupied_wheels: occupied,
                        available_wheels: config.usable_wheels().saturating_sub(occupied),
                        bookings: day.overlapping(&span).map(|a| a.booking_id).collect(),
                    }
                })
                .collect();
            let bookings: Vec<Booking> = day.active_bookings().into_iter().cloned().collect();
            DailySchedule {
                date,
                operating_time: config.operating_time,
                closing_time: config.closing_time,
                total_wheels: config.usable_wheels(),
                is_maintenance_mode: config.is_maintenance_mode,
                bookings_count: bookings.len(),
                slots,
                bookings,
            }
        })
        .await
    }

    /// Right-now view of the studio: open or not, and today's headroom.
    pub async fn studio_status(&self) -> Result<StudioStatus, EngineError> {
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        let now = self.now();
        let today = now.date();
        let minute = minute_of(now.time());
        let is_open = !config.is_maintenance_mode && config.opening_span().contains_instant(minute);
        let slots = generate_slots(config, today, today);

        self.with_day(today, |day| {
            let cap_reached = check_daily_limit(day, config.max_daily_sessions, None).is_err();
            let available_slots = if cap_reached {
                0
            } else {
                slots
                    .iter()
                    .filter(|s| minute_of(s.start_time) >= minute)
                    .filter(|s| peak_wheels(day, &s.span(), None) < config.usable_wheels())
                    .count() as u32
            };
            StudioStatus {
                is_open,
                is_maintenance_mode: config.is_maintenance_mode,
                maintenance_message: config.maintenance_message.clone(),
                operating_time: config.operating_time,
                closing_time: config.closing_time,
                date: today,
                bookings_count: day.active_bookings().len(),
                available_slots,
                available_wheels: config
                    .usable_wheels()
                    .saturating_sub(wheels_in_use_at(day, minute)),
                total_wheels: config.usable_wheels(),
            }
        })
        .await
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Look a booking up by id or by its `IM-...` reference.
    pub async fn get_booking(&self, key: &str) -> Result<Booking, EngineError> {
        let id = self
            .resolve_booking_id(key)
            .ok_or_else(|| EngineError::NotFound(format!("booking {key}")))?;
        self.booking_by_id(id).await
    }

    pub async fn booking_by_id(&self, id: Ulid) -> Result<Booking, EngineError> {
        // A concurrent reschedule may move the booking between the index
        // lookup and the read; chase it a few times.
        for _ in 0..3 {
            let Some(date) = self.store.date_of(&id) else { break };
            if let Some(b) = self.with_day(date, |day| day.bookings.get(&id).cloned()).await? {
                return Ok(b);
            }
        }
        Err(EngineError::NotFound(format!("booking {id}")))
    }

    /// Every booking made with `phone` or `email`, latest session first.
    /// At least one of the two is required.
    pub async fn booking_history(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Page<Booking>, EngineError> {
        if phone.is_none() && email.is_none() {
            return Err(EngineError::validation("phone or email is required"));
        }
        let phone = phone
            .map(|p| {
                normalize_phone(p).ok_or_else(|| {
                    EngineError::validation("phone must be 7-15 digits, optionally prefixed with +")
                })
            })
            .transpose()?;
        let email = email.map(|e| e.trim().to_ascii_lowercase());
        if let Some(ref e) = email
            && !is_valid_email(e)
        {
            return Err(EngineError::validation("email is not a valid address"));
        }
        let mut found = self
            .collect_bookings(None, |b| {
                phone.as_deref() == Some(b.customer_phone.as_str())
                    || email.as_deref() == Some(b.customer_email.as_str())
            })
            .await?;
        found.sort_by(|a, b| (b.date, b.start_time, b.created_at).cmp(&(a.date, a.start_time, a.created_at)));
        Ok(Page::paginate(found, page, page_size))
    }

    /// Open bookings from today on, soonest first.
    pub async fn upcoming_bookings(
        &self,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Page<Booking>, EngineError> {
        let today = self.today();
        let mut found = self
            .collect_bookings(Some(today), |b| b.status.is_open())
            .await?;
        found.sort_by_key(|b| (b.date, b.start_time, b.created_at));
        Ok(Page::paginate(found, page, page_size))
    }

    async fn collect_bookings(
        &self,
        from: Option<NaiveDate>,
        keep: impl Fn(&Booking) -> bool,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut found = Vec::new();
        for date in self.store.day_dates() {
            if from.is_some_and(|f| date < f) {
                continue;
            }
            let hits = self
                .with_day(date, |day| {
                    day.bookings
                        .values()
                        .filter(|&b| keep(b))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .await?;
            found.extend(hits);
        }
        Ok(found)
    }
}
