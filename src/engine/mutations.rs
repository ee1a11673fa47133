use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::{Placement, admit, check_target};
use super::config::{ConfigPatch, ConfigSnapshot, validate_config};
use super::slots::generate_slots;
use super::validate::{validate_package, validate_party, validate_payment_reference, validate_request};
use super::{Engine, EngineError, WalCommand};

/// A booking can move between dates while we wait for its ledger; give up
/// after this many chases.
const MAX_RELOCK_ATTEMPTS: usize = 3;

fn not_found(id: Ulid) -> EngineError {
    EngineError::NotFound(format!("booking {id}"))
}

fn ensure_open(booking: &Booking, action: &'static str) -> Result<(), EngineError> {
    if booking.status.is_open() {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            from: booking.status.as_str(),
            action,
        })
    }
}

/// Moves are refused once the session is closer than the cutoff.
fn check_cutoff(booking: &Booking, config: &StudioConfig, now: NaiveDateTime) -> Result<(), EngineError> {
    let cutoff = TimeDelta::hours(config.reschedule_cutoff_hours.into());
    if booking.starts_at() - now < cutoff {
        return Err(EngineError::validation(format!(
            "bookings can only be moved more than {} hours before the session",
            config.reschedule_cutoff_hours
        )));
    }
    Ok(())
}

fn record_rejection(err: &EngineError) {
    if matches!(
        err,
        EngineError::CapacityExceeded { .. } | EngineError::DailyLimitReached(_)
    ) {
        metrics::counter!(crate::observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
    }
}

impl Engine {
    // ── Studio administration ────────────────────────────────

    pub async fn update_config(&self, patch: ConfigPatch) -> Result<Arc<ConfigSnapshot>, EngineError> {
        let _gate = self.enter().await?;
        let mut current = self.config.write().await;
        let next = patch.apply(&current.config);
        validate_config(&next)?;
        if next == current.config {
            return Ok(current.clone());
        }

        let event = Event::ConfigUpdated {
            config: next.clone(),
        };
        self.persist_studio_event(&event).await?;
        let version = current.version + 1;
        *current = Arc::new(ConfigSnapshot {
            version,
            config: next,
        });
        info!(version, maintenance = current.config.is_maintenance_mode, "studio configuration updated");
        Ok(current.clone())
    }

    /// Insert or replace a package. An empty code is filled in from the
    /// package type, e.g. `WHE-003`.
    pub async fn save_package(&self, mut package: Package) -> Result<Package, EngineError> {
        package.name = package.name.trim().to_string();
        package.code = package.code.trim().to_ascii_uppercase();
        validate_package(&package)?;

        let _gate = self.enter().await?;
        // Catalog writes serialize with config writes.
        let _config = self.config.write().await;
        let existing = self.store.packages();
        let is_new = !existing.iter().any(|p| p.id == package.id);
        if is_new && existing.len() >= MAX_PACKAGES {
            return Err(EngineError::LimitExceeded("too many packages"));
        }
        if package.code.is_empty() {
            let prefix: String = package
                .package_type
                .as_str()
                .chars()
                .take(3)
                .collect::<String>()
                .to_ascii_uppercase();
            let taken = existing
                .iter()
                .filter(|p| p.id != package.id && p.code.starts_with(&prefix))
                .count();
            package.code = format!("{prefix}-{:03}", taken + 1);
        }
        if existing
            .iter()
            .any(|p| p.id != package.id && p.code == package.code)
        {
            return Err(EngineError::validation(format!(
                "package code {} is already in use",
                package.code
            )));
        }

        let event = Event::PackageSaved {
            package: package.clone(),
        };
        self.persist_studio_event(&event).await?;
        self.store.put_package(package.clone());
        info!(id = package.id, code = %package.code, "package saved");
        Ok(package)
    }

    // ── Reservations ─────────────────────────────────────────

    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let req = validate_request(request)?;
        let package = self
            .store
            .get_package(req.package_id)
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                EngineError::validation(format!("package {} is not available", req.package_id))
            })?;
        let party = Some((&package, req.number_of_people));
        self.precheck_target(req.date, req.start_time, party, None).await?;

        let _gate = self.enter().await?;
        let id = Ulid::new();
        let claim = match req.payment_reference {
            Some(ref r) => Some(self.store.claim_payment_ref(r, id)?),
            None => None,
        };

        let mut day = self.lock_day(req.date).await?;
        if day.bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this date"));
        }
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        if config.is_maintenance_mode {
            return Err(EngineError::MaintenanceMode(config.maintenance_message.clone()));
        }

        let now = self.now();
        let slots = generate_slots(config, req.date, now.date());
        let placement = Placement {
            package: &package,
            people: req.number_of_people,
            start: minute_of(req.start_time),
            exclude: None,
        };
        let admission = admit(&day, config, &slots, &placement, now).inspect_err(record_rejection)?;

        let status = match req.payment_status {
            PaymentStatus::Confirmed => BookingStatus::Confirmed,
            _ => BookingStatus::Pending,
        };
        let booking = Booking {
            id,
            reference: self.store.next_reference(req.date),
            package_id: package.id,
            number_of_people: req.number_of_people,
            date: req.date,
            start_time: time_of(admission.span.start),
            end_time: time_of(admission.span.end),
            wheels: admission.wheels,
            customer_name: req.customer_name,
            customer_phone: req.customer_phone,
            customer_email: req.customer_email,
            special_requests: req.special_requests,
            payment_reference: req.payment_reference,
            payment_status: req.payment_status,
            status,
            cancellation_reason: None,
            assigned_wheels: Vec::new(),
            checked_in_at: None,
            checked_out_at: None,
            created_at: now,
            updated_at: now,
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut day, None, &event).await?;
        if let Some(claim) = claim {
            claim.commit();
        }
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            reference = %booking.reference,
            date = %booking.date,
            start = %booking.start_time,
            wheels = booking.wheels,
            "booking created"
        );
        Ok(booking)
    }

    /// Move a booking to another slot, possibly on another date. Releasing
    /// the old slot and taking the new one commit as one record.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> Result<Booking, EngineError> {
        let current = self.booking_by_id(id).await?;
        self.precheck_target(new_date, new_time, None, Some(&current)).await?;
        let _gate = self.enter().await?;
        for _ in 0..MAX_RELOCK_ATTEMPTS {
            let from = self.store.date_of(&id).ok_or_else(|| not_found(id))?;

            if from == new_date {
                let mut day = self.lock_day(from).await?;
                if !day.bookings.contains_key(&id) {
                    continue;
                }
                return self.reschedule_locked(&mut day, None, id, new_date, new_time).await;
            }

            // Two ledgers: always lock the earlier date first.
            let (first, second) = if from < new_date { (from, new_date) } else { (new_date, from) };
            let mut first_guard = self.lock_day(first).await?;
            let mut second_guard = self.lock_day(second).await?;
            let (source, target) = if from < new_date {
                (&mut *first_guard, &mut *second_guard)
            } else {
                (&mut *second_guard, &mut *first_guard)
            };
            if !source.bookings.contains_key(&id) {
                continue;
            }
            return self
                .reschedule_locked(source, Some(target), id, new_date, new_time)
                .await;
        }
        Err(EngineError::Busy(new_date))
    }

    async fn reschedule_locked(
        &self,
        source: &mut DayLedger,
        mut target: Option<&mut DayLedger>,
        id: Ulid,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> Result<Booking, EngineError> {
        let booking = source.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;
        ensure_open(&booking, "reschedule")?;
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        if config.is_maintenance_mode {
            return Err(EngineError::MaintenanceMode(config.maintenance_message.clone()));
        }
        let now = self.now();
        check_cutoff(&booking, config, now)?;
        let package = self.store.get_package(booking.package_id).ok_or_else(|| {
            EngineError::validation(format!("package {} no longer exists", booking.package_id))
        })?;

        let slots = generate_slots(config, new_date, now.date());
        let placement = Placement {
            package: &package,
            people: booking.number_of_people,
            start: minute_of(new_time),
            exclude: target.is_none().then_some(id),
        };
        let admission = {
            let ledger: &DayLedger = target.as_deref().unwrap_or(&*source);
            admit(ledger, config, &slots, &placement, now).inspect_err(record_rejection)?
        };

        let status = match booking.status {
            BookingStatus::Pending => BookingStatus::Pending,
            _ => BookingStatus::Rescheduled,
        };
        let event = Event::BookingRescheduled {
            id,
            from: booking.date,
            to: new_date,
            start_time: time_of(admission.span.start),
            end_time: time_of(admission.span.end),
            status,
            at: now,
        };
        self.persist_and_apply(source, target.as_deref_mut(), &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_RESCHEDULED_TOTAL).increment(1);
        info!(
            reference = %booking.reference,
            from = %booking.date,
            to = %new_date,
            start = %new_time,
            "booking rescheduled"
        );

        let ledger: &DayLedger = target.as_deref().unwrap_or(&*source);
        ledger.bookings.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// Cancel and release the booking's wheels. Cancelling twice is a no-op.
    pub async fn cancel_booking(&self, id: Ulid, reason: Option<String>) -> Result<Booking, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        let _gate = self.enter().await?;
        let (date, mut day) = self.lock_booking_day(id).await?;
        let booking = day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;
        match booking.status {
            BookingStatus::Cancelled => return Ok(booking),
            BookingStatus::Completed => {
                return Err(EngineError::InvalidTransition {
                    from: booking.status.as_str(),
                    action: "cancel",
                });
            }
            _ => {}
        }

        let event = Event::BookingCancelled {
            id,
            date,
            reason: reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            at: self.now(),
        };
        self.persist_and_apply(&mut day, None, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(reference = %booking.reference, %date, wheels = booking.wheels, "booking cancelled");
        day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// Record the outcome of a payment reported by the caller. A confirmed
    /// payment confirms a pending booking; a failed one cancels it.
    pub async fn record_payment(
        &self,
        id: Ulid,
        payment_status: PaymentStatus,
        payment_reference: Option<String>,
    ) -> Result<Booking, EngineError> {
        let payment_reference = payment_reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if let Some(ref r) = payment_reference {
            validate_payment_reference(r)?;
        }
        let _gate = self.enter().await?;
        let (date, mut day) = self.lock_booking_day(id).await?;
        let booking = day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;

        let event = match payment_status {
            PaymentStatus::Pending => return Ok(booking),
            PaymentStatus::Confirmed => {
                if booking.payment_status == PaymentStatus::Confirmed
                    && booking.status.is_open()
                    && (payment_reference.is_none() || payment_reference == booking.payment_reference)
                {
                    return Ok(booking);
                }
                if booking.status != BookingStatus::Pending {
                    return Err(EngineError::InvalidTransition {
                        from: booking.status.as_str(),
                        action: "confirm payment for",
                    });
                }
                let reference = payment_reference
                    .or_else(|| booking.payment_reference.clone())
                    .ok_or_else(|| {
                        EngineError::validation("a confirmed payment needs a payment_reference")
                    })?;
                let claim = self.store.claim_payment_ref(&reference, id)?;
                let event = Event::PaymentRecorded {
                    id,
                    date,
                    payment_status,
                    payment_reference: Some(reference),
                    status: BookingStatus::Confirmed,
                    at: self.now(),
                };
                self.persist_and_apply(&mut day, None, &event).await?;
                claim.commit();
                info!(reference = %booking.reference, "payment confirmed");
                return day.bookings.get(&id).cloned().ok_or_else(|| not_found(id));
            }
            PaymentStatus::Failed => {
                match booking.status {
                    BookingStatus::Cancelled => return Ok(booking),
                    BookingStatus::Pending => {}
                    other => {
                        return Err(EngineError::InvalidTransition {
                            from: other.as_str(),
                            action: "fail payment for",
                        });
                    }
                }
                Event::PaymentRecorded {
                    id,
                    date,
                    payment_status,
                    payment_reference,
                    status: BookingStatus::Cancelled,
                    at: self.now(),
                }
            }
        };
        self.persist_and_apply(&mut day, None, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(reference = %booking.reference, %date, "payment failed, booking cancelled");
        day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    // ── Front desk ───────────────────────────────────────────

    /// Hand concrete wheels to a booking for its session. `None` picks the
    /// lowest-numbered wheels in service that no overlapping booking holds.
    pub async fn assign_wheels(
        &self,
        id: Ulid,
        wheel_numbers: Option<Vec<u32>>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.enter().await?;
        let (date, mut day) = self.lock_booking_day(id).await?;
        let booking = day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;
        ensure_open(&booking, "assign wheels to")?;
        if booking.wheels == 0 {
            return Err(EngineError::validation("this booking holds no wheels"));
        }
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;

        let span = booking.span();
        let taken: HashSet<u32> = day
            .bookings
            .values()
            .filter(|b| b.id != id && b.status.holds_capacity() && b.span().overlaps(&span))
            .flat_map(|b| b.assigned_wheels.iter().copied())
            .collect();
        let free: Vec<u32> = config.wheels_in_service().filter(|n| !taken.contains(n)).collect();
        let needed = booking.wheels as usize;

        let wheels = match wheel_numbers {
            Some(mut chosen) => {
                chosen.sort_unstable();
                chosen.dedup();
                if chosen.len() != needed {
                    return Err(EngineError::validation(format!(
                        "booking holds {} wheel(s) but {} were given",
                        booking.wheels,
                        chosen.len()
                    )));
                }
                if let Some(n) = chosen.iter().find(|&&n| free.binary_search(&n).is_err()) {
                    return Err(EngineError::validation(format!(
                        "wheel {n} is not available for this session"
                    )));
                }
                chosen
            }
            None => {
                if free.len() < needed {
                    return Err(EngineError::CapacityExceeded {
                        needed: booking.wheels,
                        available: free.len() as u32,
                        total: config.usable_wheels(),
                    });
                }
                free[..needed].to_vec()
            }
        };
        if wheels == booking.assigned_wheels {
            return Ok(booking);
        }

        let event = Event::WheelsAssigned {
            id,
            date,
            wheels,
            at: self.now(),
        };
        self.persist_and_apply(&mut day, None, &event).await?;
        let booking = day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;
        info!(reference = %booking.reference, wheels = ?booking.assigned_wheels, "wheels assigned");
        Ok(booking)
    }

    /// Mark the party as arrived. Only possible on the day of the session;
    /// checking in twice keeps the first time.
    pub async fn check_in(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.enter().await?;
        let (date, mut day) = self.lock_booking_day(id).await?;
        let booking = day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;
        ensure_open(&booking, "check in")?;
        if booking.checked_in_at.is_some() {
            return Ok(booking);
        }
        let now = self.now();
        if now.date() != date {
            return Err(EngineError::validation(format!(
                "check-in is only possible on {date}"
            )));
        }

        let event = Event::CheckedIn { id, date, at: now };
        self.persist_and_apply(&mut day, None, &event).await?;
        info!(reference = %booking.reference, "checked in");
        day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// Mark the party as gone. Needs a check-in first; also allowed after
    /// the sweep has completed the booking.
    pub async fn check_out(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.enter().await?;
        let (date, mut day) = self.lock_booking_day(id).await?;
        let booking = day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(EngineError::InvalidTransition {
                from: booking.status.as_str(),
                action: "check out",
            });
        }
        if booking.checked_out_at.is_some() {
            return Ok(booking);
        }
        if booking.checked_in_at.is_none() {
            return Err(EngineError::validation("booking has not checked in"));
        }

        let event = Event::CheckedOut {
            id,
            date,
            at: self.now(),
        };
        self.persist_and_apply(&mut day, None, &event).await?;
        info!(reference = %booking.reference, "checked out");
        day.bookings.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// Ledger-free checks on a target slot. They run before the date's
    /// ledger is locked, which is what creates it, and are repeated under
    /// the lock.
    async fn precheck_target(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        party: Option<(&Package, u32)>,
        moving: Option<&Booking>,
    ) -> Result<(), EngineError> {
        if let Some(booking) = moving {
            ensure_open(booking, "reschedule")?;
        }
        let snapshot = self.config.snapshot().await;
        let config = &snapshot.config;
        if config.is_maintenance_mode {
            return Err(EngineError::MaintenanceMode(config.maintenance_message.clone()));
        }
        let now = self.now();
        if let Some(booking) = moving {
            check_cutoff(booking, config, now)?;
        }
        if let Some((package, people)) = party {
            validate_party(package, people, config)?;
        }
        let slots = generate_slots(config, date, now.date());
        check_target(config, &slots, date, minute_of(start_time), now)
    }

    /// Write-lock the ledger that currently owns booking `id`.
    async fn lock_booking_day(
        &self,
        id: Ulid,
    ) -> Result<(NaiveDate, OwnedRwLockWriteGuard<DayLedger>), EngineError> {
        for _ in 0..MAX_RELOCK_ATTEMPTS {
            let date = self.store.date_of(&id).ok_or_else(|| not_found(id))?;
            let day = self.lock_day(date).await?;
            if day.bookings.contains_key(&id) {
                return Ok((date, day));
            }
        }
        let date = self.store.date_of(&id).ok_or_else(|| not_found(id))?;
        Err(EngineError::Busy(date))
    }

    // ── Background maintenance ───────────────────────────────

    /// Move every confirmed or rescheduled booking that ended at or before
    /// `now` to completed. Returns how many were completed.
    pub async fn complete_elapsed(&self, now: NaiveDateTime) -> Result<usize, EngineError> {
        let due = |b: &Booking| {
            matches!(b.status, BookingStatus::Confirmed | BookingStatus::Rescheduled) && b.ends_at() <= now
        };
        let _gate = self.enter().await?;
        let mut completed = 0;
        for date in self.store.day_dates() {
            if date > now.date() {
                break;
            }
            match self.with_day(date, |day| day.bookings.values().any(due)).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(%date, "completion sweep skipped: {e}");
                    continue;
                }
            }
            let mut day = match self.lock_day(date).await {
                Ok(day) => day,
                Err(e) => {
                    debug!(%date, "completion sweep skipped: {e}");
                    continue;
                }
            };
            let ids: Vec<Ulid> = day.bookings.values().filter(|&b| due(b)).map(|b| b.id).collect();
            for id in ids {
                let event = Event::BookingCompleted { id, date, at: now };
                self.persist_and_apply(&mut day, None, &event).await?;
                completed += 1;
            }
        }
        if completed > 0 {
            metrics::counter!(crate::observability::BOOKINGS_COMPLETED_TOTAL).increment(completed as u64);
            info!(completed, "completed elapsed bookings");
        }
        Ok(completed)
    }

    /// Rewrite the WAL with only the events needed to recreate current state:
    /// the config, the catalog, and every booking as it stands now.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();
        events.push(Event::ConfigUpdated {
            config: self.config.snapshot().await.config.clone(),
        });
        for package in self.store.packages() {
            events.push(Event::PackageSaved { package });
        }
        for date in self.store.day_dates() {
            let Some(day) = self.store.get_day(&date) else { continue };
            let day = day.read().await;
            let mut bookings: Vec<&Booking> = day.bookings.values().collect();
            bookings.sort_by_key(|b| (b.created_at, b.id));
            events.extend(bookings.into_iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }
        let count = events.len();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
