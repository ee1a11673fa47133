use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub type SharedDayLedger = Arc<RwLock<DayLedger>>;

/// In-memory state shared by every date: the per-date ledgers plus the
/// reverse indexes needed to find a booking without knowing its date.
pub struct LedgerStore {
    days: DashMap<NaiveDate, SharedDayLedger>,
    /// booking id → the date whose ledger owns it
    booking_dates: DashMap<Ulid, NaiveDate>,
    /// human reference → booking id
    references: DashMap<String, Ulid>,
    /// payment reference → booking id, non-cancelled bookings only
    payment_refs: DashMap<String, Ulid>,
    /// booked date → last reference sequence handed out
    reference_seq: DashMap<NaiveDate, u32>,
    packages: DashMap<u32, Package>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            booking_dates: DashMap::new(),
            references: DashMap::new(),
            payment_refs: DashMap::new(),
            reference_seq: DashMap::new(),
            packages: DashMap::new(),
        }
    }

    // ── Day ledgers ──────────────────────────────────────────

    pub fn get_day(&self, date: &NaiveDate) -> Option<SharedDayLedger> {
        self.days.get(date).map(|e| e.value().clone())
    }

    /// Ledger for `date`, created empty on first write.
    pub fn day_or_create(&self, date: NaiveDate) -> SharedDayLedger {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(date))))
            .clone()
    }

    pub fn insert_day(&self, day: DayLedger) {
        self.days.insert(day.date, Arc::new(RwLock::new(day)));
    }

    pub fn day_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        dates
    }

    // ── Booking index ────────────────────────────────────────

    pub fn date_of(&self, booking_id: &Ulid) -> Option<NaiveDate> {
        self.booking_dates.get(booking_id).map(|e| *e.value())
    }

    pub fn id_for_reference(&self, reference: &str) -> Option<Ulid> {
        self.references.get(reference).map(|e| *e.value())
    }

    pub fn index_booking(&self, booking: &Booking) {
        self.booking_dates.insert(booking.id, booking.date);
        self.references.insert(booking.reference.clone(), booking.id);
        self.observe_reference(&booking.reference);
    }

    pub fn move_booking(&self, booking_id: Ulid, date: NaiveDate) {
        self.booking_dates.insert(booking_id, date);
    }

    pub fn booking_count(&self) -> usize {
        self.booking_dates.len()
    }

    // ── Booking references ───────────────────────────────────

    /// Hand out the next `IM-YYYYMMDD-NNNN` for a session booked on `booked`.
    /// Sequences are never reused, even if the booking then fails to commit
    /// or later moves to another date.
    pub fn next_reference(&self, booked: NaiveDate) -> String {
        let mut seq = self.reference_seq.entry(booked).or_insert(0);
        *seq += 1;
        format_reference(booked, *seq)
    }

    fn observe_reference(&self, reference: &str) {
        if let Some((date, seq)) = parse_reference(reference) {
            let mut last = self.reference_seq.entry(date).or_insert(0);
            if *last < seq {
                *last = seq;
            }
        }
    }

    // ── Payment references ───────────────────────────────────

    /// Atomically claim `reference` for `booking_id`. Succeeds without taking
    /// a new claim if the booking already owns it.
    pub fn claim_payment_ref(
        &self,
        reference: &str,
        booking_id: Ulid,
    ) -> Result<PaymentRefClaim<'_>, EngineError> {
        match self.payment_refs.entry(reference.to_string()) {
            Entry::Occupied(e) if *e.get() == booking_id => Ok(PaymentRefClaim {
                store: self,
                reference: None,
                booking_id,
            }),
            Entry::Occupied(_) => Err(EngineError::DuplicatePaymentReference(
                reference.to_string(),
            )),
            Entry::Vacant(e) => {
                e.insert(booking_id);
                Ok(PaymentRefClaim {
                    store: self,
                    reference: Some(reference.to_string()),
                    booking_id,
                })
            }
        }
    }

    pub fn index_payment_ref(&self, reference: &str, booking_id: Ulid) {
        self.payment_refs.insert(reference.to_string(), booking_id);
    }

    /// Drop the index entry, but only if it still belongs to `booking_id`.
    pub fn release_payment_ref(&self, reference: &str, booking_id: Ulid) {
        self.payment_refs
            .remove_if(reference, |_, owner| *owner == booking_id);
    }

    pub fn payment_ref_owner(&self, reference: &str) -> Option<Ulid> {
        self.payment_refs.get(reference).map(|e| *e.value())
    }

    // ── Packages ─────────────────────────────────────────────

    pub fn get_package(&self, id: u32) -> Option<Package> {
        self.packages.get(&id).map(|e| e.value().clone())
    }

    pub fn put_package(&self, package: Package) {
        self.packages.insert(package.id, package);
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Packages ordered by code, then id.
    pub fn packages(&self) -> Vec<Package> {
        let mut all: Vec<Package> = self.packages.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));
        all
    }
}

/// A payment reference held for a booking that is not committed yet.
/// Dropping it without [`PaymentRefClaim::commit`] gives the reference back.
pub struct PaymentRefClaim<'a> {
    store: &'a LedgerStore,
    reference: Option<String>,
    booking_id: Ulid,
}

impl PaymentRefClaim<'_> {
    pub fn commit(mut self) {
        self.reference = None;
    }
}

impl Drop for PaymentRefClaim<'_> {
    fn drop(&mut self) {
        if let Some(reference) = self.reference.take() {
            self.store.release_payment_ref(&reference, self.booking_id);
        }
    }
}
