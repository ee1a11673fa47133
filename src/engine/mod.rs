mod capacity;
pub mod config;
mod error;
mod mutations;
mod queries;
pub mod slots;
mod store;
pub mod validate;

pub use capacity::{check_capacity, check_daily_limit, peak_wheels, wheels_in_use_at};
pub use config::{ConfigPatch, ConfigSnapshot, ConfigStore};
pub use error::EngineError;
pub use queries::Page;
pub use store::{LedgerStore, SharedDayLedger};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch, rolled back as a unit on error.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = wal.commit(batch.iter().map(|(event, _)| event));
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        warn!(error = %e, events = batch.len(), "WAL flush failed, batch discarded");
    }
    respond_batch(batch, &result);
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Studio booking engine: configuration, package catalog and the per-date
/// booking ledgers, all rebuilt from the WAL on startup.
pub struct Engine {
    pub(super) store: LedgerStore,
    pub(super) config: ConfigStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an append.
    pub(super) commit_gate: RwLock<()>,
    #[cfg(test)]
    pub(super) fail_wal: std::sync::atomic::AtomicBool,
}

/// Apply a booking event to the ledger(s) it touches. The caller holds the
/// write lock of `day`, and of `target` for a move across dates.
fn apply_to_ledger(
    day: &mut DayLedger,
    target: Option<&mut DayLedger>,
    event: &Event,
    store: &LedgerStore,
) {
    match event {
        Event::BookingCreated { booking } => {
            if booking.status.holds_capacity() {
                day.insert_allocation(booking.allocation());
                if let Some(ref r) = booking.payment_reference {
                    store.index_payment_ref(r, booking.id);
                }
            }
            store.index_booking(booking);
            day.bookings.insert(booking.id, booking.clone());
        }
        Event::PaymentRecorded {
            id,
            payment_status,
            payment_reference,
            status,
            at,
            ..
        } => {
            let Some(b) = day.bookings.get_mut(id) else { return };
            if let Some(r) = payment_reference
                && let Some(old) = b.payment_reference.replace(r.clone())
                && old != *r
            {
                store.release_payment_ref(&old, *id);
            }
            b.payment_status = *payment_status;
            b.status = *status;
            b.updated_at = *at;
            if status.holds_capacity() {
                if let Some(ref r) = b.payment_reference {
                    store.index_payment_ref(r, *id);
                }
            } else {
                b.cancellation_reason = Some("payment failed".into());
                if let Some(ref r) = b.payment_reference {
                    store.release_payment_ref(r, *id);
                }
                day.remove_allocation(*id);
            }
        }
        Event::BookingRescheduled {
            id,
            to,
            start_time,
            end_time,
            status,
            at,
            ..
        } => {
            let Some(mut b) = day.bookings.remove(id) else { return };
            day.remove_allocation(*id);
            b.date = *to;
            b.start_time = *start_time;
            b.end_time = *end_time;
            b.status = *status;
            b.assigned_wheels.clear();
            b.updated_at = *at;
            let dest = target.unwrap_or(day);
            dest.insert_allocation(b.allocation());
            dest.bookings.insert(*id, b);
            store.move_booking(*id, *to);
        }
        Event::BookingCancelled { id, reason, at, .. } => {
            let Some(b) = day.bookings.get_mut(id) else { return };
            b.status = BookingStatus::Cancelled;
            b.cancellation_reason = reason.clone();
            b.updated_at = *at;
            if let Some(ref r) = b.payment_reference {
                store.release_payment_ref(r, *id);
            }
            day.remove_allocation(*id);
        }
        Event::BookingCompleted { id, at, .. } => {
            if let Some(b) = day.bookings.get_mut(id) {
                b.status = BookingStatus::Completed;
                b.updated_at = *at;
            }
        }
        Event::WheelsAssigned { id, wheels, at, .. } => {
            if let Some(b) = day.bookings.get_mut(id) {
                b.assigned_wheels = wheels.clone();
                b.updated_at = *at;
            }
        }
        Event::CheckedIn { id, at, .. } => {
            if let Some(b) = day.bookings.get_mut(id) {
                b.checked_in_at = Some(*at);
                b.updated_at = *at;
            }
        }
        Event::CheckedOut { id, at, .. } => {
            if let Some(b) = day.bookings.get_mut(id) {
                b.checked_out_at = Some(*at);
                b.updated_at = *at;
            }
        }
        // Studio-wide events never reach a ledger.
        Event::ConfigUpdated { .. } | Event::PackageSaved { .. } => {}
    }
}

/// (source date, destination date) of a booking event.
fn event_dates(event: &Event) -> Option<(NaiveDate, NaiveDate)> {
    match event {
        Event::BookingCreated { booking } => Some((booking.date, booking.date)),
        Event::PaymentRecorded { date, .. }
        | Event::BookingCancelled { date, .. }
        | Event::BookingCompleted { date, .. }
        | Event::WheelsAssigned { date, .. }
        | Event::CheckedIn { date, .. }
        | Event::CheckedOut { date, .. } => Some((*date, *date)),
        Event::BookingRescheduled { from, to, .. } => Some((*from, *to)),
        Event::ConfigUpdated { .. } | Event::PackageSaved { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: LedgerStore::new(),
            config: ConfigStore::new(StudioConfig::default()),
            wal_tx,
            clock,
            lock_timeout,
            commit_gate: RwLock::new(()),
            #[cfg(test)]
            fail_wal: std::sync::atomic::AtomicBool::new(false),
        };

        // Replay into plain ledgers; nothing else can see them yet.
        let mut days: HashMap<NaiveDate, DayLedger> = HashMap::new();
        for event in &events {
            match event {
                Event::ConfigUpdated { config } => engine.config.replace_uncontended(config.clone()),
                Event::PackageSaved { package } => engine.store.put_package(package.clone()),
                other => {
                    let Some((from, to)) = event_dates(other) else { continue };
                    let mut day = days.remove(&from).unwrap_or_else(|| DayLedger::new(from));
                    if from == to {
                        apply_to_ledger(&mut day, None, other, &engine.store);
                    } else {
                        let target = days.entry(to).or_insert_with(|| DayLedger::new(to));
                        apply_to_ledger(&mut day, Some(target), other, &engine.store);
                    }
                    days.insert(from, day);
                }
            }
        }
        for (_, day) in days {
            engine.store.insert_day(day);
        }

        info!(
            events = events.len(),
            bookings = engine.store.booking_count(),
            packages = engine.store.package_count(),
            "engine state replayed from WAL"
        );
        Ok(engine)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    pub async fn config_snapshot(&self) -> Arc<ConfigSnapshot> {
        self.config.snapshot().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        #[cfg(test)]
        if self.fail_wal.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::WalError("injected WAL failure".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. Nothing in memory changes if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayLedger,
        target: Option<&mut DayLedger>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(day, target, event, &self.store);
        Ok(())
    }

    pub(super) async fn persist_studio_event(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await
    }

    /// Admission to the write path, bounded by the lock timeout.
    pub(super) async fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        tokio::time::timeout(self.lock_timeout, self.commit_gate.read())
            .await
            .map_err(|_| {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::Busy(self.today())
            })
    }

    /// Write-lock the ledger for `date`, giving up after the lock timeout.
    pub(super) async fn lock_day(
        &self,
        date: NaiveDate,
    ) -> Result<OwnedRwLockWriteGuard<DayLedger>, EngineError> {
        let day = self.store.day_or_create(date);
        match tokio::time::timeout(self.lock_timeout, day.write_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(%date, "timed out waiting for day ledger lock");
                Err(EngineError::Busy(date))
            }
        }
    }

    /// Run `f` against the ledger for `date` under its read lock. Dates nobody
    /// booked yet read as an empty ledger without being created.
    pub(super) async fn with_day<R>(
        &self,
        date: NaiveDate,
        f: impl FnOnce(&DayLedger) -> R,
    ) -> Result<R, EngineError> {
        let Some(day) = self.store.get_day(&date) else {
            return Ok(f(&DayLedger::new(date)));
        };
        match tokio::time::timeout(self.lock_timeout, day.read()).await {
            Ok(guard) => Ok(f(&guard)),
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(%date, "timed out waiting for day ledger read lock");
                Err(EngineError::Busy(date))
            }
        }
    }

    /// Resolve a booking id or `IM-...` reference to the booking id.
    pub fn resolve_booking_id(&self, key: &str) -> Option<Ulid> {
        if let Ok(id) = key.parse::<Ulid>()
            && self.store.date_of(&id).is_some()
        {
            return Some(id);
        }
        self.store.id_for_reference(key)
    }
}
