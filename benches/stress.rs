use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;

use wheelhouse::clock::ManualClock;
use wheelhouse::engine::{ConfigPatch, Engine, EngineError};
use wheelhouse::limits::MAX_BOOKING_HORIZON_DAYS;
use wheelhouse::model::{BookingRequest, Package, PackageType, PaymentStatus};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 1, 6).unwrap()
}

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("wheelhouse_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// A studio with one wheel package, 40 wheels and room for every slot.
async fn studio(name: &str) -> Arc<Engine> {
    let clock = Arc::new(ManualClock::new(
        first_day().pred_opt().unwrap().and_hms_opt(6, 0, 0).unwrap(),
    ));
    let engine = Engine::new(wal_path(name), clock, Duration::from_secs(5)).unwrap();
    engine
        .update_config(ConfigPatch {
            total_wheels: Some(40),
            max_daily_sessions: Some(1000),
            booking_horizon_days: Some(MAX_BOOKING_HORIZON_DAYS),
            ..Default::default()
        })
        .await
        .unwrap();
    engine
        .save_package(Package {
            id: 1,
            name: "Wheel Throwing".into(),
            code: String::new(),
            package_type: PackageType::WheelThrowing,
            price: Decimal::new(3500, 0),
            max_participants: 10,
            requires_wheel: true,
            duration_minutes: None,
            is_active: true,
        })
        .await
        .unwrap();
    Arc::new(engine)
}

/// Session starts under the default 60 + 15 minute grid from 08:00.
fn slot(i: usize) -> NaiveTime {
    let minutes = 8 * 60 + (i % 8) as u32 * 75;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap()
}

fn request(date: NaiveDate, start: NaiveTime, people: u32, n: usize) -> BookingRequest {
    BookingRequest {
        package_id: 1,
        number_of_people: people,
        date,
        start_time: start,
        customer_name: format!("Guest {n}"),
        customer_phone: format!("+2547{:08}", n % 100_000_000),
        customer_email: format!("guest{n}@example.com"),
        special_requests: None,
        payment_reference: None,
        payment_status: PaymentStatus::Pending,
    }
}

async fn phase1_sequential() {
    let engine = studio("sequential.wal").await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let date = first_day() + chrono::Duration::days((i / 8) as i64);
        let t = Instant::now();
        engine
            .create_booking(request(date, slot(i), 2, i))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contended() {
    let engine = studio("contended.wal").await;
    let n_tasks = 50;
    let per_task = 20;
    let admitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let admitted = admitted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..per_task {
                let n = task * per_task + j;
                match engine.create_booking(request(first_day(), slot(n), 3, n)).await {
                    Ok(_) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::CapacityExceeded { .. }) => rejected.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * per_task;
    let admitted = admitted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {per_task} attempts on one date = {total} in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  admitted={admitted}, rejected={}",
        rejected.load(Ordering::Relaxed)
    );
    // 40 wheels / 3 per party = 13 parties per session, 8 sessions.
    assert_eq!(admitted, 13 * 8, "capacity must never be oversold");
}

async fn phase3_reads_under_load() {
    let engine = studio("reads.wal").await;
    for i in 0..200 {
        let date = first_day() + chrono::Duration::days((i / 8) as i64);
        engine.create_booking(request(date, slot(i), 1, i)).await.unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let date = first_day() + chrono::Duration::days(100 + (w * 600 + i / 8) as i64);
                let _ = engine.create_booking(request(date, slot(i), 1, w * 100_000 + i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = first_day() + chrono::Duration::days(((r + i) % 25) as i64);
                let t = Instant::now();
                engine.available_slots(date, 1, 2).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        h.await.unwrap();
    }
    print_latency("available_slots latency under write load", &mut all);
}

async fn phase4_compaction() {
    let engine = studio("compaction.wal").await;
    for i in 0..1000 {
        let date = first_day() + chrono::Duration::days((i / 8) as i64);
        let b = engine.create_booking(request(date, slot(i), 1, i)).await.unwrap();
        if i % 2 == 0 {
            engine.cancel_booking(b.id, None).await.unwrap();
        }
    }
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_wal().await.unwrap();
    println!(
        "  compacted {appends} appends in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("phase 1: sequential creates across dates");
    phase1_sequential().await;
    println!("phase 2: contended creates on one date");
    phase2_contended().await;
    println!("phase 3: slot listing under write load");
    phase3_reads_under_load().await;
    println!("phase 4: WAL compaction");
    phase4_compaction().await;
}
