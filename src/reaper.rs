use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that completes bookings whose session has ended.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let now = engine.now();
        match engine.complete_elapsed(now).await {
            Ok(0) => debug!("completion sweep: nothing due"),
            Ok(n) => info!(completed = n, "completion sweep"),
            Err(e) => warn!("completion sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once `threshold` appends piled up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("wheelhouse_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_completes_finished_sessions() {
        let day = NaiveDate::from_ymd_opt(2030, 6, 3).unwrap();
        let clock = Arc::new(ManualClock::new(day.and_hms_opt(7, 0, 0).unwrap()));
        let engine = Arc::new(
            Engine::new(
                test_wal_path("sweeper.wal"),
                clock.clone(),
                Duration::from_secs(2),
            )
            .unwrap(),
        );
        engine
            .save_package(Package {
                id: 1,
                name: "Wheel Throwing".into(),
                code: String::new(),
                package_type: PackageType::WheelThrowing,
                price: Decimal::new(3000, 0),
                max_participants: 4,
                requires_wheel: true,
                duration_minutes: None,
                is_active: true,
            })
            .await
            .unwrap();
        let booking = engine
            .create_booking(BookingRequest {
                package_id: 1,
                number_of_people: 2,
                date: day,
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                customer_name: "Njeri".into(),
                customer_phone: "0712345678".into(),
                customer_email: "njeri@example.com".into(),
                special_requests: None,
                payment_reference: Some("RKT55XYZ".into()),
                payment_status: PaymentStatus::Confirmed,
            })
            .await
            .unwrap();

        clock.set(day.and_hms_opt(9, 30, 0).unwrap());
        let sweeper = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        let mut status = BookingStatus::Confirmed;
        for _ in 0..100 {
            status = engine.booking_by_id(booking.id).await.unwrap().status;
            if status == BookingStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();
        assert_eq!(status, BookingStatus::Completed);
    }
}
