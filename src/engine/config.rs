use std::sync::Arc;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::StudioConfig;

use super::EngineError;

/// Configuration as seen by one operation. Cheap to clone and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: StudioConfig,
}

/// Process-wide studio configuration. Readers take an `Arc` snapshot;
/// writers serialize on the lock and bump the version.
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(config: StudioConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot { version: 1, config })),
        }
    }

    pub async fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().await.clone()
    }

    pub(super) async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Arc<ConfigSnapshot>> {
        self.current.write().await
    }

    /// Replay path: install without validation, the WAL only holds validated configs.
    pub(super) fn replace_uncontended(&self, config: StudioConfig) {
        if let Ok(mut guard) = self.current.try_write() {
            let version = guard.version + 1;
            *guard = Arc::new(ConfigSnapshot { version, config });
        }
    }
}

/// Partial update, every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    pub total_wheels: Option<u32>,
    pub booking_fee_per_person: Option<Decimal>,
    pub operating_time: Option<NaiveTime>,
    pub closing_time: Option<NaiveTime>,
    pub buffer_minutes_between_sessions: Option<u32>,
    pub max_daily_sessions: Option<u32>,
    pub wheel_session_duration: Option<u32>,
    pub is_maintenance_mode: Option<bool>,
    pub maintenance_message: Option<String>,
    pub booking_horizon_days: Option<u32>,
    pub reschedule_cutoff_hours: Option<u32>,
    pub wheels_out_of_service: Option<Vec<u32>>,
}

impl ConfigPatch {
    pub fn apply(self, base: &StudioConfig) -> StudioConfig {
        let mut out_of_service = self
            .wheels_out_of_service
            .unwrap_or_else(|| base.wheels_out_of_service.clone());
        out_of_service.sort_unstable();
        out_of_service.dedup();
        StudioConfig {
            total_wheels: self.total_wheels.unwrap_or(base.total_wheels),
            booking_fee_per_person: self
                .booking_fee_per_person
                .unwrap_or(base.booking_fee_per_person),
            operating_time: self.operating_time.unwrap_or(base.operating_time),
            closing_time: self.closing_time.unwrap_or(base.closing_time),
            buffer_minutes_between_sessions: self
                .buffer_minutes_between_sessions
                .unwrap_or(base.buffer_minutes_between_sessions),
            max_daily_sessions: self.max_daily_sessions.unwrap_or(base.max_daily_sessions),
            wheel_session_duration: self
                .wheel_session_duration
                .unwrap_or(base.wheel_session_duration),
            is_maintenance_mode: self.is_maintenance_mode.unwrap_or(base.is_maintenance_mode),
            maintenance_message: self
                .maintenance_message
                .unwrap_or_else(|| base.maintenance_message.clone()),
            booking_horizon_days: self.booking_horizon_days.unwrap_or(base.booking_horizon_days),
            reschedule_cutoff_hours: self
                .reschedule_cutoff_hours
                .unwrap_or(base.reschedule_cutoff_hours),
            wheels_out_of_service: out_of_service,
        }
    }
}

pub fn validate_config(c: &StudioConfig) -> Result<(), EngineError> {
    if c.total_wheels == 0 || c.total_wheels > MAX_WHEELS {
        return Err(EngineError::validation(format!(
            "total_wheels must be between 1 and {MAX_WHEELS}"
        )));
    }
    if c.booking_fee_per_person.is_sign_negative() {
        return Err(EngineError::validation("booking_fee_per_person must not be negative"));
    }
    if c.operating_time >= c.closing_time {
        return Err(EngineError::validation("operating_time must be before closing_time"));
    }
    if c.max_daily_sessions == 0 || c.max_daily_sessions > MAX_DAILY_SESSIONS {
        return Err(EngineError::validation(format!(
            "max_daily_sessions must be between 1 and {MAX_DAILY_SESSIONS}"
        )));
    }
    if c.wheel_session_duration == 0 || c.wheel_session_duration > crate::model::MINUTES_PER_DAY {
        return Err(EngineError::validation(
            "wheel_session_duration must be a positive number of minutes within a day",
        ));
    }
    if c.buffer_minutes_between_sessions > crate::model::MINUTES_PER_DAY {
        return Err(EngineError::validation(
            "buffer_minutes_between_sessions must fit within a day",
        ));
    }
    if c.maintenance_message.len() > MAX_MAINTENANCE_MESSAGE_LEN {
        return Err(EngineError::LimitExceeded("maintenance message too long"));
    }
    if c.booking_horizon_days == 0 || c.booking_horizon_days > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::validation(format!(
            "booking_horizon_days must be between 1 and {MAX_BOOKING_HORIZON_DAYS}"
        )));
    }
    if c.reschedule_cutoff_hours > MAX_RESCHEDULE_CUTOFF_HOURS {
        return Err(EngineError::validation(format!(
            "reschedule_cutoff_hours must be at most {MAX_RESCHEDULE_CUTOFF_HOURS}"
        )));
    }
    if let Some(n) = c
        .wheels_out_of_service
        .iter()
        .find(|&&n| n == 0 || n > c.total_wheels)
    {
        return Err(EngineError::validation(format!(
            "wheel {n} is not one of the studio's {} wheels",
            c.total_wheels
        )));
    }
    if !c.wheels_out_of_service.is_sorted_by(|a, b| a < b) {
        return Err(EngineError::validation("wheels_out_of_service must not repeat a wheel"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&StudioConfig::default()).is_ok());
    }

    #[test]
    fn rejects_inverted_hours() {
        let c = StudioConfig {
            operating_time: t(18, 0),
            closing_time: t(8, 0),
            ..StudioConfig::default()
        };
        assert!(matches!(validate_config(&c), Err(EngineError::Validation(_))));
    }

    #[test]
    fn rejects_zero_wheels_and_zero_sessions() {
        let c = StudioConfig {
            total_wheels: 0,
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
        let c = StudioConfig {
            max_daily_sessions: 0,
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
        let c = StudioConfig {
            wheel_session_duration: 0,
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_negative_fee() {
        let c = StudioConfig {
            booking_fee_per_person: Decimal::new(-1, 0),
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn session_longer_than_window_is_still_valid() {
        // Yields zero slots rather than an error.
        let c = StudioConfig {
            operating_time: t(8, 0),
            closing_time: t(8, 30),
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_ok());
    }

    #[test]
    fn patch_overrides_only_given_fields() {
        let base = StudioConfig::default();
        let patch = ConfigPatch {
            total_wheels: Some(4),
            is_maintenance_mode: Some(true),
            maintenance_message: Some("Kiln repairs".into()),
            ..ConfigPatch::default()
        };
        let next = patch.apply(&base);
        assert_eq!(next.total_wheels, 4);
        assert!(next.is_maintenance_mode);
        assert_eq!(next.maintenance_message, "Kiln repairs");
        assert_eq!(next.operating_time, base.operating_time);
        assert_eq!(next.wheel_session_duration, base.wheel_session_duration);
    }

    #[test]
    fn out_of_service_wheels_are_normalized_and_checked() {
        let patch = ConfigPatch {
            wheels_out_of_service: Some(vec![5, 2, 5]),
            ..ConfigPatch::default()
        };
        let next = patch.apply(&StudioConfig::default());
        assert_eq!(next.wheels_out_of_service, vec![2, 5]);
        assert_eq!(next.usable_wheels(), 6);
        assert!(validate_config(&next).is_ok());

        let c = StudioConfig {
            wheels_out_of_service: vec![9],
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
        let c = StudioConfig {
            wheels_out_of_service: vec![3, 3],
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn booking_rules_are_bounded() {
        let c = StudioConfig {
            booking_horizon_days: 0,
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
        let c = StudioConfig {
            reschedule_cutoff_hours: MAX_RESCHEDULE_CUTOFF_HOURS + 1,
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_err());
        let c = StudioConfig {
            reschedule_cutoff_hours: 0,
            ..StudioConfig::default()
        };
        assert!(validate_config(&c).is_ok());
    }

    #[test]
    fn patch_deserializes_from_json() {
        let patch: ConfigPatch = serde_json::from_str(
            r#"{"closing_time": "17:30:00", "booking_fee_per_person": "1500.00"}"#,
        )
        .unwrap();
        assert_eq!(patch.closing_time, Some(t(17, 30)));
        assert_eq!(patch.booking_fee_per_person, Some(Decimal::new(150000, 2)));
        assert!(serde_json::from_str::<ConfigPatch>(r#"{"bogus": 1}"#).is_err());
    }

    #[tokio::test]
    async fn store_bumps_version_on_replace() {
        let store = ConfigStore::new(StudioConfig::default());
        assert_eq!(store.snapshot().await.version, 1);
        store.replace_uncontended(StudioConfig {
            total_wheels: 3,
            ..StudioConfig::default()
        });
        let snap = store.snapshot().await;
        assert_eq!(snap.version, 2);
        assert_eq!(snap.config.total_wheels, 3);
    }
}
