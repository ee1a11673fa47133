use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Process settings, read from `STUDIO_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub lock_timeout: Duration,
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    /// Studio local time as an offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            lock_timeout: Duration::from_millis(2000),
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            utc_offset_minutes: 180,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparsable {key}={raw:?}, using default");
            default
        }),
    }
}

impl Settings {
    /// Load from the process environment, after a `.env` file if one exists.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let metrics_port = lookup("STUDIO_METRICS_PORT").and_then(|raw| {
            raw.trim()
                .parse()
                .inspect_err(|_| warn!("ignoring unparsable STUDIO_METRICS_PORT={raw:?}"))
                .ok()
        });
        Self {
            bind: lookup("STUDIO_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "STUDIO_PORT", d.port),
            data_dir: lookup("STUDIO_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port,
            lock_timeout: Duration::from_millis(parsed(
                &lookup,
                "STUDIO_LOCK_TIMEOUT_MS",
                d.lock_timeout.as_millis() as u64,
            )),
            compact_threshold: parsed(&lookup, "STUDIO_COMPACT_THRESHOLD", d.compact_threshold),
            sweep_interval: Duration::from_secs(
                parsed(&lookup, "STUDIO_SWEEP_INTERVAL_SECS", d.sweep_interval.as_secs()).max(1),
            ),
            utc_offset_minutes: parsed(&lookup, "STUDIO_UTC_OFFSET_MINUTES", d.utc_offset_minutes),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("studio.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let s = from(&[]);
        assert_eq!(s, Settings::default());
        assert_eq!(s.addr(), "0.0.0.0:8000");
        assert_eq!(s.wal_path(), PathBuf::from("./data/studio.wal"));
    }

    #[test]
    fn reads_overrides() {
        let s = from(&[
            ("STUDIO_BIND", "127.0.0.1"),
            ("STUDIO_PORT", "9100"),
            ("STUDIO_DATA_DIR", "/var/lib/studio"),
            ("STUDIO_METRICS_PORT", "9464"),
            ("STUDIO_LOCK_TIMEOUT_MS", "250"),
            ("STUDIO_COMPACT_THRESHOLD", "50"),
            ("STUDIO_SWEEP_INTERVAL_SECS", "5"),
            ("STUDIO_UTC_OFFSET_MINUTES", "-300"),
        ]);
        assert_eq!(s.addr(), "127.0.0.1:9100");
        assert_eq!(s.data_dir, PathBuf::from("/var/lib/studio"));
        assert_eq!(s.metrics_port, Some(9464));
        assert_eq!(s.lock_timeout, Duration::from_millis(250));
        assert_eq!(s.compact_threshold, 50);
        assert_eq!(s.sweep_interval, Duration::from_secs(5));
        assert_eq!(s.utc_offset_minutes, -300);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let s = from(&[
            ("STUDIO_PORT", "eighty"),
            ("STUDIO_METRICS_PORT", "nope"),
            ("STUDIO_SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(s.port, 8000);
        assert_eq!(s.metrics_port, None);
        assert_eq!(s.sweep_interval, Duration::from_secs(1));
    }
}
