//! Concrete collaborator implementations for the daemon host.
//!
//! Notification, cue, and emergency dispatch have no real delivery channel
//! on this host; they surface through the structured log so operators see
//! them. Alerts are persisted as JSON files organized by day. The daemon
//! process never suspends, so the execution extension is a counter-only
//! no-op.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Datelike, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use visor_core::{
    AlertRecord, AlertSink, Coordinate, CueSink, EmergencyCallSink, EmergencyContactSink,
    ExecutionExtension, ExecutionToken, LocationSource, NotificationSink,
};

/// Surfaces notifications through the log.
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn post_or_replace(&self, id: &str, title: &str, body: &str, urgent: bool) {
        info!(target: "visor::notify", id, title, body, urgent, "notification");
    }

    fn withdraw(&self, id: &str) {
        debug!(target: "visor::notify", id, "notification withdrawn");
    }
}

/// Surfaces cue pulses through the log.
pub struct LogCueSink;

impl CueSink for LogCueSink {
    fn pulse(&self) {
        debug!(target: "visor::cue", "cue pulse");
    }
}

/// Logs the emergency contact message instead of dispatching SMS.
pub struct LogEmergencyContactSink;

impl EmergencyContactSink for LogEmergencyContactSink {
    fn notify(&self, phone: &str, message: &str) {
        warn!(target: "visor::emergency", phone, message, "emergency contact message");
    }
}

/// Logs the emergency call instead of dialing.
pub struct LogEmergencyCallSink;

impl EmergencyCallSink for LogEmergencyCallSink {
    fn dial(&self, number: &str) {
        warn!(target: "visor::emergency", number, "emergency call requested");
    }
}

/// This host has no geolocation; every fix request answers `None` and the
/// engine degrades to link samples or the placeholder.
pub struct NoFixLocationSource;

impl LocationSource for NoFixLocationSource {
    fn request_fix(&self, reply: oneshot::Sender<Option<Coordinate>>) {
        let _ = reply.send(None);
    }
}

/// The daemon never suspends, so grants are tokens over a counter.
#[derive(Default)]
pub struct NoopExecutionExtension {
    next: AtomicU64,
}

impl ExecutionExtension for NoopExecutionExtension {
    fn acquire(&self) -> ExecutionToken {
        ExecutionToken::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn release(&self, token: ExecutionToken) {
        debug!(grant = token.id(), "execution grant released");
    }
}

/// Persists alerts as JSON files organized by day.
pub struct JsonAlertStore {
    data_dir: PathBuf,
}

impl JsonAlertStore {
    /// Create a store rooted at `data_dir`.
    #[must_use]
    pub const fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// The default data location.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/var/lib/visor")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "visor").map_or_else(
                || PathBuf::from("./visor-data"),
                |dirs| dirs.data_dir().to_path_buf(),
            )
        }
    }

    /// Load all alerts recorded on the given day.
    ///
    /// # Errors
    ///
    /// Returns an I/O or parse error when the day file exists but cannot
    /// be read.
    pub fn load_day(&self, day: DateTime<Utc>) -> anyhow::Result<Vec<AlertRecord>> {
        let path = self.day_path(day);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Flip the read flag on a stored alert. The record is otherwise
    /// immutable once emitted.
    ///
    /// # Errors
    ///
    /// Returns an error when the day file cannot be rewritten.
    pub fn mark_read(&self, day: DateTime<Utc>, id: Uuid) -> anyhow::Result<()> {
        let mut alerts = self.load_day(day)?;
        for alert in &mut alerts {
            if alert.id == id {
                alert.read = true;
            }
        }
        self.write_day(day, &alerts)
    }

    fn day_path(&self, day: DateTime<Utc>) -> PathBuf {
        self.data_dir
            .join("alerts")
            .join(format!("{}", day.year()))
            .join(format!("{:02}-{:02}.json", day.month(), day.day()))
    }

    fn write_day(&self, day: DateTime<Utc>, alerts: &[AlertRecord]) -> anyhow::Result<()> {
        let path = self.day_path(day);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(alerts)?)?;
        Ok(())
    }
}

impl AlertSink for JsonAlertStore {
    fn submit(&self, alert: AlertRecord) {
        let day = alert.created_at;
        let result = self
            .load_day(day)
            .and_then(|mut alerts| {
                alerts.push(alert);
                self.write_day(day, &alerts)
            });
        if let Err(err) = result {
            // Persistence failure must not block the alert path.
            warn!(error = %err, "failed to persist alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visor_core::ResolvedLocation;

    #[test]
    fn test_alert_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAlertStore::new(dir.path().to_path_buf());

        let alert = AlertRecord::possible_theft(ResolvedLocation::unavailable(), "theft signal");
        let day = alert.created_at;
        let id = alert.id;
        store.submit(alert);

        let loaded = store.load_day(day).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert!(!loaded[0].read);
    }

    #[test]
    fn test_alert_store_appends_within_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAlertStore::new(dir.path().to_path_buf());

        let first = AlertRecord::possible_theft(ResolvedLocation::unavailable(), "one");
        let day = first.created_at;
        store.submit(first);
        store.submit(AlertRecord::possible_theft(
            ResolvedLocation::unavailable(),
            "two",
        ));

        assert_eq!(store.load_day(day).unwrap().len(), 2);
    }

    #[test]
    fn test_mark_read_flips_only_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAlertStore::new(dir.path().to_path_buf());

        let first = AlertRecord::possible_theft(ResolvedLocation::unavailable(), "one");
        let second = AlertRecord::possible_theft(ResolvedLocation::unavailable(), "two");
        let day = first.created_at;
        let first_id = first.id;
        store.submit(first);
        store.submit(second);

        store.mark_read(day, first_id).unwrap();

        let loaded = store.load_day(day).unwrap();
        let read_flags: Vec<bool> = loaded.iter().map(|a| a.read).collect();
        assert_eq!(read_flags, vec![true, false]);
    }

    #[test]
    fn test_missing_day_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAlertStore::new(dir.path().to_path_buf());
        assert!(store.load_day(Utc::now()).unwrap().is_empty());
    }
}
