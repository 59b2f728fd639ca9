//! Shared types for the visor core.
//!
//! This module contains the data model used across the protocol layer and
//! the alert state machine:
//! - [`OperatingMode`] - the single process-wide Off/Ride/Guard selector
//! - [`InboundFrame`] / [`DecodedEvent`] - the wire-facing frame types
//! - [`GpsSample`] / [`Coordinate`] / [`ResolvedLocation`] - location types
//! - [`AlertRecord`] - the finished alert handed to the alert sink
//! - [`EngineSnapshot`] - the immutable state published on every transition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single process-wide operating mode.
///
/// Mutated only by explicit user selection; read by the frame decoder's
/// dispatch logic on every inbound frame. No history is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Device inactive; inbound frames are dropped.
    #[default]
    Off,
    /// Rider is moving; crash detection is the primary concern.
    Ride,
    /// Helmet is expected to remain stationary/unattended; disconnection
    /// and theft signals are the primary concern.
    Guard,
}

impl OperatingMode {
    /// The uppercase token used by the outbound `MODE:` wire command.
    #[must_use]
    pub const fn wire_token(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Ride => "RIDE",
            Self::Guard => "GUARD",
        }
    }
}

/// A WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate from decimal degrees.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A timestamped GPS observation.
///
/// Samples carry no equality semantics; they are always compared by
/// recency of `captured_at`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsSample {
    /// The observed coordinate.
    pub coordinate: Coordinate,
    /// When the observation was captured (UTC).
    pub captured_at: DateTime<Utc>,
}

/// One complete inbound text message delivered atomically by the transport.
///
/// Each transport notification carries exactly one logical message; frames
/// are never split or reassembled (a constraint of the wire format).
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// The frame payload as received.
    pub text: String,
    /// Arrival timestamp (UTC).
    pub received_at: DateTime<Utc>,
}

impl InboundFrame {
    /// Wrap a payload with the current arrival time.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// The typed interpretation of one inbound frame.
///
/// Derived deterministically by the frame decoder and never mutated.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    /// A crash keyword was present (highest priority, mode-independent).
    CrashSignal,
    /// A theft keyword was present. The raw text is retained because theft
    /// frames may embed a coordinate.
    TheftSignal {
        /// The trimmed original frame text.
        raw: String,
    },
    /// A GPS grammar parse succeeded (Guard mode only).
    Gps(GpsSample),
    /// No keyword matched and no grammar applied; the frame is dropped.
    Unrecognized,
}

/// Alert classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A crash countdown ran to completion or was proceeded manually.
    CrashDetected,
    /// The link dropped while in Guard mode.
    HelmetLeftBehind,
    /// A theft signal arrived from the sensor unit.
    PossibleTheft,
}

/// Alert severity. Only meaningful for [`AlertKind::CrashDetected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    Low,
    /// Needs attention.
    Medium,
    /// Life-safety relevant.
    High,
}

/// A best-effort location attached to an alert.
///
/// When no real fix is available the coordinate is `None` and the
/// description explains the degradation; [`coordinate_or_origin`] then
/// yields the (0.0, 0.0) placeholder so every alert path completes.
///
/// [`coordinate_or_origin`]: ResolvedLocation::coordinate_or_origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// A real coordinate, or `None` when only the placeholder is available.
    pub coordinate: Option<Coordinate>,
    /// Free-text description of how the location was obtained.
    pub description: String,
}

impl ResolvedLocation {
    /// A location backed by a real fix.
    #[must_use]
    pub fn fix(coordinate: Coordinate, description: impl Into<String>) -> Self {
        Self {
            coordinate: Some(coordinate),
            description: description.into(),
        }
    }

    /// The explicit "unavailable" placeholder.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            coordinate: None,
            description: "no GPS data available".to_string(),
        }
    }

    /// Whether this is the placeholder rather than a real fix.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        self.coordinate.is_none()
    }

    /// The coordinate, degraded to (0.0, 0.0) for the placeholder.
    #[must_use]
    pub fn coordinate_or_origin(&self) -> Coordinate {
        self.coordinate.unwrap_or(Coordinate::new(0.0, 0.0))
    }
}

/// A finished alert, handed to the alert sink on a terminal event.
///
/// Immutable once emitted except for the `read` flag, which the sink may
/// update later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Unique record id.
    pub id: Uuid,
    /// Alert classification.
    pub kind: AlertKind,
    /// Emission timestamp (UTC).
    pub created_at: DateTime<Utc>,
    /// Best-effort location.
    pub location: ResolvedLocation,
    /// Free-text detail.
    pub detail: String,
    /// Severity; only set for crash alerts.
    pub severity: Option<AlertSeverity>,
    /// Whether the user has seen this alert.
    pub read: bool,
}

impl AlertRecord {
    /// Build a crash alert. Severity is fixed at `High`.
    #[must_use]
    pub fn crash_detected(location: ResolvedLocation, detail: impl Into<String>) -> Self {
        Self::new(AlertKind::CrashDetected, location, detail, Some(AlertSeverity::High))
    }

    /// Build a helmet-left-behind alert.
    #[must_use]
    pub fn helmet_left_behind(location: ResolvedLocation, detail: impl Into<String>) -> Self {
        Self::new(AlertKind::HelmetLeftBehind, location, detail, None)
    }

    /// Build a possible-theft alert.
    #[must_use]
    pub fn possible_theft(location: ResolvedLocation, detail: impl Into<String>) -> Self {
        Self::new(AlertKind::PossibleTheft, location, detail, None)
    }

    fn new(
        kind: AlertKind,
        location: ResolvedLocation,
        detail: impl Into<String>,
        severity: Option<AlertSeverity>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at: Utc::now(),
            location,
            detail: detail.into(),
            severity,
            read: false,
        }
    }
}

/// Link-state transitions reported by the transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A logical session to the sensor unit is established.
    Established,
    /// The link dropped, with an optional transport-supplied reason.
    Lost {
        /// Transport error description, if any.
        reason: Option<String>,
    },
}

/// Snapshot of an active crash countdown, for state publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashSnapshot {
    /// Session id.
    pub session_id: Uuid,
    /// When the countdown was armed (UTC).
    pub started_at: DateTime<Utc>,
    /// Ticks remaining before auto-proceed.
    pub remaining_ticks: u8,
}

/// Immutable engine state, published on every transition over a
/// single-writer watch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct EngineSnapshot {
    /// Current operating mode.
    pub mode: OperatingMode,
    /// Whether the transport link is currently up.
    pub link_up: bool,
    /// The active crash countdown, if any.
    pub crash: Option<CrashSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tokens() {
        assert_eq!(OperatingMode::Off.wire_token(), "OFF");
        assert_eq!(OperatingMode::Ride.wire_token(), "RIDE");
        assert_eq!(OperatingMode::Guard.wire_token(), "GUARD");
    }

    #[test]
    fn test_placeholder_location_degrades_to_origin() {
        let loc = ResolvedLocation::unavailable();
        assert!(loc.is_placeholder());
        let origin = loc.coordinate_or_origin();
        assert_eq!(origin.latitude, 0.0);
        assert_eq!(origin.longitude, 0.0);
    }

    #[test]
    fn test_crash_alert_is_high_severity() {
        let alert = AlertRecord::crash_detected(ResolvedLocation::unavailable(), "impact");
        assert_eq!(alert.kind, AlertKind::CrashDetected);
        assert_eq!(alert.severity, Some(AlertSeverity::High));
        assert!(!alert.read);
    }

    #[test]
    fn test_non_crash_alerts_carry_no_severity() {
        let fix = ResolvedLocation::fix(Coordinate::new(1.0, 2.0), "last known");
        let alert = AlertRecord::helmet_left_behind(fix, "link lost in guard mode");
        assert_eq!(alert.severity, None);
        assert_eq!(alert.location.coordinate_or_origin().latitude, 1.0);
    }

    #[test]
    fn test_alert_record_serializes() {
        let alert = AlertRecord::possible_theft(ResolvedLocation::unavailable(), "theft signal");
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"possible_theft\""));
        assert!(json.contains("\"read\":false"));
    }
}
