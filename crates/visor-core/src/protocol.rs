//! Wire text protocol: inbound frame decoding and outbound commands.
//!
//! The sensor unit speaks a loosely structured text protocol, one complete
//! logical message per transport notification:
//!
//! | Pattern (case-insensitive substring) | Event |
//! |---|---|
//! | `CRASH`, `CRSH`, `CRAS`, `CRASHE` | crash signal |
//! | `THEFT`, `THFT`, `THEF` | theft signal (raw text retained) |
//! | `GPS:<lat>,<lon>` | GPS sample |
//! | `LAT:<lat>,LON:<lon>` (keys in either order) | GPS sample |
//! | anything else | unrecognized, dropped |
//!
//! Crash detection runs unconditionally and takes priority over theft; a
//! frame containing both keyword families is classified as a crash signal
//! only. The GPS grammars are attempted only in Guard mode.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{Result, VisorError};
use crate::types::{Coordinate, DecodedEvent, GpsSample, InboundFrame, OperatingMode};

/// Maximum single-write size of the reference transport, in bytes.
pub const DEFAULT_MAX_WRITE_LEN: usize = 20;

/// Keyword families, matched as substrings of the normalized frame text.
/// The truncated spellings tolerate dropped characters on the wire.
const CRASH_KEYWORDS: [&str; 4] = ["CRASH", "CRSH", "CRAS", "CRASHE"];
const THEFT_KEYWORDS: [&str; 3] = ["THEFT", "THFT", "THEF"];

static GPS_GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)GPS:\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)")
        .expect("hard-coded GPS grammar is valid")
});

static LAT_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)LAT:\s*(-?\d+(?:\.\d+)?)").expect("hard-coded LAT grammar is valid")
});

static LON_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)LON:\s*(-?\d+(?:\.\d+)?)").expect("hard-coded LON grammar is valid")
});

/// Build an [`InboundFrame`] from raw transport bytes.
///
/// # Errors
///
/// Returns [`VisorError::MalformedFrame`] when the payload is not valid
/// UTF-8. Such frames are dropped by the caller and logged only.
pub fn frame_from_bytes(bytes: &[u8]) -> Result<InboundFrame> {
    let text = std::str::from_utf8(bytes).map_err(|e| VisorError::MalformedFrame {
        reason: format!("payload is not valid UTF-8: {e}"),
    })?;
    Ok(InboundFrame::new(text))
}

/// Decode one inbound frame into a typed event.
///
/// Decoding is pure text matching, case-insensitive, on the
/// whitespace-trimmed payload. Crash keywords win over theft keywords;
/// the GPS grammars are only attempted in Guard mode. In Ride and Off
/// mode a keyword-free frame is unrecognized and dropped.
#[must_use]
pub fn decode(frame: &InboundFrame, mode: OperatingMode) -> DecodedEvent {
    let trimmed = frame.text.trim();
    let normalized = trimmed.to_ascii_uppercase();

    if contains_any(&normalized, &CRASH_KEYWORDS) {
        // Crash silently wins: theft is never separately raised for a
        // frame carrying both keyword families.
        return DecodedEvent::CrashSignal;
    }

    if contains_any(&normalized, &THEFT_KEYWORDS) {
        return DecodedEvent::TheftSignal {
            raw: trimmed.to_string(),
        };
    }

    match mode {
        OperatingMode::Guard => parse_gps(trimmed, frame.received_at)
            .map_or(DecodedEvent::Unrecognized, DecodedEvent::Gps),
        OperatingMode::Ride | OperatingMode::Off => {
            // The original firmware companion re-scanned Ride-mode frames
            // for the plain crash keyword here; that scan is unreachable
            // because the unconditional check above always fires first.
            DecodedEvent::Unrecognized
        }
    }
}

/// Parse a GPS sample from text using either wire grammar.
///
/// Accepts `GPS:<lat>,<lon>` or `LAT:<lat>,LON:<lon>` with the keyed form
/// tolerating the keys in either order. Both grammars yield identical
/// samples.
#[must_use]
pub fn parse_gps(text: &str, captured_at: DateTime<Utc>) -> Option<GpsSample> {
    extract_coordinate(text).map(|coordinate| GpsSample {
        coordinate,
        captured_at,
    })
}

/// Extract a coordinate embedded anywhere in `text`, if present.
///
/// Used both for Guard-mode GPS frames and for coordinates embedded in
/// theft messages.
#[must_use]
pub fn extract_coordinate(text: &str) -> Option<Coordinate> {
    if let Some(caps) = GPS_GRAMMAR.captures(text) {
        let latitude = caps[1].parse().ok()?;
        let longitude = caps[2].parse().ok()?;
        return Some(Coordinate::new(latitude, longitude));
    }

    // Keyed grammar: both keys required, order within the string free.
    let lat_caps = LAT_KEY.captures(text)?;
    let lon_caps = LON_KEY.captures(text)?;
    let latitude = lat_caps[1].parse().ok()?;
    let longitude = lon_caps[1].parse().ok()?;
    Some(Coordinate::new(latitude, longitude))
}

/// Encode the outbound mode command, truncated to the transport's maximum
/// single-write size.
#[must_use]
pub fn mode_command(mode: OperatingMode, max_write_len: usize) -> Vec<u8> {
    let mut payload = format!("MODE:{}", mode.wire_token()).into_bytes();
    if payload.len() > max_write_len {
        debug!(
            len = payload.len(),
            max_write_len, "truncating outbound command to transport write size"
        );
        payload.truncate(max_write_len);
    }
    payload
}

/// Split an arbitrary outbound payload into transport-sized chunks.
///
/// The protocol's own commands fit a single write; this exists for
/// transports that require the sender to chunk longer payloads.
#[must_use]
pub fn chunk_payload(payload: &[u8], max_write_len: usize) -> Vec<Vec<u8>> {
    if max_write_len == 0 {
        return Vec::new();
    }
    payload
        .chunks(max_write_len)
        .map(<[u8]>::to_vec)
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
