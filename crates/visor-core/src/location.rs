//! Best-effort location resolution from multiple, sometimes-stale sources.
//!
//! The resolver keeps independent "most recent" slots for samples decoded
//! from the link and for device-provided fixes, plus a Guard-mode slot
//! feeding the theft fallback chain. Slots are updated only by newer
//! observations; there is no averaging or smoothing. Nothing here is
//! persisted.

use crate::types::GpsSample;

/// Recency-based location resolver.
#[derive(Debug, Default)]
pub struct LocationResolver {
    /// Most recent sample decoded from the wireless link.
    link: Option<GpsSample>,
    /// Most recent device-provided fix.
    device: Option<GpsSample>,
    /// Most recent sample decoded while the captured mode was Guard.
    guard: Option<GpsSample>,
}

impl LocationResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample decoded from the link. `guard_mode` marks samples
    /// observed while the helmet was being guarded.
    pub fn record_link_sample(&mut self, sample: GpsSample, guard_mode: bool) {
        replace_if_newer(&mut self.link, sample);
        if guard_mode {
            replace_if_newer(&mut self.guard, sample);
        }
    }

    /// Record a device-provided location fix.
    pub fn record_device_fix(&mut self, sample: GpsSample) {
        replace_if_newer(&mut self.device, sample);
    }

    /// The single best-effort coordinate: whichever of the link and device
    /// slots is newer, or `None` when both are empty.
    #[must_use]
    pub fn best(&self) -> Option<GpsSample> {
        match (self.link, self.device) {
            (Some(link), Some(device)) => {
                if device.captured_at > link.captured_at {
                    Some(device)
                } else {
                    Some(link)
                }
            }
            (Some(sample), None) | (None, Some(sample)) => Some(sample),
            (None, None) => None,
        }
    }

    /// The last sample observed in Guard mode, if any.
    #[must_use]
    pub const fn last_guard(&self) -> Option<GpsSample> {
        self.guard
    }

    /// The last sample decoded from the link regardless of mode, if any.
    #[must_use]
    pub const fn last_link(&self) -> Option<GpsSample> {
        self.link
    }
}

fn replace_if_newer(slot: &mut Option<GpsSample>, sample: GpsSample) {
    if slot.map_or(true, |current| sample.captured_at >= current.captured_at) {
        *slot = Some(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use chrono::{TimeZone, Utc};

    fn sample(lat: f64, lon: f64, secs: i64) -> GpsSample {
        GpsSample {
            coordinate: Coordinate::new(lat, lon),
            captured_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_resolver_has_no_best() {
        assert!(LocationResolver::new().best().is_none());
    }

    #[test]
    fn test_best_prefers_newer_slot() {
        let mut resolver = LocationResolver::new();
        resolver.record_link_sample(sample(1.0, 2.0, 100), false);
        resolver.record_device_fix(sample(3.0, 4.0, 200));

        let best = resolver.best().unwrap();
        assert_eq!(best.coordinate, Coordinate::new(3.0, 4.0));

        resolver.record_link_sample(sample(5.0, 6.0, 300), false);
        let best = resolver.best().unwrap();
        assert_eq!(best.coordinate, Coordinate::new(5.0, 6.0));
    }

    #[test]
    fn test_stale_observation_does_not_overwrite() {
        let mut resolver = LocationResolver::new();
        resolver.record_link_sample(sample(1.0, 2.0, 200), false);
        resolver.record_link_sample(sample(9.0, 9.0, 100), false);

        assert_eq!(
            resolver.best().unwrap().coordinate,
            Coordinate::new(1.0, 2.0)
        );
    }

    #[test]
    fn test_guard_slot_tracks_guard_samples_only() {
        let mut resolver = LocationResolver::new();
        resolver.record_link_sample(sample(1.0, 2.0, 100), false);
        assert!(resolver.last_guard().is_none());

        resolver.record_link_sample(sample(3.0, 4.0, 200), true);
        assert_eq!(
            resolver.last_guard().unwrap().coordinate,
            Coordinate::new(3.0, 4.0)
        );

        // Later non-guard sample updates the link slot but not guard.
        resolver.record_link_sample(sample(5.0, 6.0, 300), false);
        assert_eq!(
            resolver.last_guard().unwrap().coordinate,
            Coordinate::new(3.0, 4.0)
        );
        assert_eq!(
            resolver.last_link().unwrap().coordinate,
            Coordinate::new(5.0, 6.0)
        );
    }

    #[test]
    fn test_single_slot_is_best() {
        let mut resolver = LocationResolver::new();
        resolver.record_device_fix(sample(7.0, 8.0, 50));
        assert_eq!(
            resolver.best().unwrap().coordinate,
            Coordinate::new(7.0, 8.0)
        );
    }
}
