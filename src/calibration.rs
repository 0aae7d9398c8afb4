//! Axis calibration state tracking for one device session
//!
//! Keeps three snapshots of the device's pointer-mapping calibration:
//! the state first observed (`orig_axys`), the state believed active
//! (`old_axys`), and a caller-supplied target passed to [`apply`].
//! Detection reads the three evdev properties best-effort; application
//! writes them in a fixed order and reports per-step outcomes.
//!
//! [`apply`]: DeviceCalibration::apply

use std::fmt;

use crate::codec::{self, property_names, PropertyFormat};
use crate::session::{PropertyAccess, SessionError};

// ============================================================================
// Value types
// ============================================================================

/// Raw coordinate range mapped onto one screen axis
///
/// No ordering invariant: `min > max` is how an inverted axis is
/// represented, and every operation here preserves that encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// The same range with its direction reversed
    pub fn inverted(self) -> Self {
        Self {
            min: self.max,
            max: self.min,
        }
    }
}

/// A complete calibration state: both axis bounds plus the swap flag
///
/// Value type; operations return new instances instead of mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XYinfo {
    pub x: AxisRange,
    pub y: AxisRange,
    pub swap_xy: bool,
}

impl XYinfo {
    pub fn new(x_min: i32, x_max: i32, y_min: i32, y_max: i32, swap_xy: bool) -> Self {
        Self {
            x: AxisRange::new(x_min, x_max),
            y: AxisRange::new(y_min, y_max),
            swap_xy,
        }
    }

    /// Fold raw per-axis inversion flags into the bound ordering
    ///
    /// Inversion is not carried as a flag anywhere in this tool: a
    /// flagged axis simply gets its min and max exchanged.
    pub fn with_inversion(self, invert_x: bool, invert_y: bool) -> Self {
        Self {
            x: if invert_x { self.x.inverted() } else { self.x },
            y: if invert_y { self.y.inverted() } else { self.y },
            swap_xy: self.swap_xy,
        }
    }

    /// The four bounds in calibration-property order
    pub fn calibration_values(&self) -> [i32; 4] {
        [self.x.min, self.x.max, self.y.min, self.y.max]
    }
}

impl fmt::Display for XYinfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min_x={}, max_x={}, min_y={}, max_y={}, swap_xy={}",
            self.x.min,
            self.x.max,
            self.y.min,
            self.y.max,
            u8::from(self.swap_xy)
        )
    }
}

// ============================================================================
// Apply outcome
// ============================================================================

/// Outcome of a single write step within an apply sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Written to the device
    Applied,
    /// Not needed, no write attempted
    Skipped,
    /// Attempted and refused by the driver
    Failed,
}

impl StepOutcome {
    pub fn is_ok(self) -> bool {
        !matches!(self, StepOutcome::Failed)
    }
}

/// Per-step record of an apply sequence
///
/// Every step is always attempted; an early failure never aborts the
/// later writes. Partial calibration is still more useful than none.
#[derive(Debug, Clone, Copy)]
pub struct ApplyReport {
    /// Axes-swap write (skipped when the device already matches)
    pub swap: StepOutcome,
    /// Unconditional reset of the raw inversion flags
    pub inversion_reset: StepOutcome,
    /// Calibration bounds write
    pub calibration: StepOutcome,
    /// Whether the closing barrier round trip completed
    pub synced: bool,
}

impl ApplyReport {
    /// True when every attempted step succeeded and the barrier completed
    pub fn all_succeeded(&self) -> bool {
        self.swap.is_ok() && self.inversion_reset.is_ok() && self.calibration.is_ok() && self.synced
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Calibration state tracker bound to one device session
///
/// Exactly one tracker operates against one session; the tracker owns
/// the session for its whole lifetime.
pub struct DeviceCalibration<S> {
    session: S,
    orig_axys: XYinfo,
    old_axys: XYinfo,
}

impl<S: PropertyAccess> DeviceCalibration<S> {
    /// Create a tracker with zeroed starting bounds
    pub fn new(session: S) -> Self {
        Self::with_initial(session, XYinfo::default())
    }

    /// Create a tracker seeded with precalibration bounds
    ///
    /// The seed is what gets re-asserted if the device reports an empty
    /// calibration before the first successful read.
    pub fn with_initial(session: S, initial: XYinfo) -> Self {
        Self {
            session,
            orig_axys: initial,
            old_axys: initial,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Calibration observed at detection time, before any change
    pub fn original(&self) -> XYinfo {
        self.orig_axys
    }

    /// Calibration believed currently active on the device
    pub fn active(&self) -> XYinfo {
        self.old_axys
    }

    /// Read the device's current calibration state
    ///
    /// Best-effort by design: only properties that are present and
    /// well-formed affect state; older drivers may lack some of them.
    pub fn detect(&mut self) -> XYinfo {
        match self.session.get_prop(property_names::CALIBRATION) {
            Ok(Some(data)) if !data.is_empty() => {
                match codec::calibration_from_property(&data) {
                    Some((x, y)) => {
                        self.old_axys.x = x;
                        self.old_axys.y = y;
                    }
                    None => tracing::debug!(
                        items = data.len(),
                        format = %data.format(),
                        "Ignoring malformed calibration property"
                    ),
                }
            }
            Ok(_) => {
                // The calibration property stops being exported after a
                // suspend/resume cycle even though it is still active.
                // Re-assert the last known values so live state matches
                // what we track, else the first recalibration would start
                // from the wrong baseline.
                tracing::debug!("Calibration not set, re-asserting tracked values");
                if let Err(e) = self.write_calibration(self.old_axys) {
                    tracing::warn!(error = %e, "Failed to re-assert calibration");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Calibration query failed, keeping tracked values");
            }
        }

        if let Ok(Some(data)) = self.session.get_prop(property_names::AXES_SWAP) {
            if let Some(swap) = codec::swap_from_property(&data) {
                tracing::debug!(swap_xy = swap, "Read axes swap");
                self.old_axys.swap_xy = swap;
            }
        }

        if let Ok(Some(data)) = self.session.get_prop(property_names::AXIS_INVERSION) {
            if let Some((invert_x, invert_y)) = codec::inversion_from_property(&data) {
                tracing::debug!(invert_x, invert_y, "Read axis inversion");
                self.old_axys = self.old_axys.with_inversion(invert_x, invert_y);
            }
        }

        tracing::info!(
            device = self.session.device_name(),
            current = %self.old_axys,
            "Detected calibration"
        );

        self.orig_axys = self.old_axys;
        self.old_axys
    }

    /// Write a new calibration to the device
    ///
    /// Writes are issued in fixed order: swap (when it changes), raw
    /// inversion reset, calibration bounds, then a barrier. The report
    /// records each step; on overall success the caller is expected to
    /// call [`record_applied`](Self::record_applied).
    pub fn apply(&mut self, new_axys: XYinfo) -> ApplyReport {
        tracing::info!(
            device = self.session.device_name(),
            target = %new_axys,
            "Applying calibration"
        );

        let swap = if new_axys.swap_xy != self.old_axys.swap_xy {
            match self.write_swap(new_axys.swap_xy) {
                Ok(()) => StepOutcome::Applied,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to set axes swap");
                    StepOutcome::Failed
                }
            }
        } else {
            StepOutcome::Skipped
        };

        // Inversion is already baked into the bound ordering written
        // below; the raw driver flags must be cleared so they cannot
        // apply on top of it.
        let inversion_reset = match self.write_inversion_reset() {
            Ok(()) => StepOutcome::Applied,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to reset axis inversion");
                StepOutcome::Failed
            }
        };

        let calibration = match self.write_calibration(new_axys) {
            Ok(()) => StepOutcome::Applied,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to set calibration bounds");
                StepOutcome::Failed
            }
        };

        let synced = match self.session.sync() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Barrier after calibration writes failed");
                false
            }
        };

        let report = ApplyReport {
            swap,
            inversion_reset,
            calibration,
            synced,
        };

        if report.all_succeeded() {
            tracing::info!("Calibration applied");
        } else {
            tracing::warn!(report = ?report, "Calibration only partially applied");
        }
        report
    }

    /// Record that `axys` is now the active device state
    ///
    /// Called by the caller after a successful apply; `apply` itself
    /// never assumes the device took the write beyond what the driver
    /// reported.
    pub fn record_applied(&mut self, axys: XYinfo) {
        self.old_axys = axys;
    }

    fn write_swap(&mut self, swap: bool) -> Result<(), SessionError> {
        self.session.set_prop(
            property_names::AXES_SWAP,
            Some(PropertyFormat::Bits8),
            &[i32::from(swap)],
        )
    }

    fn write_inversion_reset(&mut self) -> Result<(), SessionError> {
        self.session.set_prop(
            property_names::AXIS_INVERSION,
            Some(PropertyFormat::Bits8),
            &[0, 0],
        )
    }

    fn write_calibration(&mut self, axys: XYinfo) -> Result<(), SessionError> {
        self.session.set_prop(
            property_names::CALIBRATION,
            Some(PropertyFormat::Bits32),
            &axys.calibration_values(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PropertyData;
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};

    /// In-memory device exposing the property-access seam
    struct FakeDevice {
        props: HashMap<String, PropertyData>,
        writes: Vec<(String, PropertyData)>,
        failing: HashSet<String>,
        syncs: Cell<usize>,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self {
                props: HashMap::new(),
                writes: Vec::new(),
                failing: HashSet::new(),
                syncs: Cell::new(0),
            }
        }

        fn with_prop(mut self, name: &str, data: PropertyData) -> Self {
            self.props.insert(name.to_string(), data);
            self
        }

        fn failing_on(mut self, name: &str) -> Self {
            self.failing.insert(name.to_string());
            self
        }

        fn writes_to(&self, name: &str) -> Vec<&PropertyData> {
            self.writes
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, d)| d)
                .collect()
        }
    }

    impl PropertyAccess for FakeDevice {
        fn device_name(&self) -> &str {
            "FakeTouch"
        }

        fn get_prop(&self, name: &str) -> Result<Option<PropertyData>, SessionError> {
            Ok(self.props.get(name).cloned())
        }

        fn set_prop(
            &mut self,
            name: &str,
            format: Option<PropertyFormat>,
            values: &[i32],
        ) -> Result<(), SessionError> {
            if self.failing.contains(name) {
                return Err(SessionError::PropertyWrite {
                    property: name.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            let format = match format {
                Some(f) => f,
                None => match self.props.get(name) {
                    Some(data) => data.format(),
                    None => {
                        return Err(SessionError::PropertyWrite {
                            property: name.to_string(),
                            reason: "missing property".to_string(),
                        })
                    }
                },
            };
            let data = codec::pack(format, values);
            self.props.insert(name.to_string(), data.clone());
            self.writes.push((name.to_string(), data));
            Ok(())
        }

        fn sync(&self) -> Result<(), SessionError> {
            self.syncs.set(self.syncs.get() + 1);
            Ok(())
        }
    }

    fn calibration_prop(values: [i32; 4]) -> PropertyData {
        codec::pack(PropertyFormat::Bits32, &values)
    }

    #[test]
    fn test_inversion_folding() {
        let axys = XYinfo::new(0, 100, 0, 50, false);
        let folded = axys.with_inversion(true, false);
        assert_eq!(folded, XYinfo::new(100, 0, 0, 50, false));
        let folded = axys.with_inversion(false, true);
        assert_eq!(folded, XYinfo::new(0, 100, 50, 0, false));
        let folded = axys.with_inversion(false, false);
        assert_eq!(folded, axys);
    }

    #[test]
    fn test_detect_reads_all_three_properties() {
        let device = FakeDevice::new()
            .with_prop(property_names::CALIBRATION, calibration_prop([0, 1000, 0, 600]))
            .with_prop(property_names::AXES_SWAP, PropertyData::Bits8(vec![1]))
            .with_prop(property_names::AXIS_INVERSION, PropertyData::Bits8(vec![1, 0]));

        let mut tracker = DeviceCalibration::new(device);
        let detected = tracker.detect();

        assert_eq!(detected, XYinfo::new(1000, 0, 0, 600, true));
        assert_eq!(tracker.original(), tracker.active());
    }

    #[test]
    fn test_detect_without_swap_or_inversion() {
        // Swap defaults to false when the driver does not export it.
        let device = FakeDevice::new()
            .with_prop(property_names::CALIBRATION, calibration_prop([0, 1000, 0, 600]));

        let mut tracker = DeviceCalibration::new(device);
        let detected = tracker.detect();

        assert_eq!(detected, XYinfo::new(0, 1000, 0, 600, false));
        assert_eq!(tracker.original(), detected);
        assert_eq!(tracker.active(), detected);
        // Nothing needed re-asserting.
        assert!(tracker.session().writes.is_empty());
    }

    #[test]
    fn test_detect_reasserts_on_empty_calibration() {
        // Empty calibration buffer: the post-resume state. The tracked
        // values must be written back, not reset to defaults.
        let device = FakeDevice::new()
            .with_prop(property_names::CALIBRATION, PropertyData::Bits32(vec![]));
        let seed = XYinfo::new(10, 900, 20, 580, false);

        let mut tracker = DeviceCalibration::with_initial(device, seed);
        let detected = tracker.detect();

        assert_eq!(detected, seed);
        assert_eq!(tracker.active(), seed);
        let rewrites = tracker.session().writes_to(property_names::CALIBRATION);
        assert_eq!(rewrites, vec![&calibration_prop([10, 900, 20, 580])]);
    }

    #[test]
    fn test_detect_ignores_malformed_swap_buffer() {
        let device = FakeDevice::new()
            .with_prop(property_names::CALIBRATION, calibration_prop([1, 2, 3, 4]))
            .with_prop(property_names::AXES_SWAP, PropertyData::Bits8(vec![0, 1]));
        let seed = XYinfo::new(0, 100, 0, 100, true);

        let mut tracker = DeviceCalibration::with_initial(device, seed);
        tracker.detect();

        // Calibration decoded; two-byte swap buffer left swap untouched.
        assert_eq!(tracker.active(), XYinfo::new(1, 2, 3, 4, true));
    }

    #[test]
    fn test_apply_write_order_and_barrier() {
        let device = FakeDevice::new()
            .with_prop(property_names::CALIBRATION, calibration_prop([0, 1000, 0, 600]));
        let mut tracker = DeviceCalibration::new(device);
        tracker.detect();

        let report = tracker.apply(XYinfo::new(1000, 0, 0, 600, true));

        assert!(report.all_succeeded());
        assert_eq!(report.swap, StepOutcome::Applied);
        assert_eq!(report.inversion_reset, StepOutcome::Applied);
        assert_eq!(report.calibration, StepOutcome::Applied);

        let writes = &tracker.session().writes;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].0, property_names::AXES_SWAP);
        assert_eq!(writes[0].1, PropertyData::Bits8(vec![1]));
        assert_eq!(writes[1].0, property_names::AXIS_INVERSION);
        assert_eq!(writes[1].1, PropertyData::Bits8(vec![0, 0]));
        assert_eq!(writes[2].0, property_names::CALIBRATION);
        assert_eq!(writes[2].1, calibration_prop([1000, 0, 0, 600]));
        assert_eq!(tracker.session().syncs.get(), 1);
    }

    #[test]
    fn test_apply_skips_unchanged_swap() {
        let device = FakeDevice::new();
        let mut tracker =
            DeviceCalibration::with_initial(device, XYinfo::new(0, 100, 0, 100, true));

        let report = tracker.apply(XYinfo::new(5, 95, 5, 95, true));

        assert_eq!(report.swap, StepOutcome::Skipped);
        assert!(report.all_succeeded());
        assert!(tracker
            .session()
            .writes_to(property_names::AXES_SWAP)
            .is_empty());
    }

    #[test]
    fn test_apply_attempts_everything_on_step_failure() {
        // A failing swap write must not stop the calibration write, and
        // the aggregate must still come out false.
        let device = FakeDevice::new().failing_on(property_names::AXES_SWAP);
        let mut tracker = DeviceCalibration::new(device);

        let report = tracker.apply(XYinfo::new(0, 800, 0, 480, true));

        assert_eq!(report.swap, StepOutcome::Failed);
        assert_eq!(report.calibration, StepOutcome::Applied);
        assert!(!report.all_succeeded());
        let writes = tracker.session().writes_to(property_names::CALIBRATION);
        assert_eq!(writes, vec![&calibration_prop([0, 800, 0, 480])]);
    }

    #[test]
    fn test_record_applied_updates_active_state() {
        let device = FakeDevice::new();
        let mut tracker = DeviceCalibration::new(device);
        let new_axys = XYinfo::new(0, 800, 0, 480, true);

        let report = tracker.apply(new_axys);
        assert!(report.all_succeeded());
        assert_ne!(tracker.active(), new_axys);

        tracker.record_applied(new_axys);
        assert_eq!(tracker.active(), new_axys);

        // A second apply with the same target now skips the swap write.
        let report = tracker.apply(new_axys);
        assert_eq!(report.swap, StepOutcome::Skipped);
    }
}
