//! Width-tagged property buffer codec for the evdev driver properties
//!
//! The evdev driver exposes its calibration state as typed device
//! properties whose elements are 8, 16 or 32 bits wide. This module owns
//! the conversion between those opaque, width-tagged buffers and the
//! fixed-purpose values the calibrator works with: the four calibration
//! bounds, the axes-swap flag and the per-axis inversion flags.
//!
//! Everything here is pure; device I/O lives in [`crate::session`].

use std::fmt;

use crate::calibration::AxisRange;

// ============================================================================
// Property names
// ============================================================================

/// Device property names exported by xf86-input-evdev
pub mod property_names {
    /// 4 x 32-bit signed: x.min, x.max, y.min, y.max
    pub const CALIBRATION: &str = "Evdev Axis Calibration";
    /// 1 x 8-bit: 0 = normal, 1 = x/y exchanged
    pub const AXES_SWAP: &str = "Evdev Axes Swap";
    /// 2 x 8-bit: invert_x, invert_y
    pub const AXIS_INVERSION: &str = "Evdev Axis Inversion";
}

// ============================================================================
// Format tag
// ============================================================================

/// Element width of a device property buffer
///
/// The property protocol only knows these three widths; anything else on
/// the wire is a protocol violation and is rejected at the boundary by
/// [`PropertyFormat::from_bits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyFormat {
    /// 8 bits per element
    Bits8,
    /// 16 bits per element
    Bits16,
    /// 32 bits per element
    Bits32,
}

impl PropertyFormat {
    /// Parse a raw format width as reported by the server
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(PropertyFormat::Bits8),
            16 => Some(PropertyFormat::Bits16),
            32 => Some(PropertyFormat::Bits32),
            _ => None,
        }
    }

    /// Width in bits, as carried on the wire
    pub fn bits(self) -> u8 {
        match self {
            PropertyFormat::Bits8 => 8,
            PropertyFormat::Bits16 => 16,
            PropertyFormat::Bits32 => 32,
        }
    }
}

impl fmt::Display for PropertyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

// ============================================================================
// Tagged buffers
// ============================================================================

/// A property value buffer together with its element width
///
/// Each width has its own variant, so a buffer can never be read back at
/// a width other than the one it was packed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyData {
    /// 8-bit elements
    Bits8(Vec<u8>),
    /// 16-bit elements
    Bits16(Vec<u16>),
    /// 32-bit elements
    Bits32(Vec<u32>),
}

impl PropertyData {
    /// The element width of this buffer
    pub fn format(&self) -> PropertyFormat {
        match self {
            PropertyData::Bits8(_) => PropertyFormat::Bits8,
            PropertyData::Bits16(_) => PropertyFormat::Bits16,
            PropertyData::Bits32(_) => PropertyFormat::Bits32,
        }
    }

    /// Number of elements (not bytes)
    pub fn len(&self) -> usize {
        match self {
            PropertyData::Bits8(v) => v.len(),
            PropertyData::Bits16(v) => v.len(),
            PropertyData::Bits32(v) => v.len(),
        }
    }

    /// True when the buffer carries no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pack integer values into a tightly packed buffer of the given width
///
/// Values wider than the target format are truncated two's-complement,
/// which is what the driver expects for the 8-bit flag properties.
pub fn pack(format: PropertyFormat, values: &[i32]) -> PropertyData {
    match format {
        PropertyFormat::Bits8 => {
            PropertyData::Bits8(values.iter().map(|&v| v as u8).collect())
        }
        PropertyFormat::Bits16 => {
            PropertyData::Bits16(values.iter().map(|&v| v as u16).collect())
        }
        PropertyFormat::Bits32 => {
            PropertyData::Bits32(values.iter().map(|&v| v as u32).collect())
        }
    }
}

// ============================================================================
// Fixed-purpose decoders
// ============================================================================

/// Decode the calibration property into (x, y) axis bounds
///
/// Requires a 32-bit buffer of exactly four items in x.min, x.max, y.min,
/// y.max order; anything else decodes to `None` and the caller keeps its
/// prior state.
pub fn calibration_from_property(data: &PropertyData) -> Option<(AxisRange, AxisRange)> {
    match data {
        PropertyData::Bits32(items) if items.len() == 4 => {
            let x = AxisRange {
                min: items[0] as i32,
                max: items[1] as i32,
            };
            let y = AxisRange {
                min: items[2] as i32,
                max: items[3] as i32,
            };
            Some((x, y))
        }
        _ => None,
    }
}

/// Decode the axes-swap property
///
/// Requires an 8-bit buffer of exactly one item.
pub fn swap_from_property(data: &PropertyData) -> Option<bool> {
    match data {
        PropertyData::Bits8(items) if items.len() == 1 => Some(items[0] != 0),
        _ => None,
    }
}

/// Decode the axis-inversion property into (invert_x, invert_y)
///
/// Requires an 8-bit buffer of exactly two items. Inversion is not kept
/// as a flag anywhere: the caller folds it into the bounds by exchanging
/// min and max of the flagged axis.
pub fn inversion_from_property(data: &PropertyData) -> Option<(bool, bool)> {
    match data {
        PropertyData::Bits8(items) if items.len() == 2 => {
            Some((items[0] != 0, items[1] != 0))
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_bits() {
        assert_eq!(PropertyFormat::from_bits(8), Some(PropertyFormat::Bits8));
        assert_eq!(PropertyFormat::from_bits(16), Some(PropertyFormat::Bits16));
        assert_eq!(PropertyFormat::from_bits(32), Some(PropertyFormat::Bits32));
        assert_eq!(PropertyFormat::from_bits(0), None);
        assert_eq!(PropertyFormat::from_bits(24), None);
        assert_eq!(PropertyFormat::from_bits(64), None);
    }

    #[test]
    fn test_pack_element_counts() {
        // One element in, one element out, at every width.
        let values = [1, 2, 3, 4, 5];
        assert_eq!(pack(PropertyFormat::Bits8, &values).len(), 5);
        assert_eq!(pack(PropertyFormat::Bits16, &values).len(), 5);
        assert_eq!(pack(PropertyFormat::Bits32, &values).len(), 5);
    }

    #[test]
    fn test_pack_8bit_exact_bytes() {
        // An 8-bit pack of n values is exactly n bytes, nothing doubled.
        let data = pack(PropertyFormat::Bits8, &[0, 1]);
        assert_eq!(data, PropertyData::Bits8(vec![0, 1]));
    }

    #[test]
    fn test_pack_truncates_narrow_widths() {
        let data = pack(PropertyFormat::Bits8, &[0x1FF, -1]);
        assert_eq!(data, PropertyData::Bits8(vec![0xFF, 0xFF]));

        let data = pack(PropertyFormat::Bits16, &[0x1_FFFF, -2]);
        assert_eq!(data, PropertyData::Bits16(vec![0xFFFF, 0xFFFE]));
    }

    #[test]
    fn test_calibration_round_trip() {
        // Encode then decode must reproduce the bounds exactly, also when
        // min > max (inverted axis) and at the integer extremes.
        let cases = [
            (0, 1000, 0, 600),
            (1000, 0, 600, 0),
            (-500, 500, -1, 1),
            (i32::MIN, i32::MAX, i32::MAX, i32::MIN),
        ];

        for (x_min, x_max, y_min, y_max) in cases {
            let data = pack(PropertyFormat::Bits32, &[x_min, x_max, y_min, y_max]);
            let (x, y) = calibration_from_property(&data).unwrap();
            assert_eq!((x.min, x.max), (x_min, x_max));
            assert_eq!((y.min, y.max), (y_min, y_max));
        }
    }

    #[test]
    fn test_calibration_rejects_wrong_shape() {
        // Wrong item count
        let data = pack(PropertyFormat::Bits32, &[1, 2, 3]);
        assert_eq!(calibration_from_property(&data), None);
        let data = pack(PropertyFormat::Bits32, &[1, 2, 3, 4, 5]);
        assert_eq!(calibration_from_property(&data), None);
        // Empty buffer
        let data = PropertyData::Bits32(vec![]);
        assert_eq!(calibration_from_property(&data), None);
        // Wrong width
        let data = pack(PropertyFormat::Bits16, &[1, 2, 3, 4]);
        assert_eq!(calibration_from_property(&data), None);
    }

    #[test]
    fn test_swap_decoding() {
        assert_eq!(swap_from_property(&PropertyData::Bits8(vec![0])), Some(false));
        assert_eq!(swap_from_property(&PropertyData::Bits8(vec![1])), Some(true));
        // Any nonzero byte counts as swapped
        assert_eq!(swap_from_property(&PropertyData::Bits8(vec![2])), Some(true));
        // Wrong shapes
        assert_eq!(swap_from_property(&PropertyData::Bits8(vec![])), None);
        assert_eq!(swap_from_property(&PropertyData::Bits8(vec![0, 1])), None);
        assert_eq!(swap_from_property(&PropertyData::Bits32(vec![1])), None);
    }

    #[test]
    fn test_inversion_decoding() {
        assert_eq!(
            inversion_from_property(&PropertyData::Bits8(vec![1, 0])),
            Some((true, false))
        );
        assert_eq!(
            inversion_from_property(&PropertyData::Bits8(vec![0, 1])),
            Some((false, true))
        );
        assert_eq!(
            inversion_from_property(&PropertyData::Bits8(vec![0, 0])),
            Some((false, false))
        );
        // Wrong shapes
        assert_eq!(inversion_from_property(&PropertyData::Bits8(vec![1])), None);
        assert_eq!(
            inversion_from_property(&PropertyData::Bits16(vec![1, 0])),
            None
        );
    }
}
