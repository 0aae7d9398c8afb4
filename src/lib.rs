//! evcal library
//!
//! Public API for testing and integration.

pub mod calibration;
pub mod codec;
pub mod config;
pub mod output;
pub mod session;

/// Re-export commonly used types
pub use calibration::{ApplyReport, AxisRange, DeviceCalibration, StepOutcome, XYinfo};
pub use codec::{property_names, PropertyData, PropertyFormat};
pub use config::{Config, ConfigError};
pub use output::{has_xorgconfd_support, render, OutputFormat, NAME_PLACEHOLDER};
pub use session::{
    list_devices, parse_device_spec, parse_numeric_atom, DeviceInfo, DeviceSession, DeviceSpec,
    PropertyAccess, SessionError,
};
