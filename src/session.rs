//! Device session over the X11 XInput property interface
//!
//! Owns the display-server connection and the resolved input device for
//! the lifetime of a calibration run, and exposes typed property get/set
//! on top of the raw width-tagged buffers. The connection is released by
//! drop glue on every exit path, including construction failures after
//! the connection was already established.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;
use std::fs;
use std::path::Path;

use x11rb::connection::RequestConnection;
use x11rb::protocol::xinput::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{self, ConnectionExt as _};
use x11rb::rust_connection::RustConnection;

use crate::codec::{self, property_names, PropertyData, PropertyFormat};

// ============================================================================
// Constants
// ============================================================================

/// Match any property type in XIGetProperty (not defined by x11rb)
const XI_ANY_PROPERTY_TYPE: u32 = 0;

/// Device spec addressing every device (not defined by x11rb)
const XI_ALL_DEVICES: u16 = 0;

/// Longest property read, in 4-byte units
const PROPERTY_READ_LEN: u32 = 1000;

/// Server property carrying the /dev/input node backing a device
const PROP_DEVICE_NODE: &str = "Device Node";

// ============================================================================
// Pure spec parsing
// ============================================================================

/// How a user-supplied device string is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec<'a> {
    /// Numeric device id, takes precedence over name lookup
    Id(u16),
    /// Exact device name
    Name(&'a str),
}

/// Interpret a device spec: an all-digit string is a device id, anything
/// else an exact device name. No fallback from id to name.
pub fn parse_device_spec(spec: &str) -> DeviceSpec<'_> {
    if !spec.is_empty() && spec.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(id) = spec.parse::<u16>() {
            return DeviceSpec::Id(id);
        }
    }
    DeviceSpec::Name(spec)
}

/// Interpret a property spec: an all-digit string is an already-resolved
/// numeric atom; anything else must be interned through the server.
pub fn parse_numeric_atom(name: &str) -> Option<xproto::Atom> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

// ============================================================================
// Device listing
// ============================================================================

/// Identity of an XInput device, as shown by `--list-devices`
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// XInput device id
    pub id: u16,
    /// Device name as reported by the server
    pub name: String,
    /// Device role (master/slave pointer or keyboard)
    pub kind: &'static str,
    /// Whether the device is currently enabled
    pub enabled: bool,
}

fn device_kind_label(kind: xinput::DeviceType) -> &'static str {
    match kind {
        xinput::DeviceType::MASTER_POINTER => "master pointer",
        xinput::DeviceType::MASTER_KEYBOARD => "master keyboard",
        xinput::DeviceType::SLAVE_POINTER => "slave pointer",
        xinput::DeviceType::SLAVE_KEYBOARD => "slave keyboard",
        xinput::DeviceType::FLOATING_SLAVE => "floating slave",
        _ => "unknown",
    }
}

/// List every XInput device known to the server
///
/// Used for disambiguation when several devices share a name: the
/// resolution error tells the user to pass the id shown here.
pub fn list_devices() -> Result<Vec<DeviceInfo>, SessionError> {
    let (conn, _screen) = x11rb::connect(None).map_err(SessionError::Connect)?;
    require_xinput(&conn)?;

    let infos = conn
        .xinput_xi_query_device(XI_ALL_DEVICES)
        .map_err(|e| SessionError::Protocol(e.into()))?
        .reply()
        .map_err(SessionError::Protocol)?
        .infos;

    Ok(infos
        .into_iter()
        .map(|d| DeviceInfo {
            id: d.deviceid,
            name: String::from_utf8_lossy(&d.name).into_owned(),
            kind: device_kind_label(d.type_),
            enabled: d.enabled,
        })
        .collect())
}

fn require_xinput(conn: &RustConnection) -> Result<(), SessionError> {
    conn.extension_information(xinput::X11_EXTENSION_NAME)
        .map_err(|e| SessionError::Protocol(e.into()))?
        .ok_or(SessionError::XInputUnsupported)?;

    let version = conn
        .xinput_xi_query_version(2, 0)
        .map_err(|e| SessionError::Protocol(e.into()))?
        .reply()
        .map_err(SessionError::Protocol)?;

    if version.major_version < 2 {
        return Err(SessionError::XInputUnsupported);
    }
    Ok(())
}

// ============================================================================
// Property access seam
// ============================================================================

/// Device property access, as needed by the calibration state tracker
///
/// Implemented by [`DeviceSession`] against a live server and by an
/// in-memory device in tests.
pub trait PropertyAccess {
    /// Name of the device this accessor is bound to
    fn device_name(&self) -> &str;

    /// Read a property; `Ok(None)` when the device does not carry it
    fn get_prop(&self, name: &str) -> Result<Option<PropertyData>, SessionError>;

    /// Write a property; `format: None` reuses the property's existing width
    fn set_prop(
        &mut self,
        name: &str,
        format: Option<PropertyFormat>,
        values: &[i32],
    ) -> Result<(), SessionError>;

    /// Barrier: all prior writes are processed by the server on return
    fn sync(&self) -> Result<(), SessionError>;
}

// ============================================================================
// Device session
// ============================================================================

/// An open calibration session against one input device
///
/// Owns the server connection; dropping the session closes it. One
/// session serves exactly one device, and concurrent writers to the same
/// device are not guarded against.
pub struct DeviceSession {
    conn: RustConnection,
    device_id: u16,
    device_name: String,
}

impl DeviceSession {
    /// Open a session for the device named or numbered by `spec`
    ///
    /// Fails when the server is unreachable, the spec resolves to zero or
    /// several devices, the driver refuses the device, or the device does
    /// not carry the evdev calibration property.
    pub fn open(spec: &str) -> Result<Self, SessionError> {
        let (conn, _screen) = x11rb::connect(None).map_err(SessionError::Connect)?;
        require_xinput(&conn)?;

        let infos = conn
            .xinput_xi_query_device(XI_ALL_DEVICES)
            .map_err(|e| SessionError::Protocol(e.into()))?
            .reply()
            .map_err(SessionError::Protocol)?
            .infos;

        let device = match parse_device_spec(spec) {
            DeviceSpec::Id(id) => infos
                .iter()
                .find(|d| d.deviceid == id)
                .ok_or_else(|| SessionError::DeviceNotFound(spec.to_string()))?,
            DeviceSpec::Name(name) => {
                let mut matches = infos.iter().filter(|d| d.name == name.as_bytes());
                let first = matches
                    .next()
                    .ok_or_else(|| SessionError::DeviceNotFound(spec.to_string()))?;
                let extra = matches.count();
                if extra > 0 {
                    return Err(SessionError::AmbiguousDevice {
                        name: name.to_string(),
                        count: extra + 1,
                    });
                }
                first
            }
        };

        let device_id = device.deviceid;
        let device_name = String::from_utf8_lossy(&device.name).into_owned();

        // A per-device query is the closest XI2 gets to opening the
        // device: if the driver refuses it, it fails here.
        conn.xinput_xi_query_device(device_id)
            .map_err(|e| SessionError::Protocol(e.into()))?
            .reply()
            .map_err(|e| SessionError::DeviceOpen {
                id: device_id,
                source: e,
            })?;

        let session = Self {
            conn,
            device_id,
            device_name,
        };

        if !session.has_property(property_names::CALIBRATION)? {
            return Err(SessionError::NotAnEvdevDevice {
                name: session.device_name,
            });
        }

        tracing::info!(
            device = %session.device_name,
            id = session.device_id,
            "Opened calibration session"
        );

        Ok(session)
    }

    /// XInput id of the bound device
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    /// Name of the bound device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Whether the device carries the named property at all
    fn has_property(&self, name: &str) -> Result<bool, SessionError> {
        let atom = self.resolve_atom(name)?;
        let reply = self
            .conn
            .xinput_xi_get_property(self.device_id, false, atom, XI_ANY_PROPERTY_TYPE, 0, 0)
            .map_err(|e| SessionError::PropertyQuery {
                property: name.to_string(),
                source: e.into(),
            })?
            .reply()
            .map_err(|e| SessionError::PropertyQuery {
                property: name.to_string(),
                source: e,
            })?;
        // Type atom None means the property does not exist on this device.
        Ok(reply.type_ != 0)
    }

    /// Resolve a property spec to an atom, interning the name if needed
    fn resolve_atom(&self, name: &str) -> Result<xproto::Atom, SessionError> {
        if let Some(atom) = parse_numeric_atom(name) {
            return Ok(atom);
        }
        let reply = self
            .conn
            .intern_atom(false, name.as_bytes())
            .map_err(|e| SessionError::PropertyQuery {
                property: name.to_string(),
                source: e.into(),
            })?
            .reply()
            .map_err(|e| SessionError::PropertyQuery {
                property: name.to_string(),
                source: e,
            })?;
        Ok(reply.atom)
    }

    /// Blocking property read
    pub fn get_prop(&self, name: &str) -> Result<Option<PropertyData>, SessionError> {
        let atom = self.resolve_atom(name)?;
        let reply = self
            .conn
            .xinput_xi_get_property(
                self.device_id,
                false,
                atom,
                XI_ANY_PROPERTY_TYPE,
                0,
                PROPERTY_READ_LEN,
            )
            .map_err(|e| SessionError::PropertyQuery {
                property: name.to_string(),
                source: e.into(),
            })?
            .reply()
            .map_err(|e| SessionError::PropertyQuery {
                property: name.to_string(),
                source: e,
            })?;

        if reply.type_ == 0 {
            tracing::debug!(property = name, "Property not present on device");
            return Ok(None);
        }

        let data = if let Some(v) = reply.items.as_data8() {
            PropertyData::Bits8(v.clone())
        } else if let Some(v) = reply.items.as_data16() {
            PropertyData::Bits16(v.clone())
        } else if let Some(v) = reply.items.as_data32() {
            PropertyData::Bits32(v.clone())
        } else {
            tracing::warn!(property = name, "Property reply has unusable format");
            return Ok(None);
        };

        tracing::debug!(
            property = name,
            format = %data.format(),
            items = data.len(),
            "Property read"
        );
        Ok(Some(data))
    }

    /// Blocking property write
    ///
    /// With `format: None` the property's existing width is queried and
    /// reused; failure to determine it fails the write.
    pub fn set_prop(
        &mut self,
        name: &str,
        format: Option<PropertyFormat>,
        values: &[i32],
    ) -> Result<(), SessionError> {
        let atom = self.resolve_atom(name)?;

        let format = match format {
            Some(f) => f,
            None => match self.get_prop(name) {
                Ok(Some(data)) => data.format(),
                Ok(None) => {
                    return Err(SessionError::PropertyWrite {
                        property: name.to_string(),
                        reason: "cannot determine the format of a missing property".to_string(),
                    })
                }
                Err(e) => {
                    return Err(SessionError::PropertyWrite {
                        property: name.to_string(),
                        reason: format!("failed to query existing format: {}", e),
                    })
                }
            },
        };

        let num_items = values.len() as u32;
        let items = match codec::pack(format, values) {
            PropertyData::Bits8(v) => xinput::XIChangePropertyAux::Data8(v),
            PropertyData::Bits16(v) => xinput::XIChangePropertyAux::Data16(v),
            PropertyData::Bits32(v) => xinput::XIChangePropertyAux::Data32(v),
        };

        self.conn
            .xinput_xi_change_property(
                self.device_id,
                xproto::PropMode::REPLACE,
                atom,
                xproto::AtomEnum::INTEGER.into(),
                num_items,
                &items,
            )
            .map_err(|e| SessionError::PropertyWrite {
                property: name.to_string(),
                reason: e.to_string(),
            })?
            .check()
            .map_err(|e| SessionError::PropertyWrite {
                property: name.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            property = name,
            format = %format,
            values = ?values,
            "Property written"
        );
        Ok(())
    }

    /// Full round trip guaranteeing all prior writes are processed
    pub fn sync(&self) -> Result<(), SessionError> {
        self.conn
            .get_input_focus()
            .map_err(|e| SessionError::Protocol(e.into()))?
            .reply()
            .map_err(SessionError::Protocol)?;
        Ok(())
    }

    /// The /dev/input node backing the device, if the server exports it
    pub fn device_node(&self) -> Option<String> {
        match self.get_prop(PROP_DEVICE_NODE) {
            Ok(Some(PropertyData::Bits8(bytes))) => {
                let node = String::from_utf8_lossy(&bytes);
                let node = node.trim_end_matches('\0');
                if node.is_empty() {
                    None
                } else {
                    Some(node.to_string())
                }
            }
            _ => None,
        }
    }

    /// Kernel product name of the device, read through sysfs
    ///
    /// This is the string xorg.conf.d and HAL match blocks key on. Best
    /// effort: `None` when the device node is unknown or sysfs does not
    /// cooperate, in which case the renderers fall back to a placeholder.
    pub fn hardware_product_name(&self) -> Option<String> {
        let node = self.device_node()?;
        let event = Path::new(&node).file_name()?.to_str()?;
        if !event.starts_with("event") {
            return None;
        }
        let sysfs = Path::new("/sys/class/input").join(event).join("device/name");
        let name = fs::read_to_string(sysfs).ok()?;
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

impl PropertyAccess for DeviceSession {
    fn device_name(&self) -> &str {
        DeviceSession::device_name(self)
    }

    fn get_prop(&self, name: &str) -> Result<Option<PropertyData>, SessionError> {
        DeviceSession::get_prop(self, name)
    }

    fn set_prop(
        &mut self,
        name: &str,
        format: Option<PropertyFormat>,
        values: &[i32],
    ) -> Result<(), SessionError> {
        DeviceSession::set_prop(self, name, format, values)
    }

    fn sync(&self) -> Result<(), SessionError> {
        DeviceSession::sync(self)
    }
}

// ============================================================================
// Error type
// ============================================================================

/// Session error type
#[derive(Debug)]
pub enum SessionError {
    /// Cannot reach the display server
    Connect(x11rb::errors::ConnectError),
    /// The server does not offer XInput 2.0
    XInputUnsupported,
    /// Protocol error outside a property request
    Protocol(x11rb::errors::ReplyError),
    /// The spec resolved to no device
    DeviceNotFound(String),
    /// Several devices share the requested name
    AmbiguousDevice { name: String, count: usize },
    /// The driver refused the resolved device
    DeviceOpen {
        id: u16,
        source: x11rb::errors::ReplyError,
    },
    /// The device does not carry the evdev calibration property
    NotAnEvdevDevice { name: String },
    /// Driver-level property query failed
    PropertyQuery {
        property: String,
        source: x11rb::errors::ReplyError,
    },
    /// Property write failed, or its width could not be determined
    PropertyWrite { property: String, reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(e) => {
                write!(f, "unable to connect to the X server: {}", e)
            }
            SessionError::XInputUnsupported => {
                write!(f, "the X server does not support XInput 2.0")
            }
            SessionError::Protocol(e) => write!(f, "X protocol error: {}", e),
            SessionError::DeviceNotFound(spec) => {
                write!(f, "no input device matches \"{}\"", spec)
            }
            SessionError::AmbiguousDevice { name, count } => write!(
                f,
                "{} devices are named \"{}\"; use the device id instead (see --list-devices)",
                count, name
            ),
            SessionError::DeviceOpen { id, source } => {
                write!(f, "the driver refused device {}: {}", id, source)
            }
            SessionError::NotAnEvdevDevice { name } => write!(
                f,
                "\"{}\" has no \"{}\" property, not a (valid) evdev device",
                name,
                property_names::CALIBRATION
            ),
            SessionError::PropertyQuery { property, source } => {
                write!(f, "failed to query property \"{}\": {}", property, source)
            }
            SessionError::PropertyWrite { property, reason } => {
                write!(f, "failed to write property \"{}\": {}", property, reason)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Connect(e) => Some(e),
            SessionError::Protocol(e) => Some(e),
            SessionError::DeviceOpen { source, .. } => Some(source),
            SessionError::PropertyQuery { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
