//! Persistence rendering for an applied calibration
//!
//! Once a calibration is live on the device it only survives until the
//! server restarts, so the final step renders it into one of the
//! persistent representations: a xorg.conf.d snippet, a legacy HAL fdi
//! policy block, or xinput commands for a session-startup script. The
//! renderers are pure string producers; the text goes to stdout and
//! writing it anywhere is the user's responsibility.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::calibration::XYinfo;
use crate::codec::property_names;

// ============================================================================
// Constants
// ============================================================================

/// Placeholder match string used when the hardware product name is unknown
pub const NAME_PLACEHOLDER: &str = "!!Name_Of_TouchScreen!!";

/// Drop-in config directories whose presence enables xorg.conf.d output
const XORG_CONF_DIRS: &[&str] = &["/etc/X11/xorg.conf.d", "/usr/share/X11/xorg.conf.d"];

// ============================================================================
// Format selection
// ============================================================================

/// Persistent output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// xorg.conf.d when the platform has a drop-in directory, else xinput
    #[default]
    Auto,
    /// Static xorg.conf.d InputClass snippet
    XorgConfD,
    /// Legacy HAL fdi policy snippet
    Hal,
    /// xinput commands for a session-startup script
    Xinput,
}

impl OutputFormat {
    /// Resolve `Auto` against the platform's drop-in config support
    pub fn resolve(self, has_dropin_dir: bool) -> OutputFormat {
        match self {
            OutputFormat::Auto if has_dropin_dir => OutputFormat::XorgConfD,
            OutputFormat::Auto => OutputFormat::Xinput,
            other => other,
        }
    }
}

/// Whether this platform carries a xorg.conf.d drop-in directory
pub fn has_xorgconfd_support() -> bool {
    XORG_CONF_DIRS.iter().any(|dir| Path::new(dir).is_dir())
}

/// Render the persistent representation of `axys` in the given format
///
/// `Auto` must be resolved by the caller first; it is mapped here as if
/// no drop-in directory existed.
pub fn render(
    format: OutputFormat,
    device_name: &str,
    product_name: Option<&str>,
    axys: &XYinfo,
) -> String {
    match format.resolve(false) {
        OutputFormat::XorgConfD => render_xorg_conf_d(product_name, axys),
        OutputFormat::Hal => render_hal(product_name, axys),
        OutputFormat::Xinput => render_xinput(device_name, axys),
        OutputFormat::Auto => unreachable!("Auto resolves to a concrete format"),
    }
}

// ============================================================================
// Renderers
// ============================================================================

/// xorg.conf.d InputClass snippet matching the device by product name
pub fn render_xorg_conf_d(product_name: Option<&str>, axys: &XYinfo) -> String {
    let name = product_name.unwrap_or(NAME_PLACEHOLDER);

    let mut out = String::new();
    out.push_str("  copy the snippet below into '/etc/X11/xorg.conf.d/99-calibration.conf'\n");
    out.push_str("Section \"InputClass\"\n");
    out.push_str("\tIdentifier\t\"calibration\"\n");
    out.push_str(&format!("\tMatchProduct\t\"{}\"\n", name));
    out.push_str(&format!(
        "\tOption\t\"Calibration\"\t\"{} {} {} {}\"\n",
        axys.x.min, axys.x.max, axys.y.min, axys.y.max
    ));
    out.push_str(&format!(
        "\tOption\t\"SwapAxes\"\t\"{}\"\n",
        u8::from(axys.swap_xy)
    ));
    out.push_str("EndSection\n");

    if product_name.is_none() {
        out.push_str(&format!(
            "\nChange '{}' to your device's name in the snippet above.\n",
            NAME_PLACEHOLDER
        ));
    }
    out
}

/// Legacy HAL fdi policy block carrying the same values
pub fn render_hal(product_name: Option<&str>, axys: &XYinfo) -> String {
    let name = product_name.unwrap_or(NAME_PLACEHOLDER);

    let mut out = String::new();
    out.push_str("  copy the policy below into '/etc/hal/fdi/policy/touchscreen.fdi'\n");
    out.push_str(&format!(
        "<match key=\"info.product\" contains=\"{}\">\n",
        name
    ));
    out.push_str(&format!(
        "  <merge key=\"input.x11_options.calibration\" type=\"string\">{} {} {} {}</merge>\n",
        axys.x.min, axys.x.max, axys.y.min, axys.y.max
    ));
    out.push_str(&format!(
        "  <merge key=\"input.x11_options.swapaxes\" type=\"string\">{}</merge>\n",
        u8::from(axys.swap_xy)
    ));
    out.push_str("</match>\n");

    if product_name.is_none() {
        out.push_str(&format!(
            "\nChange '{}' to your device's name in the policy above.\n",
            NAME_PLACEHOLDER
        ));
    }
    out
}

/// xinput commands re-applying the calibration at session start
pub fn render_xinput(device_name: &str, axys: &XYinfo) -> String {
    let mut out = String::new();
    out.push_str(
        "  Install the 'xinput' tool and copy the command(s) below in a script that starts with your X session\n",
    );
    out.push_str(&format!(
        "    xinput set-int-prop \"{}\" \"{}\" 32 {} {} {} {}\n",
        device_name,
        property_names::CALIBRATION,
        axys.x.min,
        axys.x.max,
        axys.y.min,
        axys.y.max
    ));
    out.push_str(&format!(
        "    xinput set-int-prop \"{}\" \"{}\" 8 {}\n",
        device_name,
        property_names::AXES_SWAP,
        u8::from(axys.swap_xy)
    ));
    out
}

// ============================================================================
// Tests
// ============================================================================
