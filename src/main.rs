//! evcal
//!
//! Reads, updates and persists the pointer-mapping calibration of a
//! touch-input device managed by the X11 evdev driver. The target bounds
//! come from the caller (`--set`); this tool applies them to the live
//! device and renders the matching persistent configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use evcal::{
    calibration::{DeviceCalibration, XYinfo},
    config::Config,
    output::{self, OutputFormat},
    session::{self, DeviceSession, SessionError},
};

/// evcal - Touchscreen calibration for the X11 evdev input driver
#[derive(Parser, Debug)]
#[command(name = "evcal")]
#[command(version, about, long_about = None)]
struct Args {
    /// Device name or numeric device id to calibrate
    #[arg(short, long)]
    device: Option<String>,

    /// List all XInput devices and exit
    #[arg(long)]
    list_devices: bool,

    /// New calibration bounds to apply (use min > max to invert an axis)
    #[arg(
        long,
        num_args = 4,
        value_names = ["MIN_X", "MAX_X", "MIN_Y", "MAX_Y"],
        allow_negative_numbers = true
    )]
    set: Option<Vec<i32>>,

    /// Exchange the x and y axes when applying --set
    #[arg(long)]
    swap_xy: bool,

    /// Bounds assumed active before detection (re-asserted if the device
    /// reports an empty calibration)
    #[arg(
        long,
        num_args = 4,
        value_names = ["MIN_X", "MAX_X", "MIN_Y", "MAX_Y"],
        allow_negative_numbers = true
    )]
    precalib: Option<Vec<i32>>,

    /// Persistent output format
    #[arg(short = 'o', long, value_enum)]
    output_type: Option<OutputFormat>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    // Initialize logging
    let level = if args.verbose || config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.list_devices {
        list_input_devices()?;
        return Ok(true);
    }

    let device_spec = args
        .device
        .clone()
        .or_else(|| config.device.clone())
        .ok_or("no device given; use --device <NAME|ID> (see --list-devices)")?;

    let session = DeviceSession::open(&device_spec)?;
    info!(
        device = session.device_name(),
        id = session.device_id(),
        "Calibrating evdev driver"
    );

    let initial = match &args.precalib {
        Some(v) => XYinfo::new(v[0], v[1], v[2], v[3], false),
        None => XYinfo::default(),
    };
    let mut tracker = DeviceCalibration::with_initial(session, initial);

    let current = tracker.detect();
    println!("Current calibration: {}", current);

    // Without --set this is a read-only run.
    let Some(values) = &args.set else {
        return Ok(true);
    };

    let new_axys = XYinfo::new(values[0], values[1], values[2], values[3], args.swap_xy);
    let report = tracker.apply(new_axys);
    if !report.all_succeeded() {
        error!(report = ?report, "Calibration could not be fully applied");
        return Ok(false);
    }
    tracker.record_applied(new_axys);

    let format = args
        .output_type
        .unwrap_or(config.output)
        .resolve(output::has_xorgconfd_support());
    let product_name = tracker.session().hardware_product_name();

    println!("\t--> Making the calibration permanent <--");
    print!(
        "{}",
        output::render(
            format,
            tracker.session().device_name(),
            product_name.as_deref(),
            &new_axys
        )
    );

    Ok(true)
}

/// List all XInput devices known to the server
fn list_input_devices() -> Result<(), SessionError> {
    let devices = session::list_devices()?;

    if devices.is_empty() {
        println!("No input devices found.");
        return Ok(());
    }

    println!("Found {} input device(s):\n", devices.len());
    for device in &devices {
        let state = if device.enabled { "" } else { " [disabled]" };
        println!(
            "{:>4}  {} ({}){}",
            device.id, device.name, device.kind, state
        );
    }
    println!("\nPass a name with --device, or the id when names are ambiguous.");
    Ok(())
}
