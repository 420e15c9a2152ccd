// CLI surface, config.toml loading, and validated runtime settings.
//
// Precedence for the serial front-end: CLI flag, then [controller], then
// the [motor] fallback (deadman only), then the built-in default. Values
// out of range are fatal at startup rather than silently clamped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use thiserror::Error;

use crate::topic::{self, TopicError};

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_RAW_MAX: i32 = 2000;
pub const DEFAULT_MAX_MPS: f64 = 0.5;
pub const DEFAULT_DEADMAN_MS: u32 = 300;
pub const DEFAULT_SERIAL_HZ: f64 = 10.0;
pub const DEFAULT_TELEOP_HZ: f64 = 20.0;
pub const DEFAULT_STEP: f64 = 0.10;
pub const DEFAULT_UNIT: &str = "mps";

// Stop burst sizing per trigger site.
pub const BURST_RELEASE: u32 = 2;
pub const BURST_TELEOP_SHUTDOWN: u32 = 3;
pub const BURST_SERIAL_SHUTDOWN: u32 = 5;
pub const STOP_BURST_SPACING: Duration = Duration::from_millis(50);

// Teleop input loop timing.
pub const KEY_POLL_TIMEOUT: Duration = Duration::from_millis(5);
pub const HOLD_TIMEOUT: Duration = Duration::from_millis(250);

// Short relative to any valid publish interval so publish ticks are not
// delayed behind a quiet port.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("serial device not specified (use --serial or set [controller].serial)")]
    MissingSerialPort,

    #[error("config not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("zenoh config not found: {0}")]
    ZenohConfigNotFound(PathBuf),

    #[error("invalid zenoh config: {0}")]
    ZenohConfig(String),
}

/// Zenoh remote command-and-telemetry bridge for dmc_robo robots.
#[derive(Debug, Parser)]
#[command(name = "dmc-robo-bridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Keyboard teleoperation with telemetry readout
    Teleop(TeleopArgs),
    /// Serial controller to motor/cmd bridge
    Serial(SerialArgs),
}

/// Flags shared by both front-ends.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Robot identity, e.g. rasp-zero-01
    #[arg(long)]
    pub robot_id: String,

    /// Path to a zenoh json5 config; defaults apply when omitted
    #[arg(long)]
    pub zenoh_config: Option<PathBuf>,

    /// Zenoh mode override applied together with --connect
    #[arg(long, default_value = "peer")]
    pub mode: String,

    /// Connect endpoint override (repeatable), e.g. tcp/192.168.1.10:7447
    #[arg(long = "connect")]
    pub connect: Vec<String>,
}

#[derive(Debug, Args)]
pub struct TeleopArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Velocity step per held key
    #[arg(long, default_value_t = DEFAULT_STEP)]
    pub step: f64,

    /// Motor command publish rate (Hz)
    #[arg(long, default_value_t = DEFAULT_TELEOP_HZ)]
    pub publish_hz: f64,

    /// Deadman timeout carried in motor commands (ms)
    #[arg(long, default_value_t = DEFAULT_DEADMAN_MS)]
    pub deadman_ms: u32,

    /// Explicit dotted path to the gyro vector (autodetected when omitted)
    #[arg(long)]
    pub gyro_path: Option<String>,

    /// Text published to the OLED on connect
    #[arg(long, default_value = "teleop online")]
    pub banner: String,
}

#[derive(Debug, Args)]
pub struct SerialArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path to config.toml (default: ./config.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Do not load ./config.toml even if it exists
    #[arg(long)]
    pub no_config: bool,

    /// Serial device path, e.g. /dev/ttyACM0
    #[arg(long)]
    pub serial: Option<String>,

    /// Serial baud rate (USB CDC ignores it but the host needs one)
    #[arg(long)]
    pub baud: Option<u32>,

    /// Raw magnitude that maps to max_mps
    #[arg(long)]
    pub raw_max: Option<i32>,

    /// Velocity at raw_max
    #[arg(long)]
    pub max_mps: Option<f64>,

    /// Deadman timeout carried in motor commands (ms)
    #[arg(long)]
    pub deadman_ms: Option<u32>,

    /// Motor command publish rate (Hz)
    #[arg(long)]
    pub publish_hz: Option<f64>,

    /// Velocity unit label in published commands
    #[arg(long)]
    pub unit: Option<String>,
}

/// Raw `config.toml` contents. Unknown keys are tolerated.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    controller: ControllerTable,
    #[serde(default)]
    motor: MotorTable,
}

#[derive(Debug, Default, Deserialize)]
struct ControllerTable {
    serial: Option<String>,
    baud: Option<u32>,
    raw_max: Option<i32>,
    max_mps: Option<f64>,
    deadman_ms: Option<u32>,
    publish_hz: Option<f64>,
    unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MotorTable {
    deadman_ms: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Pick the config file per the CLI flags: explicit path, or ./config.toml
/// when it exists, or nothing.
fn resolve_file(config: Option<&Path>, no_config: bool) -> Result<FileConfig, ConfigError> {
    if no_config {
        return Ok(FileConfig::default());
    }
    if let Some(path) = config {
        return FileConfig::load(path);
    }
    let fallback = Path::new("config.toml");
    if fallback.exists() {
        FileConfig::load(fallback)
    } else {
        Ok(FileConfig::default())
    }
}

/// Endpoint overrides for the zenoh session.
#[derive(Debug, Clone)]
pub struct ZenohOpts {
    pub config: Option<PathBuf>,
    pub mode: String,
    pub connect: Vec<String>,
}

impl From<&CommonArgs> for ZenohOpts {
    fn from(common: &CommonArgs) -> Self {
        Self {
            config: common.zenoh_config.clone(),
            mode: common.mode.clone(),
            connect: common.connect.clone(),
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Validated settings for the teleop front-end.
#[derive(Debug, Clone)]
pub struct TeleopConfig {
    pub robot_id: String,
    pub zenoh: ZenohOpts,
    pub step: f64,
    pub publish_hz: f64,
    pub deadman_ms: u32,
    pub gyro_path: Option<String>,
    pub banner: String,
}

impl TeleopConfig {
    pub fn from_args(args: TeleopArgs) -> Result<Self, ConfigError> {
        topic::validate_robot_id(&args.common.robot_id)?;
        check_range("step", args.step, 0.0, 2.0)?;
        check_range("publish_hz", args.publish_hz, 1.0, 60.0)?;
        check_range("deadman_ms", args.deadman_ms as f64, 50.0, 2000.0)?;
        Ok(Self {
            zenoh: ZenohOpts::from(&args.common),
            robot_id: args.common.robot_id,
            step: args.step,
            publish_hz: args.publish_hz,
            deadman_ms: args.deadman_ms,
            gyro_path: args.gyro_path,
            banner: args.banner,
        })
    }
}

/// Validated settings for the serial front-end.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub robot_id: String,
    pub zenoh: ZenohOpts,
    pub serial_port: String,
    pub baud: u32,
    pub raw_max: i32,
    pub max_mps: f64,
    pub deadman_ms: u32,
    pub publish_hz: f64,
    pub unit: String,
}

impl SerialConfig {
    pub fn from_args(args: SerialArgs) -> Result<Self, ConfigError> {
        let file = resolve_file(args.config.as_deref(), args.no_config)?;
        Self::merge(args, file)
    }

    /// Merge CLI flags over file values over defaults, then validate.
    fn merge(args: SerialArgs, file: FileConfig) -> Result<Self, ConfigError> {
        topic::validate_robot_id(&args.common.robot_id)?;

        let controller = file.controller;
        let serial_port = args
            .serial
            .or(controller.serial)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingSerialPort)?;

        let baud = args.baud.or(controller.baud).unwrap_or(DEFAULT_BAUD);
        let raw_max = args.raw_max.or(controller.raw_max).unwrap_or(DEFAULT_RAW_MAX);
        let max_mps = args.max_mps.or(controller.max_mps).unwrap_or(DEFAULT_MAX_MPS);
        let publish_hz = args
            .publish_hz
            .or(controller.publish_hz)
            .unwrap_or(DEFAULT_SERIAL_HZ);
        // [controller] overrides the [motor] deadman fallback
        let deadman_ms = args
            .deadman_ms
            .or(controller.deadman_ms)
            .or(file.motor.deadman_ms)
            .unwrap_or(DEFAULT_DEADMAN_MS);
        let unit = args
            .unit
            .or(controller.unit)
            .unwrap_or_else(|| DEFAULT_UNIT.to_string());

        check_range("baud", baud as f64, 1200.0, 2_000_000.0)?;
        check_range("raw_max", raw_max as f64, 1.0, 10_000.0)?;
        check_range("max_mps", max_mps, 0.0, 5.0)?;
        check_range("publish_hz", publish_hz, 1.0, 60.0)?;
        check_range("deadman_ms", deadman_ms as f64, 50.0, 2000.0)?;

        Ok(Self {
            zenoh: ZenohOpts::from(&args.common),
            robot_id: args.common.robot_id,
            serial_port,
            baud,
            raw_max,
            max_mps,
            deadman_ms,
            publish_hz,
            unit,
        })
    }
}
