//! TOML configuration for the embosser host.
//!
//! Every field has a serde default so a partial file (or none at all for the
//! geometry) still yields a usable configuration. The defaults are the
//! calibration of the reference device: US letter paper, 25 mm margins,
//! 1-unit dots at 1.5 mm per unit.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub gcode: GcodeConfig,
}

/// Serial device settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud")]
    pub baud: u32,

    /// How long to wait for the firmware boot banner after opening the port.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-command acknowledgment timeout. Absent means wait forever, which
    /// matches the firmware's own expectation that the host never gives up
    /// on an in-flight command.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,
}

/// Physical page geometry. Paper dimensions and margins are in millimetres;
/// dot geometry is in abstract units scaled by `unit_mm`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayoutConfig {
    /// Millimetres per geometry unit. Larger values embolden the font.
    #[serde(default = "default_unit_mm")]
    pub unit_mm: f64,

    #[serde(default = "default_dot_diameter")]
    pub dot_diameter: f64,

    /// Gap between adjacent dots within a cell, in units.
    #[serde(default = "default_dot_gap")]
    pub dot_gap: f64,

    /// Gap between adjacent cells on a row, in units.
    #[serde(default = "default_column_gap")]
    pub column_gap: f64,

    /// Gap between rows, in units.
    #[serde(default = "default_row_gap")]
    pub row_gap: f64,

    #[serde(default = "default_paper_width")]
    pub paper_width: f64,

    #[serde(default = "default_paper_height")]
    pub paper_height: f64,

    #[serde(default = "default_margin")]
    pub left_margin: f64,

    #[serde(default = "default_margin")]
    pub right_margin: f64,

    #[serde(default = "default_margin")]
    pub top_margin: f64,

    #[serde(default = "default_margin")]
    pub bottom_margin: f64,
}

/// Motion and punch command parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GcodeConfig {
    /// Offset of the page origin relative to the machine origin, in mm.
    #[serde(default = "default_offset_x")]
    pub offset_x: f64,

    #[serde(default = "default_offset_y")]
    pub offset_y: f64,

    /// Feed rate for lateral moves between dots, mm/min.
    #[serde(default = "default_lateral_feed")]
    pub lateral_feed: u32,

    /// Feed rate for the punch stroke, mm/min.
    #[serde(default = "default_punch_feed")]
    pub punch_feed: u32,

    /// Extrusion distance of one punch stroke.
    #[serde(default = "default_punch_amount")]
    pub punch_amount: f64,

    /// Mirror the X axis (`paper_width - x`) for devices mounted with a
    /// flipped print orientation.
    #[serde(default)]
    pub mirror_x: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ack_timeout_ms: None,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            unit_mm: default_unit_mm(),
            dot_diameter: default_dot_diameter(),
            dot_gap: default_dot_gap(),
            column_gap: default_column_gap(),
            row_gap: default_row_gap(),
            paper_width: default_paper_width(),
            paper_height: default_paper_height(),
            left_margin: default_margin(),
            right_margin: default_margin(),
            top_margin: default_margin(),
            bottom_margin: default_margin(),
        }
    }
}

impl Default for GcodeConfig {
    fn default() -> Self {
        Self {
            offset_x: default_offset_x(),
            offset_y: default_offset_y(),
            lateral_feed: default_lateral_feed(),
            punch_feed: default_punch_feed(),
            punch_amount: default_punch_amount(),
            mirror_x: false,
        }
    }
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud() -> u32 {
    250_000
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_unit_mm() -> f64 {
    1.5
}
fn default_dot_diameter() -> f64 {
    1.0
}
fn default_dot_gap() -> f64 {
    1.0
}
fn default_column_gap() -> f64 {
    3.0
}
fn default_row_gap() -> f64 {
    4.0
}
fn default_paper_width() -> f64 {
    215.9
}
fn default_paper_height() -> f64 {
    279.4
}
fn default_margin() -> f64 {
    25.0
}
fn default_offset_x() -> f64 {
    23.0
}
fn default_offset_y() -> f64 {
    30.0
}
fn default_lateral_feed() -> u32 {
    4000
}
fn default_punch_feed() -> u32 {
    800
}
fn default_punch_amount() -> f64 {
    2.0
}

/// Loads configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut file = File::open(path.as_ref())?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let config: Config = toml::from_str(&contents)?;
    tracing::info!("loaded configuration from {}", path.as_ref().display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_calibration() {
        let config = Config::default();
        assert_eq!(config.device.baud, 250_000);
        assert_eq!(config.device.ack_timeout_ms, None);
        assert_eq!(config.layout.unit_mm, 1.5);
        assert_eq!(config.layout.paper_width, 215.9);
        assert_eq!(config.gcode.lateral_feed, 4000);
        assert!(!config.gcode.mirror_x);
    }

    #[test]
    fn loads_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[device]\nport = \"/dev/ttyACM3\"\nack_timeout_ms = 5000\n\n[gcode]\nmirror_x = true\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.device.port, "/dev/ttyACM3");
        assert_eq!(config.device.ack_timeout_ms, Some(5000));
        assert!(config.gcode.mirror_x);
        // Untouched sections keep their defaults.
        assert_eq!(config.layout.top_margin, 25.0);
        assert_eq!(config.gcode.punch_feed, 800);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device\nport = 3").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
