//! Command-line interface

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use windvane_core::config::WindvaneConfig;

#[derive(Parser, Debug)]
#[command(name = "windvane")]
#[command(version, about = "Davis anemometer acquisition with continuous calibration", long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Serial device path
    #[arg(long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Reporting interval in seconds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Speed calibration factor
    #[arg(long)]
    pub calibration_factor: Option<f64>,

    /// Direction offset in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub direction_offset: Option<f64>,

    /// Direction scale factor
    #[arg(long)]
    pub direction_scale: Option<f64>,

    /// Enable continuous calibration against the reference station
    #[arg(long)]
    pub continuous: bool,

    /// Address to receive reference station broadcasts on
    #[arg(long)]
    pub reference_bind: Option<SocketAddr>,

    /// Also publish every raw sample
    #[arg(long)]
    pub publish_samples: bool,

    /// Use the simulated sensor instead of a serial port
    #[arg(long, conflicts_with_all = ["port", "baud"])]
    pub demo: bool,

    /// List serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Layer command-line overrides on top of the file configuration
    pub fn apply(&self, config: &mut WindvaneConfig) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(interval) = self.interval {
            config.reporting.interval_secs = interval;
        }
        if let Some(factor) = self.calibration_factor {
            config.calibration.speed_factor = factor;
        }
        if let Some(offset) = self.direction_offset {
            config.calibration.direction_offset = offset;
        }
        if let Some(scale) = self.direction_scale {
            config.calibration.direction_scale = scale;
        }
        if self.continuous {
            config.continuous.enabled = true;
        }
        if let Some(addr) = self.reference_bind {
            config.reference.bind_addr = addr;
        }
        if self.publish_samples {
            config.reporting.publish_samples = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "windvane",
            "--port",
            "/dev/ttyACM0",
            "--interval",
            "30",
            "--direction-offset",
            "-12.5",
            "--continuous",
        ])
        .unwrap();
        let mut config = WindvaneConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.reporting.interval_secs, 30);
        assert_eq!(config.calibration.direction_offset, -12.5);
        assert!(config.continuous.enabled);
        assert_eq!(config.serial.baud_rate, 115200);
    }

    #[test]
    fn test_no_flags_leave_config_alone() {
        let cli = Cli::try_parse_from(["windvane"]).unwrap();
        let mut config = WindvaneConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, WindvaneConfig::default());
    }

    #[test]
    fn test_demo_conflicts_with_port() {
        assert!(Cli::try_parse_from(["windvane", "--demo", "--port", "/dev/ttyUSB1"]).is_err());
    }
}
