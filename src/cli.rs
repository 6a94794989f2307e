//! Command line options of the `bme680-monitor` binary.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::transport::Address;

/// Read a BME680 in forced mode and print temperature, humidity, pressure
/// and gas resistance.
#[derive(Debug, Clone, Parser)]
#[command(name = "bme680-monitor")]
pub struct Args {
    /// I2C device node
    #[arg(short = 'b', long = "bus", default_value = "/dev/i2c-1")]
    pub bus: PathBuf,

    /// I2C address, 0x76 or 0x77
    #[arg(short = 'A', long = "address", default_value = "0x77", value_parser = parse_address)]
    pub address: Address,

    /// Temperature oversampling (0, 1, 2, 4, 8, 16)
    #[arg(short = 'T', long = "temp-oversampling", default_value_t = 16)]
    pub temp_oversampling: u8,

    /// Humidity oversampling (0, 1, 2, 4, 8, 16)
    #[arg(short = 'H', long = "hum-oversampling", default_value_t = 8)]
    pub hum_oversampling: u8,

    /// Pressure oversampling (0, 1, 2, 4, 8, 16)
    #[arg(short = 'P', long = "pres-oversampling", default_value_t = 8)]
    pub pres_oversampling: u8,

    /// IIR filter size (0, 1, 3, 7, 15, 31, 63, 127)
    #[arg(short = 'F', long = "filter", default_value_t = 7)]
    pub filter: u8,

    /// Heater temperature in °C, 0 disables gas measurement
    #[arg(
        short = 'C',
        long = "heater-temp",
        default_value_t = 300,
        value_parser = clap::value_parser!(u16).range(0..=400)
    )]
    pub heater_temp: u16,

    /// Heater warm-up time in ms, 0 disables gas measurement
    #[arg(
        short = 'K',
        long = "heater-time",
        default_value_t = 150,
        value_parser = clap::value_parser!(u16).range(0..=4032)
    )]
    pub heater_time: u16,

    /// Sea-level pressure in Pa (6 digits) for the height calculation
    #[arg(short = 'M', long = "sea-level", value_parser = parse_sea_level)]
    pub sea_level: Option<f32>,

    /// Number of measurements, 0 runs until interrupted
    #[arg(short = 'L', long = "loop", default_value_t = 0)]
    pub loop_count: u32,

    /// Delay between measurements in seconds
    #[arg(short = 'D', long = "delay", default_value_t = 5)]
    pub delay: u64,

    /// Output format string, see the output module for the tokens
    #[arg(short = 'O', long = "format")]
    pub format: Option<String>,

    /// Append every output line to this file
    #[arg(short = 'W', long = "write")]
    pub write: Option<PathBuf>,

    /// No coloured console output
    #[arg(short = 'B', long = "no-color")]
    pub no_color: bool,

    /// Verbosity: 1 program messages, 2 also driver messages
    #[arg(
        short = 'V',
        long = "verbose",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    pub verbose: u8,
}

impl Args {
    /// Log filter for the requested verbosity.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }

    /// Whether gas measurement is requested at all.
    pub fn gas_enabled(&self) -> bool {
        self.heater_temp != 0 && self.heater_time != 0
    }
}

/// Accepts the address in hex (`0x77`) or decimal (`119`).
fn parse_address(value: &str) -> Result<Address, String> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"));
    let parsed = match hex {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => value.parse::<u8>(),
    }
    .map_err(|e| format!("invalid address {}: {}", value, e))?;

    Address::from_u8(parsed)
        .ok_or_else(|| format!("incorrect BME680 I2C address {:#04x}", parsed))
}

fn parse_sea_level(value: &str) -> Result<f32, String> {
    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid pressure {}, must be 6 digits in Pa", value));
    }
    value
        .parse::<f32>()
        .map_err(|e| format!("invalid pressure {}: {}", value, e))
}
