//! # BME680 forced-mode monitor
//!
//! Driver and measurement-cycle controller for the Bosch BME680
//! environmental sensor on a Linux I2C bus.
//!
//! The crate is layered the way a reading flows through it:
//!
//! - [`transport`]: register reads/writes over any `embedded-hal` I2C bus,
//!   retried a bounded number of times.
//! - [`device`]: the chip driver. Uses the typestate pattern so that
//!   measurements cannot be taken before the calibration data is loaded, and
//!   implements [`SensorDriver`].
//! - [`session`]: the measurement cycle. Pushes the configuration, triggers a
//!   forced-mode conversion, waits for the expected completion time and
//!   validates the status flags, including the heater stability gate for gas.
//! - [`derived`]: altitude and dew point.
//! - [`output`]: the line template and console/file sink used by the
//!   `bme680-monitor` binary.
//!
//! ## Units
//! - **Temperature**: °C
//! - **Humidity**: %RH
//! - **Pressure**: Pascal (Pa) -> 101325 = 1013.25 hPa
//! - **Gas Resistance**: Ohms (Ω), `0` when no valid gas reading exists
//!
//! ## Example
//!
//! ```no_run
//! use bme680_monitor::device::Bme680;
//! use bme680_monitor::session::Session;
//! use bme680_monitor::settings::Channel;
//! use bme680_monitor::transport::{Address, I2cTransport};
//! use bme680_monitor::MonotonicClock;
//! use linux_embedded_hal::{Delay, I2cdev};
//!
//! let bus = I2cdev::new("/dev/i2c-1").unwrap();
//! let transport = I2cTransport::new(bus, Address::Secondary);
//! let device = Bme680::new(transport, Delay).init().unwrap();
//!
//! let mut session = Session::new(device, Delay, MonotonicClock::new());
//! session.set_oversampling(Channel::Humidity, 8).unwrap();
//! session.set_heater(300, 150);
//!
//! let reading = session.fetch_result().unwrap();
//! println!("{:.2} °C, {} Ω", reading.temperature, reading.gas_resistance);
//! ```

pub mod calc;
pub mod cli;
pub mod derived;
pub mod device;
pub mod gate;
pub mod output;
pub mod session;
pub mod settings;
pub mod transport;

use std::time::Instant;

use settings::Settings;

/// Status bit: the field registers hold a sample not read before.
pub const NEW_DATA_MSK: u8 = 0x80;
/// Status bit: the gas conversion finished with a valid result.
pub const GAS_VALID_MSK: u8 = 0x20;
/// Status bit: the hot plate reached and held its target temperature.
pub const HEAT_STAB_MSK: u8 = 0x10;

/// Returns `true` if `status` carries the new-data flag.
pub fn has_new_data(status: u8) -> bool {
    status & NEW_DATA_MSK != 0
}

/// Returns `true` if `status` reports a stable heater.
pub fn heater_stable(status: u8) -> bool {
    status & HEAT_STAB_MSK != 0
}

/// Sensor power modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    Sleep = 0b00,
    /// One conversion, then back to sleep.
    Forced = 0b01,
}

/// Compensated measurement as returned by the chip driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldData {
    /// Combination of [`NEW_DATA_MSK`], [`GAS_VALID_MSK`] and [`HEAT_STAB_MSK`].
    pub status: u8,
    pub gas_index: u8,
    pub meas_index: u8,
    /// Degrees Celsius * 100.
    pub temperature: i32,
    /// Pascal.
    pub pressure: u32,
    /// %RH * 1000.
    pub humidity: u32,
    /// Ohms.
    pub gas_resistance: u32,
}

/// Which parts of [`Settings`] an `apply_settings` call writes to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Select(u8);

impl Select {
    pub const NONE: Select = Select(0);
    /// Temperature oversampling.
    pub const OST: Select = Select(0x01);
    /// Pressure oversampling.
    pub const OSP: Select = Select(0x02);
    /// Humidity oversampling.
    pub const OSH: Select = Select(0x04);
    /// Heater resistance and duration.
    pub const GAS_MEAS: Select = Select(0x08);
    /// IIR filter.
    pub const FILTER: Select = Select(0x10);
    /// Gas conversion enable.
    pub const RUN_GAS: Select = Select(0x40);
    /// Heater profile index.
    pub const NB_CONV: Select = Select(0x80);
    /// Everything the gas channel needs.
    pub const GAS_SENSOR: Select = Select(0x08 | 0x40 | 0x80);

    pub const fn from_bits(bits: u8) -> Select {
        Select(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if any bit of `other` is set in `self`.
    pub fn intersects(self, other: Select) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: Select) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for Select {
    type Output = Select;

    fn bitor(self, rhs: Select) -> Select {
        Select(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for Select {
    fn bitor_assign(&mut self, rhs: Select) {
        self.0 |= rhs.0;
    }
}

/// The operations a [`session::Session`] needs from the sensor.
///
/// Implemented by [`device::Bme680`] in the `Ready` state; tests substitute a
/// scripted double.
pub trait SensorDriver {
    type Error: core::fmt::Debug;

    /// Writes the parts of `settings` named by `select` to the device.
    fn apply_settings(&mut self, select: Select, settings: &Settings) -> Result<(), Self::Error>;

    /// Switches the device into `mode`.
    fn apply_mode(&mut self, mode: PowerMode) -> Result<(), Self::Error>;

    /// Expected duration of one conversion with `settings`, in ms.
    fn profile_duration(&self, settings: &Settings) -> u32;

    /// Reads and compensates the latest field data.
    fn field_data(&mut self) -> Result<FieldData, Self::Error>;

    /// Resets every register to its power-on value.
    fn soft_reset(&mut self) -> Result<(), Self::Error>;
}

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// [`Clock`] counting milliseconds since its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Error types for the BME680 chip driver.
pub mod error {
    use core::fmt;

    use crate::transport::TransportError;

    /// Errors that can occur while talking to the chip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Bme680Error {
        /// The bus transfer failed after all retries.
        Transport(TransportError),
        /// The chip id register did not read 0x61.
        DeviceNotFound(u8),
        /// The device did not return to sleep mode in time.
        ModeTimeout,
    }

    impl From<TransportError> for Bme680Error {
        fn from(e: TransportError) -> Self {
            Bme680Error::Transport(e)
        }
    }

    impl fmt::Display for Bme680Error {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Bme680Error::Transport(e) => write!(f, "I2C error: {}", e),
                Bme680Error::DeviceNotFound(id) => {
                    write!(f, "unexpected chip id {:#04x}, no BME680 found", id)
                }
                Bme680Error::ModeTimeout => f.write_str("sensor did not enter sleep mode"),
            }
        }
    }

    impl std::error::Error for Bme680Error {}

    /// Result type alias for BME680 operations.
    pub type Result<T> = core::result::Result<T, Bme680Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flags() {
        assert!(has_new_data(0x80));
        assert!(has_new_data(0xB0));
        assert!(!has_new_data(0x30));
        assert!(heater_stable(0x90));
        assert!(!heater_stable(0xA0));
    }

    #[test]
    fn select_bits() {
        let select = Select::OST | Select::FILTER | Select::GAS_SENSOR;
        assert_eq!(select.bits(), 0x01 | 0x10 | 0x08 | 0x40 | 0x80);
        assert!(select.contains(Select::RUN_GAS));
        assert!(select.intersects(Select::OST | Select::OSP));
        assert!(!select.intersects(Select::OSH));
    }
}
