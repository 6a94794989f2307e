//! Forced-mode measurement cycle.
//!
//! A [`Session`] owns the sensor configuration and the last [`Reading`]. Each
//! cycle pushes the configuration, triggers one forced conversion, waits for
//! it and validates the result:
//!
//! - no new data: temperature, humidity and pressure are NaN, gas is 0
//! - disabled channel: NaN (gas: 0)
//! - gas without a stable heater: 0

use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::derived;
use crate::gate::EnabledChannels;
use crate::settings::{Channel, IirFilter, Oversampling, Settings};
use crate::{has_new_data, heater_stable, Clock, PowerMode, Select, SensorDriver};

/// The wait before reading a result is this multiple of the time left until
/// the expected completion.
pub const DEFAULT_WAIT_FACTOR: u32 = 2;

/// Session errors. `E` is the error type of the [`SensorDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Oversampling factor or filter size out of its legal set.
    InvalidParameter,
    /// Writing the configuration failed.
    DeviceConfig(E),
    /// Triggering the forced conversion failed.
    DeviceMode(E),
    /// Reading the field data failed.
    DeviceRead(E),
    /// The soft reset failed.
    DeviceReset(E),
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameter => f.write_str("invalid parameter"),
            Error::DeviceConfig(e) => write!(f, "failed to apply sensor settings: {}", e),
            Error::DeviceMode(e) => write!(f, "failed to set power mode: {}", e),
            Error::DeviceRead(e) => write!(f, "failed to read sensor data: {}", e),
            Error::DeviceReset(e) => write!(f, "failed to reset sensor: {}", e),
        }
    }
}

impl<E> std::error::Error for Error<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidParameter => None,
            Error::DeviceConfig(e)
            | Error::DeviceMode(e)
            | Error::DeviceRead(e)
            | Error::DeviceReset(e) => Some(e),
        }
    }
}

/// Result type alias for session operations.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Most recent measurement in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// °C, NaN when unavailable.
    pub temperature: f32,
    /// %RH, NaN when unavailable.
    pub humidity: f32,
    /// Pa, NaN when unavailable.
    pub pressure: f32,
    /// Ω, 0 when no valid gas reading exists.
    pub gas_resistance: u32,
}

impl Default for Reading {
    fn default() -> Self {
        Reading {
            temperature: f32::NAN,
            humidity: f32::NAN,
            pressure: f32::NAN,
            gas_resistance: 0,
        }
    }
}

impl Reading {
    /// Dew point in °C, NaN unless humidity is positive.
    pub fn dew_point(&self) -> f32 {
        if self.humidity > 0.0 {
            derived::dew_point(self.temperature, self.humidity)
        } else {
            f32::NAN
        }
    }
}

/// An outstanding forced conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeasurementCycle {
    power_mode: PowerMode,
    requested: Select,
    /// Absolute clock time in ms.
    expected_ready_at: u64,
}

/// Measurement cycle controller for one sensor.
///
/// `D` is the sensor driver, `DELAY` blocks for the conversion time and `CLK`
/// supplies the monotonic time used for the completion deadline.
pub struct Session<D, DELAY, CLK> {
    driver: D,
    delay: DELAY,
    clock: CLK,
    settings: Settings,
    enabled: EnabledChannels,
    cycle: Option<MeasurementCycle>,
    reading: Reading,
    fresh: bool,
    wait_factor: u32,
}

impl<D, DELAY, CLK> Session<D, DELAY, CLK>
where
    D: SensorDriver,
    DELAY: DelayNs,
    CLK: Clock,
{
    /// Creates a session with the default settings, every channel enabled.
    ///
    /// Does not talk to the sensor; the configuration is pushed at the start
    /// of each cycle.
    pub fn new(driver: D, delay: DELAY, clock: CLK) -> Self {
        Session {
            driver,
            delay,
            clock,
            settings: Settings::default(),
            enabled: EnabledChannels::default(),
            cycle: None,
            reading: Reading::default(),
            fresh: false,
            wait_factor: DEFAULT_WAIT_FACTOR,
        }
    }

    /// Sets the oversampling of `channel` to `factor` samples.
    ///
    /// A factor of 0 disables the channel. Anything but 0, 1, 2, 4, 8 or 16 is
    /// rejected and leaves the configuration unchanged.
    pub fn set_oversampling(&mut self, channel: Channel, factor: u8) -> Result<(), D::Error> {
        let os = Oversampling::from_factor(factor);
        let os = os.ok_or(Error::InvalidParameter)?;
        let enabled = os.is_enabled();
        match channel {
            Channel::Temperature => {
                self.settings.os_temp = os;
                self.enabled.temperature = enabled;
            }
            Channel::Humidity => {
                self.settings.os_hum = os;
                self.enabled.humidity = enabled;
            }
            Channel::Pressure => {
                self.settings.os_pres = os;
                self.enabled.pressure = enabled;
            }
        }
        Ok(())
    }

    /// Sets the IIR filter window. A size of 0 disables the filter.
    pub fn set_filter(&mut self, size: u8) -> Result<(), D::Error> {
        let filter = IirFilter::from_size(size).ok_or(Error::InvalidParameter)?;
        self.settings.filter = filter;
        self.enabled.filter = filter.is_enabled();
        Ok(())
    }

    /// Sets the heater profile. Gas measurement runs only when both values
    /// are nonzero.
    pub fn set_heater(&mut self, target_temp: u16, duration_ms: u16) {
        self.settings.heater.target_temp = target_temp;
        self.settings.heater.duration_ms = duration_ms;
        self.enabled.gas = self.settings.heater.is_enabled();
    }

    /// Multiple of the remaining conversion time waited by [`fetch_result`].
    ///
    /// [`fetch_result`]: Session::fetch_result
    pub fn set_wait_factor(&mut self, factor: u32) {
        self.wait_factor = factor;
    }

    /// Starts a forced conversion and returns its expected completion time.
    ///
    /// While a conversion is outstanding this does nothing and returns the
    /// existing deadline. On error no conversion is left outstanding.
    pub fn begin_measurement(&mut self) -> Result<u64, D::Error> {
        if let Some(cycle) = &self.cycle {
            debug!("measurement already in progress");
            return Ok(cycle.expected_ready_at);
        }

        let requested = self.enabled.select();
        debug!("applying settings {:?}", self.settings);
        self.driver
            .apply_settings(requested, &self.settings)
            .map_err(Error::DeviceConfig)?;
        self.driver
            .apply_mode(PowerMode::Forced)
            .map_err(Error::DeviceMode)?;

        let duration = self.driver.profile_duration(&self.settings);
        let expected_ready_at = self.clock.now_ms() + duration as u64;
        debug!("conversion started, {} ms", duration);

        self.cycle = Some(MeasurementCycle {
            power_mode: PowerMode::Forced,
            requested,
            expected_ready_at,
        });
        Ok(expected_ready_at)
    }

    /// Runs a full cycle and returns the new reading.
    ///
    /// Starts a conversion unless one is outstanding, then waits
    /// `wait_factor` times the time left until it completes. A stale sample
    /// is not an error. On error the previous reading is kept.
    pub fn fetch_result(&mut self) -> Result<Reading, D::Error> {
        let ready_at = self.begin_measurement()?;

        let now = self.clock.now_ms();
        if ready_at > now {
            let wait = (ready_at - now).saturating_mul(self.wait_factor as u64);
            debug!("waiting {} ms", wait);
            self.delay.delay_ms(u32::try_from(wait).unwrap_or(u32::MAX));
        }

        if let Some(cycle) = self.cycle.take() {
            debug!(
                "{:?} conversion done, requested {:#04x}",
                cycle.power_mode,
                cycle.requested.bits()
            );
        }

        let data = self.driver.field_data().map_err(Error::DeviceRead)?;

        self.fresh = has_new_data(data.status);
        if !self.fresh {
            warn!("no new data");
            self.reading = Reading::default();
            return Ok(self.reading);
        }

        let gas_resistance = if !self.enabled.gas {
            0
        } else if heater_stable(data.status) {
            data.gas_resistance
        } else {
            warn!("gas heater not stable, discarding gas reading");
            0
        };

        self.reading = Reading {
            temperature: EnabledChannels::gate(
                self.enabled.temperature,
                data.temperature as f32 / 100.0,
            ),
            humidity: EnabledChannels::gate(self.enabled.humidity, data.humidity as f32 / 1000.0),
            pressure: EnabledChannels::gate(self.enabled.pressure, data.pressure as f32),
            gas_resistance,
        };

        if self.enabled.temperature {
            let whole_degrees = data.temperature / 100;
            self.settings.ambient_temp = whole_degrees.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
        }

        Ok(self.reading)
    }

    /// Soft-resets the sensor. The configuration is kept and pushed again on
    /// the next cycle; an outstanding conversion is dropped.
    pub fn reset(&mut self) -> Result<(), D::Error> {
        self.cycle = None;
        self.driver.soft_reset().map_err(Error::DeviceReset)
    }

    /// Runs a cycle and returns the temperature in °C.
    pub fn read_temperature(&mut self) -> Result<f32, D::Error> {
        Ok(self.fetch_result()?.temperature)
    }

    /// Runs a cycle and returns the relative humidity in %.
    pub fn read_humidity(&mut self) -> Result<f32, D::Error> {
        Ok(self.fetch_result()?.humidity)
    }

    /// Runs a cycle and returns the pressure in Pa.
    pub fn read_pressure(&mut self) -> Result<f32, D::Error> {
        Ok(self.fetch_result()?.pressure)
    }

    /// Runs a cycle and returns the gas resistance in Ω.
    pub fn read_gas(&mut self) -> Result<u32, D::Error> {
        Ok(self.fetch_result()?.gas_resistance)
    }

    /// Runs a cycle and returns the altitude in m for the given sea-level
    /// pressure in Pa.
    pub fn read_altitude(&mut self, sea_level_pa: f32) -> Result<f32, D::Error> {
        let pressure = self.read_pressure()?;
        Ok(derived::altitude(pressure, sea_level_pa))
    }

    /// The last reading, without any I/O.
    pub fn reading(&self) -> Reading {
        self.reading
    }

    /// Whether the last successful fetch found a new sample.
    pub fn last_sample_fresh(&self) -> bool {
        self.fresh
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn enabled(&self) -> &EnabledChannels {
        &self.enabled
    }

    pub fn is_in_progress(&self) -> bool {
        self.cycle.is_some()
    }

    pub fn wait_factor(&self) -> u32 {
        self.wait_factor
    }

    /// Frees the driver, the delay and the clock.
    pub fn release(self) -> (D, DELAY, CLK) {
        (self.driver, self.delay, self.clock)
    }
}
