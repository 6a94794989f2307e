//! BME680 chip driver.
//!
//! Uses the typestate pattern: a [`Bme680`] is created `Uninitialized` and
//! only becomes `Ready`, and with it a [`SensorDriver`], once [`Bme680::init`]
//! has verified the chip id and loaded the factory calibration.

use core::marker::PhantomData;

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::calc::{self, Calibration, CALIB_BLOCK1_LEN, CALIB_BLOCK2_LEN};
use crate::error::{self, Bme680Error};
use crate::settings::Settings;
use crate::transport::Transport;
use crate::{
    FieldData, PowerMode, Select, SensorDriver, GAS_VALID_MSK, HEAT_STAB_MSK, NEW_DATA_MSK,
};

/// Register addresses.
mod reg {
    pub const RES_HEAT_VAL: u8 = 0x00;
    pub const RES_HEAT_RANGE: u8 = 0x02;
    pub const RANGE_SW_ERR: u8 = 0x04;
    pub const FIELD0: u8 = 0x1D;
    pub const RES_HEAT0: u8 = 0x5A;
    pub const GAS_WAIT0: u8 = 0x64;
    pub const CTRL_GAS1: u8 = 0x71;
    pub const CTRL_HUM: u8 = 0x72;
    pub const CTRL_MEAS: u8 = 0x74;
    pub const CONFIG: u8 = 0x75;
    pub const CALIB_BLOCK1: u8 = 0x89;
    pub const CHIP_ID: u8 = 0xD0;
    pub const CALIB_BLOCK2: u8 = 0xE1;
    pub const SOFT_RESET: u8 = 0xE0;
}

/// Value of the chip id register on every BME680.
pub const CHIP_ID: u8 = 0x61;

const SOFT_RESET_CMD: u8 = 0xB6;
const RESET_PERIOD_MS: u32 = 10;

/// Delay between two polls of the mode or field registers.
const POLL_PERIOD_MS: u32 = 10;
/// Attempts at reading a field with the new-data bit set.
const FIELD_DATA_TRIES: u8 = 10;
/// Attempts at putting the device to sleep before giving up.
const SLEEP_TRIES: u8 = 10;

const FIELD_LEN: usize = 15;
const MODE_MSK: u8 = 0x03;
const GAS_INDEX_MSK: u8 = 0x0F;
const GAS_RANGE_MSK: u8 = 0x0F;

// --- Typestates ---

/// Driver created, calibration not loaded yet.
pub struct Uninitialized;
/// Calibration loaded, ready for measurements.
pub struct Ready;

/// The BME680 driver.
///
/// `T` is the register [`Transport`], `D` the delay used for the reset and
/// polling periods.
#[derive(Debug)]
pub struct Bme680<T, D, STATE> {
    transport: T,
    delay: D,
    calibration: Calibration,
    chip_id: u8,
    _state: PhantomData<STATE>,
}

impl<T, D, STATE> Bme680<T, D, STATE>
where
    T: Transport,
    D: DelayNs,
{
    /// Reads a single register.
    fn read_reg_byte(&mut self, reg: u8) -> error::Result<u8> {
        let mut buffer = [0];
        self.transport.read(reg, &mut buffer)?;
        Ok(buffer[0])
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> error::Result<()> {
        self.transport.write(reg, &[value])?;
        Ok(())
    }

    /// Resets all registers to their power-on values.
    fn reset(&mut self) -> error::Result<()> {
        debug!("soft reset");
        self.write_reg(reg::SOFT_RESET, SOFT_RESET_CMD)?;
        self.delay.delay_ms(RESET_PERIOD_MS);
        Ok(())
    }

    /// Frees the transport and the delay.
    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }
}

impl<T, D> Bme680<T, D, Uninitialized>
where
    T: Transport,
    D: DelayNs,
{
    /// Creates a new driver instance. Does not talk to the sensor yet.
    pub fn new(transport: T, delay: D) -> Self {
        Bme680 {
            transport,
            delay,
            calibration: Calibration::default(),
            chip_id: 0,
            _state: PhantomData,
        }
    }

    /// Soft-resets the sensor, checks its chip id and loads the calibration.
    ///
    /// # Errors
    /// [`Bme680Error::DeviceNotFound`] if the chip id is not `0x61`, or the
    /// transport error of the first failed transfer.
    pub fn init(mut self) -> error::Result<Bme680<T, D, Ready>> {
        self.reset()?;

        let chip_id = self.read_reg_byte(reg::CHIP_ID)?;
        if chip_id != CHIP_ID {
            return Err(Bme680Error::DeviceNotFound(chip_id));
        }
        info!("BME680 found, chip id {:#04x}", chip_id);

        let calibration = self.read_calibration()?;

        Ok(Bme680 {
            transport: self.transport,
            delay: self.delay,
            calibration,
            chip_id,
            _state: PhantomData,
        })
    }

    /// The coefficients live in two non-contiguous blocks plus three single
    /// heater registers.
    fn read_calibration(&mut self) -> error::Result<Calibration> {
        let mut buffer = [0u8; CALIB_BLOCK1_LEN + CALIB_BLOCK2_LEN];
        let (block1, block2) = buffer.split_at_mut(CALIB_BLOCK1_LEN);
        self.transport.read(reg::CALIB_BLOCK1, block1)?;
        self.transport.read(reg::CALIB_BLOCK2, block2)?;

        let mut calibration = Calibration::from_blocks(&buffer);

        let heat_val = self.read_reg_byte(reg::RES_HEAT_VAL)?;
        let heat_range = self.read_reg_byte(reg::RES_HEAT_RANGE)?;
        let sw_err = self.read_reg_byte(reg::RANGE_SW_ERR)?;
        calibration.set_heater_registers(heat_val, heat_range, sw_err);

        debug!("calibration loaded: {:?}", calibration);
        Ok(calibration)
    }
}

impl<T, D> Bme680<T, D, Ready>
where
    T: Transport,
    D: DelayNs,
{
    pub fn chip_id(&self) -> u8 {
        self.chip_id
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Polls ctrl_meas until the device reports sleep mode, requesting sleep
    /// whenever it is still busy. Returns the last ctrl_meas value read.
    fn enter_sleep(&mut self) -> error::Result<u8> {
        for _ in 0..SLEEP_TRIES {
            let ctrl_meas = self.read_reg_byte(reg::CTRL_MEAS)?;
            if ctrl_meas & MODE_MSK == PowerMode::Sleep as u8 {
                return Ok(ctrl_meas);
            }
            self.write_reg(reg::CTRL_MEAS, ctrl_meas & !MODE_MSK)?;
            self.delay.delay_ms(POLL_PERIOD_MS);
        }
        Err(Bme680Error::ModeTimeout)
    }

    /// Programs heater profile 0 (target resistance and duration).
    fn write_heater_profile(&mut self, settings: &Settings) -> error::Result<()> {
        let res_heat = self
            .calibration
            .heater_resistance(settings.heater.target_temp, settings.ambient_temp);
        let gas_wait = calc::heater_duration(settings.heater.duration_ms);
        debug!(
            "heater profile: {} °C -> res_heat {:#04x}, {} ms -> gas_wait {:#04x}",
            settings.heater.target_temp, res_heat, settings.heater.duration_ms, gas_wait
        );

        self.write_reg(reg::RES_HEAT0, res_heat)?;
        self.write_reg(reg::GAS_WAIT0, gas_wait)
    }

    fn read_field(&mut self) -> error::Result<Option<FieldData>> {
        let mut buffer = [0u8; FIELD_LEN];
        self.transport.read(reg::FIELD0, &mut buffer)?;

        let mut status = buffer[0] & NEW_DATA_MSK;
        status |= buffer[14] & (GAS_VALID_MSK | HEAT_STAB_MSK);
        if !crate::has_new_data(status) {
            return Ok(None);
        }

        // Reconstruct 20-bit, 16-bit and 10-bit ADC values from register bytes
        let press_adc =
            ((buffer[2] as u32) << 12) | ((buffer[3] as u32) << 4) | ((buffer[4] as u32) >> 4);
        let temp_adc =
            ((buffer[5] as u32) << 12) | ((buffer[6] as u32) << 4) | ((buffer[7] as u32) >> 4);
        let hum_adc = ((buffer[8] as u16) << 8) | buffer[9] as u16;
        let gas_adc = ((buffer[13] as u16) << 2) | ((buffer[14] as u16) >> 6);
        let gas_range = buffer[14] & GAS_RANGE_MSK;

        let temp = self.calibration.temperature(temp_adc);

        Ok(Some(FieldData {
            status,
            gas_index: buffer[0] & GAS_INDEX_MSK,
            meas_index: buffer[1],
            temperature: temp.centi_celsius,
            pressure: self.calibration.pressure(temp.fine, press_adc),
            humidity: self.calibration.humidity(temp.fine, hum_adc),
            gas_resistance: self.calibration.gas_resistance(gas_adc, gas_range),
        }))
    }
}

impl<T, D> SensorDriver for Bme680<T, D, Ready>
where
    T: Transport,
    D: DelayNs,
{
    type Error = Bme680Error;

    /// Writes the selected settings. The device is put to sleep first, and
    /// every register is updated read-modify-write.
    fn apply_settings(&mut self, select: Select, settings: &Settings) -> error::Result<()> {
        debug!("applying settings, select {:#04x}", select.bits());

        if select.contains(Select::GAS_MEAS) {
            self.write_heater_profile(settings)?;
        }

        self.enter_sleep()?;

        if select.contains(Select::FILTER) {
            let config = self.read_reg_byte(reg::CONFIG)?;
            self.write_reg(reg::CONFIG, (config & !0x1C) | ((settings.filter as u8) << 2))?;
        }

        if select.intersects(Select::OST | Select::OSP) {
            let mut ctrl_meas = self.read_reg_byte(reg::CTRL_MEAS)?;
            if select.contains(Select::OST) {
                ctrl_meas = (ctrl_meas & !0xE0) | ((settings.os_temp as u8) << 5);
            }
            if select.contains(Select::OSP) {
                ctrl_meas = (ctrl_meas & !0x1C) | ((settings.os_pres as u8) << 2);
            }
            self.write_reg(reg::CTRL_MEAS, ctrl_meas)?;
        }

        if select.contains(Select::OSH) {
            let ctrl_hum = self.read_reg_byte(reg::CTRL_HUM)?;
            self.write_reg(reg::CTRL_HUM, (ctrl_hum & !0x07) | settings.os_hum as u8)?;
        }

        if select.intersects(Select::RUN_GAS | Select::NB_CONV) {
            let mut ctrl_gas = self.read_reg_byte(reg::CTRL_GAS1)?;
            if select.contains(Select::RUN_GAS) {
                let run_gas = settings.heater.is_enabled() as u8;
                ctrl_gas = (ctrl_gas & !0x10) | (run_gas << 4);
            }
            if select.contains(Select::NB_CONV) {
                // Forced mode only ever uses heater profile 0.
                ctrl_gas &= !0x0F;
            }
            self.write_reg(reg::CTRL_GAS1, ctrl_gas)?;
        }

        Ok(())
    }

    fn apply_mode(&mut self, mode: PowerMode) -> error::Result<()> {
        let ctrl_meas = self.enter_sleep()?;
        if mode != PowerMode::Sleep {
            debug!("switching to {:?} mode", mode);
            self.write_reg(reg::CTRL_MEAS, (ctrl_meas & !MODE_MSK) | mode as u8)?;
        }
        Ok(())
    }

    fn profile_duration(&self, settings: &Settings) -> u32 {
        calc::profile_duration(settings)
    }

    /// Polls the field registers until a new sample shows up.
    ///
    /// When no sample arrives within ten polls the returned data has the
    /// new-data bit cleared and all values zeroed.
    fn field_data(&mut self) -> error::Result<FieldData> {
        for _ in 0..FIELD_DATA_TRIES {
            if let Some(data) = self.read_field()? {
                debug!("field data: {:?}", data);
                return Ok(data);
            }
            self.delay.delay_ms(POLL_PERIOD_MS);
        }
        debug!("no new data after {} polls", FIELD_DATA_TRIES);
        Ok(FieldData::default())
    }

    fn soft_reset(&mut self) -> error::Result<()> {
        self.reset()
    }
}
