//! Integer compensation formulas for the BME680.
//!
//! Raw ADC values are turned into physical units with the factory-fused
//! calibration coefficients of the individual chip. All arithmetic follows the
//! Bosch reference integer implementation, so no FPU is required.

use crate::settings::Settings;

/// Lookup tables used by the gas resistance calculation.
mod gas_constants {
    /// Base compensation per gas range.
    pub static ARRAY1_INT: [u32; 16] = [
        2147483647, 2147483647, 2147483647, 2147483647, 2147483647, 2126008810, 2147483647,
        2130303777, 2147483647, 2147483647, 2143188679, 2136746228, 2147483647, 2126008810,
        2147483647, 2147483647,
    ];
    /// Range scaling used to convert the ADC value into ohms.
    pub static ARRAY2_INT: [u32; 16] = [
        4096000000, 2048000000, 1024000000, 512000000, 255744255, 127110228, 64000000, 32258064,
        16016016, 8000000, 4000000, 2000000, 1000000, 500000, 250000, 125000,
    ];
}

/// Hottest temperature the hot plate is ever programmed to, in °C.
pub const MAX_HEATER_TEMP: u16 = 400;

/// Heater durations at or above this value saturate the register, in ms.
pub const MAX_HEATER_DURATION: u16 = 0xFC0;

/// Size of the first calibration block (0x89..0xA1).
pub const CALIB_BLOCK1_LEN: usize = 25;
/// Size of the second calibration block (0xE1..0xF0).
pub const CALIB_BLOCK2_LEN: usize = 16;

/// Factory-fused calibration coefficients read from the sensor.
/// These are unique to every individual chip.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Calibration {
    pub par_h1: u16,
    pub par_h2: u16,
    pub par_h3: i8,
    pub par_h4: i8,
    pub par_h5: i8,
    pub par_h6: u8,
    pub par_h7: i8,
    pub par_g1: i8,
    pub par_g2: i16,
    pub par_g3: i8,
    pub par_t1: u16,
    pub par_t2: i16,
    pub par_t3: i8,
    pub par_p1: u16,
    pub par_p2: i16,
    pub par_p3: i8,
    pub par_p4: i16,
    pub par_p5: i16,
    pub par_p6: i8,
    pub par_p7: i8,
    pub par_p8: i16,
    pub par_p9: i16,
    pub par_p10: u8,
    pub res_heat_range: u8,
    pub res_heat_val: i8,
    pub range_sw_err: i8,
}

/// Result of the temperature compensation.
///
/// `fine` is required by the pressure and humidity formulas.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CompensatedTemp {
    pub fine: i32,
    /// Degrees Celsius * 100.
    pub centi_celsius: i32,
}

impl Calibration {
    /// Decodes the coefficient blocks read from 0x89 (25 bytes) and 0xE1
    /// (16 bytes), concatenated in that order.
    ///
    /// The heater fields (`res_heat_*`, `range_sw_err`) live in separate
    /// registers and are set by [`Calibration::set_heater_registers`].
    pub fn from_blocks(buffer: &[u8; CALIB_BLOCK1_LEN + CALIB_BLOCK2_LEN]) -> Self {
        let le16 = |lsb: usize, msb: usize| u16::from_le_bytes([buffer[lsb], buffer[msb]]);

        Calibration {
            par_t1: le16(33, 34),
            par_t2: le16(1, 2) as i16,
            par_t3: buffer[3] as i8,
            par_p1: le16(5, 6),
            par_p2: le16(7, 8) as i16,
            par_p3: buffer[9] as i8,
            par_p4: le16(11, 12) as i16,
            par_p5: le16(13, 14) as i16,
            par_p6: buffer[16] as i8,
            par_p7: buffer[15] as i8,
            par_p8: le16(19, 20) as i16,
            par_p9: le16(21, 22) as i16,
            par_p10: buffer[23],
            // H1 and H2 share the nibbles of byte 26.
            par_h1: ((buffer[27] as u16) << 4) | (buffer[26] & 0x0F) as u16,
            par_h2: ((buffer[25] as u16) << 4) | (buffer[26] >> 4) as u16,
            par_h3: buffer[28] as i8,
            par_h4: buffer[29] as i8,
            par_h5: buffer[30] as i8,
            par_h6: buffer[31],
            par_h7: buffer[32] as i8,
            par_g1: buffer[37] as i8,
            par_g2: le16(35, 36) as i16,
            par_g3: buffer[38] as i8,
            ..Calibration::default()
        }
    }

    /// Stores the raw values of registers 0x00 (res_heat_val), 0x02
    /// (res_heat_range) and 0x04 (range_sw_err).
    pub fn set_heater_registers(&mut self, heat_val: u8, heat_range: u8, sw_err: u8) {
        self.res_heat_val = heat_val as i8;
        self.res_heat_range = (heat_range & 0x30) >> 4;
        self.range_sw_err = ((sw_err & 0xF0) as i8) / 16;
    }

    /// Converts the raw temperature ADC value.
    ///
    /// This must run first: its `fine` value is the temperature reference for
    /// the pressure and humidity formulas.
    pub fn temperature(&self, temp_adc: u32) -> CompensatedTemp {
        let var1 = ((temp_adc as i64) >> 3) - ((self.par_t1 as i64) << 1);
        let var2 = (var1 * self.par_t2 as i64) >> 11;
        let var3 = ((((var1 >> 1) * (var1 >> 1)) >> 12) * ((self.par_t3 as i64) << 4)) >> 14;
        let fine = (var2 + var3) as i32;

        CompensatedTemp {
            fine,
            centi_celsius: ((fine as i64 * 5 + 128) >> 8) as i32,
        }
    }

    /// Converts the raw pressure ADC value into pascal.
    pub fn pressure(&self, t_fine: i32, press_adc: u32) -> u32 {
        let mut var1 = ((t_fine as i64) >> 1) - 64_000;
        let mut var2 = ((((var1 >> 2) * (var1 >> 2)) >> 11) * self.par_p6 as i64) >> 2;
        var2 += (var1 * self.par_p5 as i64) << 1;
        var2 = (var2 >> 2) + ((self.par_p4 as i64) << 16);
        var1 = (((((var1 >> 2) * (var1 >> 2)) >> 13) * ((self.par_p3 as i64) << 5)) >> 3)
            + ((self.par_p2 as i64 * var1) >> 1);
        var1 >>= 18;
        var1 = ((32768 + var1) * self.par_p1 as i64) >> 15;

        if var1 == 0 {
            return 0;
        }

        let mut press_comp = 1_048_576 - press_adc as i64;
        press_comp = (press_comp - (var2 >> 12)) * 3125;
        press_comp = if press_comp >= (1 << 30) {
            (press_comp / var1) << 1
        } else {
            (press_comp << 1) / var1
        };

        let var1 = (self.par_p9 as i64 * (((press_comp >> 3) * (press_comp >> 3)) >> 13)) >> 12;
        let var2 = ((press_comp >> 2) * self.par_p8 as i64) >> 13;
        let cube = (press_comp >> 8)
            .wrapping_mul(press_comp >> 8)
            .wrapping_mul(press_comp >> 8);
        let var3 = cube.wrapping_mul(self.par_p10 as i64) >> 17;

        press_comp += (var1 + var2 + var3 + ((self.par_p7 as i64) << 7)) >> 4;
        press_comp.clamp(0, u32::MAX as i64) as u32
    }

    /// Converts the raw humidity ADC value into milli-percent (%RH * 1000),
    /// clamped to 0..=100 %.
    pub fn humidity(&self, t_fine: i32, hum_adc: u16) -> u32 {
        let temp_scaled = (t_fine as i64 * 5 + 128) >> 8;
        let var1 = hum_adc as i64
            - (self.par_h1 as i64 * 16)
            - (((temp_scaled * self.par_h3 as i64) / 100) >> 1);
        let var2 = (self.par_h2 as i64
            * (((temp_scaled * self.par_h4 as i64) / 100)
                + (((temp_scaled * ((temp_scaled * self.par_h5 as i64) / 100)) >> 6) / 100)
                + (1 << 14)))
            >> 10;
        let var3 = var1 * var2;
        let var4 = (((self.par_h6 as i64) << 7) + ((temp_scaled * self.par_h7 as i64) / 100)) >> 4;
        let var5 = ((var3 >> 14) * (var3 >> 14)) >> 10;
        let var6 = (var4 * var5) >> 1;

        let hum_comp = (((var3 + var6) >> 10) * 1000) >> 12;
        hum_comp.clamp(0, 100_000) as u32
    }

    /// Converts the raw gas ADC value and its range into ohms.
    pub fn gas_resistance(&self, gas_adc: u16, gas_range: u8) -> u32 {
        let range = (gas_range & 0x0F) as usize;
        let lookup = gas_constants::ARRAY1_INT[range] as i64;
        let var1 = ((1340 + 5 * self.range_sw_err as i64) * lookup) >> 16;
        let var2 = ((gas_adc as i64) << 15) - (1 << 24) + var1;
        if var2 <= 0 {
            return 0;
        }
        let var3 = (gas_constants::ARRAY2_INT[range] as i64 * var1) >> 9;

        ((var3 + (var2 >> 1)) / var2) as u32
    }

    /// Computes the res_heat_0 register value for a target plate temperature.
    ///
    /// The target is capped at [`MAX_HEATER_TEMP`] to protect the membrane.
    pub fn heater_resistance(&self, target_temp: u16, ambient_temp: i8) -> u8 {
        let target = target_temp.min(MAX_HEATER_TEMP) as i64;

        let var1 = ((ambient_temp as i64 * self.par_g3 as i64) / 1000) * 256;
        let var2 = (self.par_g1 as i64 + 784)
            * (((((self.par_g2 as i64 + 154_009) * target * 5) / 100) + 3_276_800) / 10);
        let var3 = var1 + (var2 / 2);
        let var4 = var3 / (self.res_heat_range as i64 + 4);
        let var5 = 131 * self.res_heat_val as i64 + 65_536;
        if var5 == 0 {
            return 0;
        }

        let res_heat_x100 = ((var4 / var5) - 250) * 34;
        ((res_heat_x100 + 50) / 100) as u8
    }
}

/// Encodes a heater duration into the gas_wait_0 register format:
/// 6 bit mantissa and a 2 bit multiplier of 1, 4, 16 or 64 ms.
///
/// Durations of [`MAX_HEATER_DURATION`] ms or more saturate at `0xFF`.
pub fn heater_duration(duration_ms: u16) -> u8 {
    if duration_ms >= MAX_HEATER_DURATION {
        return 0xFF;
    }

    let mut duration = duration_ms;
    let mut factor = 0u8;
    while duration > 0x3F {
        duration /= 4;
        factor += 1;
    }
    duration as u8 + factor * 64
}

/// Length of one forced-mode conversion for the given settings, in ms.
///
/// Includes the wake-up time and, when the heater runs, the heating phase.
pub fn profile_duration(settings: &Settings) -> u32 {
    let meas_cycles =
        settings.os_temp.cycles() + settings.os_pres.cycles() + settings.os_hum.cycles();

    let mut tph_dur = meas_cycles * 1963;
    tph_dur += 477 * 4; // TPH switching
    tph_dur += 477 * 5; // gas measurement
    tph_dur += 500; // round to the closest ms
    tph_dur /= 1000;
    tph_dur += 1; // wake up

    if settings.heater.is_enabled() {
        tph_dur += settings.heater.duration_ms as u32;
    }
    tph_dur
}
