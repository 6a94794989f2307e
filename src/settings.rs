//! Measurement configuration: oversampling, IIR filter and heater profile.

/// Oversampling settings for temperature, pressure and humidity.
///
/// Higher oversampling rates reduce noise by averaging inside the sensor,
/// but lengthen the conversion and raise the energy used per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Oversampling {
    /// No measurement. Removes the channel from the measurement request.
    Skipped = 0,
    /// 1x oversampling.
    #[default]
    X1 = 1,
    /// 2x oversampling.
    X2 = 2,
    /// 4x oversampling.
    X4 = 3,
    /// 8x oversampling.
    X8 = 4,
    /// 16x oversampling. Best precision, longest conversion.
    X16 = 5,
}

impl Oversampling {
    /// Maps a sample count (0, 1, 2, 4, 8 or 16) to a setting.
    ///
    /// Returns `None` for any other count.
    pub fn from_factor(factor: u8) -> Option<Self> {
        match factor {
            0 => Some(Oversampling::Skipped),
            1 => Some(Oversampling::X1),
            2 => Some(Oversampling::X2),
            4 => Some(Oversampling::X4),
            8 => Some(Oversampling::X8),
            16 => Some(Oversampling::X16),
            _ => None,
        }
    }

    /// Number of ADC conversions this setting performs per cycle.
    pub fn cycles(self) -> u32 {
        match self {
            Oversampling::Skipped => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 4,
            Oversampling::X8 => 8,
            Oversampling::X16 => 16,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Oversampling::Skipped
    }
}

/// Infinite Impulse Response (IIR) filter coefficient.
///
/// Smooths short-term disturbances in pressure and temperature
/// (slammed doors, drafts). Has no effect on humidity or gas.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IirFilter {
    /// Filter off.
    Size0 = 0,
    Size1 = 1,
    #[default]
    Size3 = 2,
    Size7 = 3,
    Size15 = 4,
    Size31 = 5,
    Size63 = 6,
    Size127 = 7,
}

impl IirFilter {
    /// Maps a filter window in samples to a setting.
    ///
    /// Returns `None` unless `size` is one of 0, 1, 3, 7, 15, 31, 63 or 127.
    pub fn from_size(size: u8) -> Option<Self> {
        match size {
            0 => Some(IirFilter::Size0),
            1 => Some(IirFilter::Size1),
            3 => Some(IirFilter::Size3),
            7 => Some(IirFilter::Size7),
            15 => Some(IirFilter::Size15),
            31 => Some(IirFilter::Size31),
            63 => Some(IirFilter::Size63),
            127 => Some(IirFilter::Size127),
            _ => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != IirFilter::Size0
    }
}

/// Heating profile for the gas sensor hot plate.
///
/// Only a single profile (slot 0) is used since the device runs in forced mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterProfile {
    /// Target hot plate temperature in °C. Capped at 400 °C when programmed.
    pub target_temp: u16,
    /// Time the plate is held at temperature before the gas conversion, in ms.
    pub duration_ms: u16,
}

impl HeaterProfile {
    /// A profile heats only when both temperature and duration are nonzero.
    pub fn is_enabled(&self) -> bool {
        self.target_temp != 0 && self.duration_ms != 0
    }
}

impl Default for HeaterProfile {
    fn default() -> Self {
        HeaterProfile {
            target_temp: 320,
            duration_ms: 150,
        }
    }
}

/// Complete configuration pushed to the BME680 at the start of each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub os_temp: Oversampling,
    pub os_hum: Oversampling,
    pub os_pres: Oversampling,
    pub filter: IirFilter,
    pub heater: HeaterProfile,
    /// Current ambient temperature estimate in °C.
    /// Needed for the heater resistance calculation.
    pub ambient_temp: i8,
}

impl Default for Settings {
    /// Power-on defaults: T 8x, H 2x, P 4x, filter 3, heater 320 °C for 150 ms.
    fn default() -> Self {
        Settings {
            os_temp: Oversampling::X8,
            os_hum: Oversampling::X2,
            os_pres: Oversampling::X4,
            filter: IirFilter::Size3,
            heater: HeaterProfile::default(),
            ambient_temp: 25,
        }
    }
}

/// Oversampled measurement channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Temperature,
    Humidity,
    Pressure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversampling_factors() {
        for (factor, expected) in [
            (0, Oversampling::Skipped),
            (1, Oversampling::X1),
            (2, Oversampling::X2),
            (4, Oversampling::X4),
            (8, Oversampling::X8),
            (16, Oversampling::X16),
        ] {
            let os = Oversampling::from_factor(factor).unwrap();
            assert_eq!(os, expected);
            assert_eq!(os.cycles(), factor as u32);
        }
        for bad in [3, 5, 6, 7, 9, 15, 17, 32, 255] {
            assert_eq!(Oversampling::from_factor(bad), None);
        }
    }

    #[test]
    fn filter_sizes() {
        let legal = [0u8, 1, 3, 7, 15, 31, 63, 127];
        for (code, size) in legal.iter().enumerate() {
            let filter = IirFilter::from_size(*size).unwrap();
            assert_eq!(filter as u8, code as u8);
            assert_eq!(filter.is_enabled(), *size != 0);
        }
        for size in 0..=255u8 {
            if !legal.contains(&size) {
                assert_eq!(IirFilter::from_size(size), None);
            }
        }
    }

    #[test]
    fn heater_needs_both_values() {
        assert!(!HeaterProfile { target_temp: 0, duration_ms: 100 }.is_enabled());
        assert!(!HeaterProfile { target_temp: 300, duration_ms: 0 }.is_enabled());
        assert!(!HeaterProfile { target_temp: 0, duration_ms: 0 }.is_enabled());
        assert!(HeaterProfile { target_temp: 300, duration_ms: 100 }.is_enabled());
    }
}
