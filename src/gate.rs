//! Which channels take part in a measurement.

use crate::Select;

/// Per-channel enable flags.
///
/// Only the session setters change these. They decide both which settings are
/// pushed to the device and whether a channel reports a value or NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledChannels {
    pub temperature: bool,
    pub humidity: bool,
    pub pressure: bool,
    pub filter: bool,
    pub gas: bool,
}

impl Default for EnabledChannels {
    /// Matches the default [`Settings`](crate::settings::Settings): everything on.
    fn default() -> Self {
        EnabledChannels {
            temperature: true,
            humidity: true,
            pressure: true,
            filter: true,
            gas: true,
        }
    }
}

impl EnabledChannels {
    /// Builds the settings bitset for `apply_settings`.
    pub fn select(&self) -> Select {
        let mut select = Select::NONE;
        if self.temperature {
            select |= Select::OST;
        }
        if self.humidity {
            select |= Select::OSH;
        }
        if self.pressure {
            select |= Select::OSP;
        }
        if self.filter {
            select |= Select::FILTER;
        }
        if self.gas {
            select |= Select::GAS_SENSOR;
        } else {
            // Keeps ctrl_gas_1 in the write set so the heater is switched off.
            select |= Select::RUN_GAS;
        }
        select
    }

    /// `value` if `enabled`, NaN otherwise.
    pub fn gate(enabled: bool, value: f32) -> f32 {
        if enabled {
            value
        } else {
            f32::NAN
        }
    }
}
