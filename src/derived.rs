//! Quantities derived from a reading.

/// Barometric altitude in metres.
///
/// Both pressures are in Pa. Passing the sea-level pressure in hPa gives
/// meaningless results.
pub fn altitude(pressure_pa: f32, sea_level_pa: f32) -> f32 {
    44330.0 * (1.0 - (pressure_pa / sea_level_pa).powf(0.190284))
}

/// Dew point in °C (Magnus formula, August-Roche-Magnus coefficients).
///
/// `humidity` is in %RH and must be positive, otherwise the result is NaN or
/// negative infinity.
pub fn dew_point(temp_c: f32, humidity: f32) -> f32 {
    let h = (humidity / 100.0).ln() + (17.625 * temp_c) / (243.12 + temp_c);
    243.04 * h / (17.625 - h)
}
