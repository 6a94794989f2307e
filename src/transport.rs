//! Register-level access to the BME680 over I2C.

use core::fmt;

use embedded_hal::i2c::{self, ErrorKind};
use log::{debug, warn};

/// Attempts made for every register read or write before giving up.
pub const MAX_ATTEMPTS: u8 = 3;

/// I2C device address.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Address {
    /// SDO pin is connected to GND.
    Primary = 0x76,
    /// SDO pin is connected to V<sub>DDIO</sub>. Default on most breakouts.
    Secondary = 0x77,
}

impl Address {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x76 => Some(Address::Primary),
            0x77 => Some(Address::Secondary),
            _ => None,
        }
    }
}

/// Why a bus transfer failed once all attempts were spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The device did not acknowledge its address or a data byte.
    Nack,
    /// The bus was held (clock stretching) past the controller timeout.
    ClockStretch,
    /// Fewer bytes than requested were transferred.
    ShortRead,
    /// Any other controller error.
    Unknown,
}

impl TransportError {
    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(_) => TransportError::Nack,
            ErrorKind::Bus => TransportError::ClockStretch,
            ErrorKind::Overrun => TransportError::ShortRead,
            _ => TransportError::Unknown,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Nack => f.write_str("NACK received"),
            TransportError::ClockStretch => f.write_str("clock stretch timeout"),
            TransportError::ShortRead => f.write_str("not all data was transferred"),
            TransportError::Unknown => f.write_str("unknown bus error"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Addressed register access to a single sensor.
pub trait Transport {
    /// Reads `buf.len()` consecutive registers starting at `reg`.
    fn read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Writes `data` to consecutive registers starting at `reg`.
    fn write(&mut self, reg: u8, data: &[u8]) -> Result<(), TransportError>;
}

/// Runs `op` until it succeeds or `attempts` tries have failed.
///
/// The error of the last attempt is returned. An `attempts` of zero still
/// runs `op` once.
pub fn retry<T, E: fmt::Debug>(attempts: u8, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                debug!("attempt {}/{} failed: {:?}, retrying", attempt, attempts, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`Transport`] over an `embedded-hal` I2C bus.
#[derive(Debug)]
pub struct I2cTransport<I2C> {
    bus: I2C,
    address: u8,
    attempts: u8,
}

impl<I2C> I2cTransport<I2C>
where
    I2C: i2c::I2c,
{
    pub fn new(bus: I2C, address: Address) -> Self {
        I2cTransport {
            bus,
            address: address as u8,
            attempts: MAX_ATTEMPTS,
        }
    }

    /// Frees the I2C bus.
    pub fn release(self) -> I2C {
        self.bus
    }
}

impl<I2C> Transport for I2cTransport<I2C>
where
    I2C: i2c::I2c,
{
    fn read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        debug!("reading {} bytes from register {:#04x}", buf.len(), reg);
        let address = self.address;
        let bus = &mut self.bus;
        retry(self.attempts, || {
            bus.write_read(address, &[reg], buf)
                .map_err(|e| TransportError::from_kind(i2c::Error::kind(&e)))
        })
        .map_err(|e| {
            warn!("read of register {:#04x} failed: {}", reg, e);
            e
        })
    }

    fn write(&mut self, reg: u8, data: &[u8]) -> Result<(), TransportError> {
        // The BME680 has no auto-increment on writes, every byte carries its
        // own register address.
        let mut frame = Vec::with_capacity(data.len() * 2);
        for (offset, byte) in data.iter().enumerate() {
            let target = reg.wrapping_add(offset as u8);
            debug!("writing {:#04x} to register {:#04x}", byte, target);
            frame.push(target);
            frame.push(*byte);
        }

        let address = self.address;
        let bus = &mut self.bus;
        retry(self.attempts, || {
            bus.write(address, &frame)
                .map_err(|e| TransportError::from_kind(i2c::Error::kind(&e)))
        })
        .map_err(|e| {
            warn!("write to register {:#04x} failed: {}", reg, e);
            e
        })
    }
}
