//! TMP102 soil-temperature probe.
//!
//! The probe spends its life shut down and is woken only long enough
//! to take the one Celsius sample each measurement cycle needs. Every
//! call toggles the probe's power state, so callers sharing the bus
//! must serialize access around it.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::BusError;

/// Default 7-bit bus address (ADD0 tied to ground).
pub const TMP102_ADDR: u8 = 0x48;

const REG_TEMPERATURE: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

/// Shutdown bit in the config register's first byte.
const CONFIG_SHUTDOWN: u8 = 0x01;

/// Conversion settle time after wakeup, ms.
const SETTLE_MS: u32 = 50;

/// Empirical probe offset, degrees Celsius.
const TEMP_OFFSET: f32 = 0.5;

const CELSIUS_PER_LSB: f32 = 0.0625;

pub struct Tmp102<I2C: I2c, D: DelayNs> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> Tmp102<I2C, D> {
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    /// Probe the device and leave it shut down until the first read.
    pub fn initialize(&mut self) -> Result<(), BusError> {
        self.set_shutdown(true)
    }

    /// Wake the probe, take one sample, and shut it down again.
    pub fn temperature_c(&mut self) -> Result<i32, BusError> {
        self.set_shutdown(false)?;
        self.delay.delay_ms(SETTLE_MS);
        let raw = self.read_raw()?;
        let celsius = raw as f32 * CELSIUS_PER_LSB + TEMP_OFFSET;
        self.set_shutdown(true)?;
        Ok(celsius as i32)
    }

    /// 12-bit signed temperature code.
    fn read_raw(&mut self) -> Result<i16, BusError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[REG_TEMPERATURE], &mut buf)
            .map_err(|_| BusError::I2cReadError)?;
        Ok(i16::from_be_bytes(buf) >> 4)
    }

    fn set_shutdown(&mut self, shutdown: bool) -> Result<(), BusError> {
        let mut config = [0u8; 2];
        self.i2c
            .write_read(self.address, &[REG_CONFIG], &mut config)
            .map_err(|_| BusError::I2cReadError)?;
        if shutdown {
            config[0] |= CONFIG_SHUTDOWN;
        } else {
            config[0] &= !CONFIG_SHUTDOWN;
        }
        self.i2c
            .write(self.address, &[REG_CONFIG, config[0], config[1]])
            .map_err(|_| BusError::I2cWriteError)
    }
}
