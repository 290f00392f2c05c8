//! Sensor lib for the wired peripherals of a loam soil-moisture node.
//!
//! A node measures soil moisture by sweeping an AD5933 impedance
//! converter through a fixed frequency program, converting the
//! averaged magnitude to an effective capacitance, and mapping that
//! capacitance into a calibrated band after temperature compensation.
//! The calibration record lives in a small I2C EEPROM and a TMP102
//! supplies the soil temperature used for compensation.
//!
//! Everything here is generic over [`embedded_hal::i2c::I2c`] and
//! [`embedded_hal::delay::DelayNs`], so the same code runs on the
//! node's microcontroller and on the host under test. The duty-cycle
//! logic that sequences these peripherals lives in the `loam-node`
//! crate in this workspace.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod ad5933;
pub mod battery;
mod eeprom;
mod impedance;
mod tmp102;

pub use ad5933::{Ad5933, ControlMode, PgaGain, PowerMode, AD5933_ADDR};
pub use battery::{BatteryAdc, PowerMonitor};
pub use eeprom::{CalibrationStore, EEPROM_ADDR};
pub use impedance::ImpedanceMeter;
pub use tmp102::{Tmp102, TMP102_ADDR};

use serde::{Deserialize, Serialize};

/// I2C transfer failure, as surfaced by any of the wired peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum BusError {
    #[cfg_attr(feature = "std", error("i2c read error"))]
    I2cReadError,
    #[cfg_attr(feature = "std", error("i2c write error"))]
    I2cWriteError,
}

/// Failures of the impedance measurement path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ImpedanceError {
    #[cfg_attr(feature = "std", error("impedance converter bus error: {0}"))]
    Bus(BusError),
    /// The sweep produced no valid samples, or could not be armed.
    #[cfg_attr(feature = "std", error("impedance sweep produced no valid samples"))]
    SweepError,
    /// The measured value cannot be mapped to a moisture percentage
    /// (negative fitted impedance, or an undefined calibration band).
    #[cfg_attr(feature = "std", error("impedance measurement out of range"))]
    MeasurementError,
}

impl From<BusError> for ImpedanceError {
    fn from(e: BusError) -> Self {
        ImpedanceError::Bus(e)
    }
}

/// Failures of the non-volatile calibration store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum StorageError {
    /// Device absent or unresponsive. Callers fall back to
    /// [`SensorConfig::default`] and keep running with degraded
    /// accuracy.
    #[cfg_attr(feature = "std", error("calibration storage unavailable"))]
    Unavailable,
    /// A write was issued but the read-back did not match.
    #[cfg_attr(feature = "std", error("calibration write-verify mismatch"))]
    VerificationMismatch,
}

/// Sweep frequency band a measurement runs against. The calibration
/// record carries one gain and one capacitance band per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    Low,
    High,
}

/// Calibration record, loaded once at boot from the EEPROM.
///
/// Only `sleep_interval_units` is ever written back; the calibration
/// fields are provisioned out-of-band during node calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub gain_low: f64,
    pub gain_high: f64,
    pub cap_min_low: u16,
    pub cap_max_low: u16,
    pub cap_min_high: u16,
    pub cap_max_high: u16,
    /// Placeholder field kept so the storage image round-trips.
    /// Nothing consults it.
    pub snr: u16,
    /// Duty-cycle period, in units of [`crate::INTERVAL_UNIT_MS`].
    pub sleep_interval_units: u8,
}

impl SensorConfig {
    pub fn gain(&self, band: Band) -> f64 {
        match band {
            Band::Low => self.gain_low,
            Band::High => self.gain_high,
        }
    }

    /// `(cap_min, cap_max)` bounds defining the 0 % / 100 % moisture
    /// endpoints for `band`.
    pub fn cap_bounds(&self, band: Band) -> (u16, u16) {
        match band {
            Band::Low => (self.cap_min_low, self.cap_max_low),
            Band::High => (self.cap_min_high, self.cap_max_high),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gain_low: 1.0,
            gain_high: 1.0,
            cap_min_low: 0,
            cap_max_low: 1000,
            cap_min_high: 0,
            cap_max_high: 1000,
            snr: 0,
            sleep_interval_units: 10,
        }
    }
}

/// Milliseconds per sleep-interval unit.
pub const INTERVAL_UNIT_MS: u32 = 30_000;

/// One cycle's sensor readings. Produced once per duty cycle,
/// consumed by the transmit link, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Moisture percentage, `None` when the measurement failed.
    pub moisture: Option<u8>,
    pub temperature_c: i32,
    pub battery_percent: f32,
}
