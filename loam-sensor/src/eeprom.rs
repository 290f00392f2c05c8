//! Calibration record access in the node's I2C EEPROM.
//!
//! The record lives at fixed byte offsets (24C-series device, 2-byte
//! addressing). Loads walk the fields sequentially; the only write the
//! node ever performs is the single sleep-interval byte, which is
//! verified by read-back so a failed write is reported rather than
//! silently trusted. The calibration fields themselves are provisioned
//! out-of-band and never rewritten here, so a power loss mid-write can
//! never corrupt them.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::{SensorConfig, StorageError};

/// Default 7-bit bus address of the EEPROM.
pub const EEPROM_ADDR: u8 = 0x50;

const GAIN_LOW_OFFSET: u16 = 0;
const GAIN_HIGH_OFFSET: u16 = 10;
const CAP_MAX_LOW_OFFSET: u16 = 20;
const CAP_MAX_HIGH_OFFSET: u16 = 30;
const CAP_MIN_LOW_OFFSET: u16 = 40;
const CAP_MIN_HIGH_OFFSET: u16 = 50;
const SNR_OFFSET: u16 = 60;
const SLEEP_INTERVAL_OFFSET: u16 = 70;

/// EEPROM internal write-cycle time, ms.
const WRITE_CYCLE_MS: u32 = 10;

pub struct CalibrationStore<I2C: I2c, D: DelayNs> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> CalibrationStore<I2C, D> {
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    /// Read the whole calibration record.
    ///
    /// Any bus failure maps to [`StorageError::Unavailable`]; callers
    /// degrade to [`SensorConfig::default`] rather than refusing to
    /// run.
    pub fn load(&mut self) -> Result<SensorConfig, StorageError> {
        let config = SensorConfig {
            gain_low: f64::from_le_bytes(self.read_array::<8>(GAIN_LOW_OFFSET)?),
            gain_high: f64::from_le_bytes(self.read_array::<8>(GAIN_HIGH_OFFSET)?),
            cap_max_low: u16::from_le_bytes(self.read_array::<2>(CAP_MAX_LOW_OFFSET)?),
            cap_max_high: u16::from_le_bytes(self.read_array::<2>(CAP_MAX_HIGH_OFFSET)?),
            cap_min_low: u16::from_le_bytes(self.read_array::<2>(CAP_MIN_LOW_OFFSET)?),
            cap_min_high: u16::from_le_bytes(self.read_array::<2>(CAP_MIN_HIGH_OFFSET)?),
            snr: u16::from_le_bytes(self.read_array::<2>(SNR_OFFSET)?),
            sleep_interval_units: self.read_array::<1>(SLEEP_INTERVAL_OFFSET)?[0],
        };
        log::debug!("loaded calibration: {config:?}");
        Ok(config)
    }

    /// Persist the sleep interval, write-verify discipline: the byte
    /// is written, then read back, and only a matching read-back
    /// counts as success. No other field is ever touched.
    pub fn save_interval(&mut self, units: u8) -> Result<(), StorageError> {
        let [hi, lo] = SLEEP_INTERVAL_OFFSET.to_be_bytes();
        self.i2c
            .write(self.address, &[hi, lo, units])
            .map_err(|_| StorageError::Unavailable)?;
        self.delay.delay_ms(WRITE_CYCLE_MS);

        let back = self.read_array::<1>(SLEEP_INTERVAL_OFFSET)?[0];
        if back != units {
            log::warn!("interval write-verify failed: wrote {units}, read back {back}");
            return Err(StorageError::VerificationMismatch);
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self, offset: u16) -> Result<[u8; N], StorageError> {
        let mut buf = [0u8; N];
        self.i2c
            .write_read(self.address, &offset.to_be_bytes(), &mut buf)
            .map_err(|_| StorageError::Unavailable)?;
        Ok(buf)
    }
}
