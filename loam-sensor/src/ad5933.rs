//! Register-level driver for the AD5933 impedance converter.
//!
//! The device exposes a frequency-sweep engine: program a start
//! frequency, an increment and an increment count, arm the sweep, then
//! read one complex (real, imaginary) sample per frequency step while
//! stepping with [`ControlMode::IncrementFrequency`]. Multi-byte
//! registers have no write auto-increment, so every register is
//! written with its own bus transfer; reads go through the address
//! pointer command.

use embedded_hal::i2c::I2c;

use crate::BusError;

/// Default 7-bit bus address of the AD5933.
pub const AD5933_ADDR: u8 = 0x0d;

/// Internal system clock, Hz. Frequency codes are derived from it.
const CLOCK_HZ: f64 = 16_776_000.0;

const REG_CONTROL_HIGH: u8 = 0x80;
const REG_CONTROL_LOW: u8 = 0x81;
const REG_FREQ_START: u8 = 0x82;
const REG_FREQ_INCR: u8 = 0x85;
const REG_NUM_INCR: u8 = 0x88;
const REG_STATUS: u8 = 0x8f;
const REG_REAL: u8 = 0x94;
const REG_IMAG: u8 = 0x96;

/// Address-pointer command byte, prefixed to every register read.
const CMD_ADDR_PTR: u8 = 0xb0;

const CTRL_RESET: u8 = 0x10;
const CTRL_CLOCK_EXTERNAL: u8 = 0x08;

/// Sweep-complete bit of the status register.
pub const STATUS_SWEEP_DONE: u8 = 0x04;
/// Valid-sample bit of the status register.
pub const STATUS_DATA_VALID: u8 = 0x02;

/// Function field of the high control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMode {
    InitStartFrequency = 0x10,
    StartSweep = 0x20,
    IncrementFrequency = 0x30,
    RepeatFrequency = 0x40,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    PowerDown = 0xa0,
    Standby = 0xb0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PgaGain {
    X1 = 0x01,
    X5 = 0x00,
}

pub struct Ad5933<I2C: I2c> {
    i2c: I2C,
    address: u8,
    // Mirrors of the control-register fields, so mode/gain/clock
    // updates never need a read-modify-write over the bus.
    gain_bits: u8,
    clock_bits: u8,
}

impl<I2C: I2c> Ad5933<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            gain_bits: PgaGain::X1 as u8,
            clock_bits: 0,
        }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(|_| BusError::I2cWriteError)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, BusError> {
        self.i2c
            .write(self.address, &[CMD_ADDR_PTR, reg])
            .map_err(|_| BusError::I2cWriteError)?;
        let mut buf = [0u8; 1];
        self.i2c
            .read(self.address, &mut buf)
            .map_err(|_| BusError::I2cReadError)?;
        Ok(buf[0])
    }

    /// Pulse the reset bit, preserving the clock selection.
    pub fn reset(&mut self) -> Result<(), BusError> {
        self.write_reg(REG_CONTROL_LOW, self.clock_bits | CTRL_RESET)
    }

    pub fn set_internal_clock(&mut self, internal: bool) -> Result<(), BusError> {
        self.clock_bits = if internal { 0 } else { CTRL_CLOCK_EXTERNAL };
        self.write_reg(REG_CONTROL_LOW, self.clock_bits)
    }

    /// 24-bit frequency code for `hz` against the device clock.
    fn frequency_code(hz: u32) -> u32 {
        let code = hz as f64 / (CLOCK_HZ / 4.0) * (1u32 << 27) as f64;
        (code as u32) & 0x00ff_ffff
    }

    fn write_frequency(&mut self, base_reg: u8, hz: u32) -> Result<(), BusError> {
        let code = Self::frequency_code(hz);
        self.write_reg(base_reg, (code >> 16) as u8)?;
        self.write_reg(base_reg + 1, (code >> 8) as u8)?;
        self.write_reg(base_reg + 2, code as u8)
    }

    pub fn set_start_frequency(&mut self, hz: u32) -> Result<(), BusError> {
        self.write_frequency(REG_FREQ_START, hz)
    }

    pub fn set_increment_frequency(&mut self, hz: u32) -> Result<(), BusError> {
        self.write_frequency(REG_FREQ_INCR, hz)
    }

    /// Number of frequency increments in the sweep (9-bit field).
    pub fn set_number_increments(&mut self, count: u16) -> Result<(), BusError> {
        let count = count & 0x01ff;
        self.write_reg(REG_NUM_INCR, (count >> 8) as u8)?;
        self.write_reg(REG_NUM_INCR + 1, count as u8)
    }

    pub fn set_pga_gain(&mut self, gain: PgaGain) -> Result<(), BusError> {
        self.gain_bits = gain as u8;
        self.write_reg(REG_CONTROL_HIGH, self.gain_bits)
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), BusError> {
        self.write_reg(REG_CONTROL_HIGH, mode as u8 | self.gain_bits)
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), BusError> {
        self.write_reg(REG_CONTROL_HIGH, mode as u8 | self.gain_bits)
    }

    pub fn read_status(&mut self) -> Result<u8, BusError> {
        self.read_reg(REG_STATUS)
    }

    /// One complex sample for the current frequency step.
    pub fn read_complex(&mut self) -> Result<(i16, i16), BusError> {
        let real = i16::from_be_bytes([self.read_reg(REG_REAL)?, self.read_reg(REG_REAL + 1)?]);
        let imag = i16::from_be_bytes([self.read_reg(REG_IMAG)?, self.read_reg(REG_IMAG + 1)?]);
        Ok((real, imag))
    }
}
