//! Impedance sweep orchestration and moisture conversion.
//!
//! A measurement runs a fixed number of sweep passes against the
//! AD5933, smooths each pass's complex samples into one magnitude,
//! averages the passes that produced a positive magnitude, and fits
//! the mean through an empirically calibrated inverse-linear curve.
//! The fitted impedance is then converted to an effective capacitance,
//! temperature-compensated, and mapped into the calibration band as a
//! 0-100 moisture percentage.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::ad5933::{
    Ad5933, ControlMode, PgaGain, PowerMode, STATUS_DATA_VALID, STATUS_SWEEP_DONE,
};
use crate::ImpedanceError;

/// Sweep start frequency, Hz.
pub const START_FREQ: u32 = 99_930;
/// Frequency increment per sweep step, Hz.
pub const FREQ_INCR: u32 = 10;
/// Number of frequency increments per sweep.
pub const NUM_INCR: u16 = 12;

/// Independent sweep passes averaged into one magnitude estimate.
const NUM_SAMPLES: u8 = 5;

/// First-order temperature compensation, per degree Celsius.
const TEMP_COEFF: f64 = 0.02;
const REF_TEMP: f64 = 25.0;

/// Offset of the fitted inverse-linear calibration curve
/// `1/(magnitude * gain) - CURVE_OFFSET`.
const CURVE_OFFSET: f64 = 204.0;

/// Status polls allowed per sweep pass before the pass is abandoned.
/// Bounds the poll loop so a stalled status bit costs one pass, not
/// the whole controller.
pub const DEFAULT_POLL_BUDGET: u32 = 1_000;

const INTER_PASS_DELAY_MS: u32 = 10;

pub struct ImpedanceMeter<I2C: I2c, D: DelayNs> {
    dev: Ad5933<I2C>,
    delay: D,
    poll_budget: u32,
}

impl<I2C: I2c, D: DelayNs> ImpedanceMeter<I2C, D> {
    pub fn new(dev: Ad5933<I2C>, delay: D) -> Self {
        Self {
            dev,
            delay,
            poll_budget: DEFAULT_POLL_BUDGET,
        }
    }

    pub fn with_poll_budget(mut self, poll_budget: u32) -> Self {
        self.poll_budget = poll_budget;
        self
    }

    /// Program the sweep engine. The first failing sub-step aborts the
    /// remaining setup.
    pub fn initialize(&mut self) -> Result<(), ImpedanceError> {
        self.dev.reset()?;
        self.dev.set_internal_clock(true)?;
        self.dev.set_start_frequency(START_FREQ)?;
        self.dev.set_increment_frequency(FREQ_INCR)?;
        self.dev.set_number_increments(NUM_INCR)?;
        self.dev.set_pga_gain(PgaGain::X1)?;
        Ok(())
    }

    /// Run the sweep passes and fit the averaged magnitude through the
    /// calibration curve. Fails with [`ImpedanceError::SweepError`]
    /// when the sweep cannot be armed or no pass produces a positive
    /// magnitude.
    pub fn measure_impedance(&mut self, gain: f64) -> Result<f64, ImpedanceError> {
        let armed = self
            .dev
            .set_power_mode(PowerMode::Standby)
            .and_then(|_| self.dev.set_control_mode(ControlMode::InitStartFrequency))
            .and_then(|_| self.dev.set_control_mode(ControlMode::StartSweep));
        if armed.is_err() {
            return Err(ImpedanceError::SweepError);
        }

        let mut sum_magnitude = 0.0;
        let mut valid_samples = 0u8;
        for _ in 0..NUM_SAMPLES {
            if let Some(magnitude) = self.run_pass() {
                sum_magnitude += magnitude;
                valid_samples += 1;
            }
            self.delay.delay_ms(INTER_PASS_DELAY_MS);
        }

        // Best effort, the measurement already happened.
        self.dev.set_power_mode(PowerMode::PowerDown).ok();

        if valid_samples == 0 {
            return Err(ImpedanceError::SweepError);
        }
        let mean = sum_magnitude / valid_samples as f64;
        Ok(1.0 / (mean * gain) - CURVE_OFFSET)
    }

    /// One sweep pass: poll for samples until the sweep-complete bit,
    /// folding each magnitude into a running pairwise mean.
    ///
    /// The smoothing is deliberate and calibration-fitted: the first
    /// successfully read sample is discarded, the second seeds the
    /// running value, and every later sample is folded in as
    /// `(prev + new) / 2`, weighting recent steps more heavily than a
    /// true mean would.
    fn run_pass(&mut self) -> Option<f64> {
        let mut magnitude = 0.0f64;
        let mut sample_idx = 0u32;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if polls > self.poll_budget {
                log::warn!("sweep status poll budget exhausted, abandoning pass");
                return None;
            }

            let status = match self.dev.read_status() {
                Ok(s) => s,
                Err(_) => continue,
            };
            if status & STATUS_SWEEP_DONE == STATUS_SWEEP_DONE {
                break;
            }
            if status & STATUS_DATA_VALID != STATUS_DATA_VALID {
                continue;
            }

            // A failed sample read is retried on the same step.
            let Ok((real, imag)) = self.dev.read_complex() else {
                continue;
            };
            let (re, im) = (real as f64, imag as f64);
            let magnread = libm::sqrt(re * re + im * im);
            if sample_idx == 1 {
                magnitude = magnread;
            }
            if sample_idx >= 2 {
                magnitude = (magnitude + magnread) / 2.0;
            }
            sample_idx += 1;
            self.dev.set_control_mode(ControlMode::IncrementFrequency).ok();
        }

        (magnitude > 0.0).then_some(magnitude)
    }

    /// Measure and map into the `[cap_min, cap_max]` calibration band.
    ///
    /// The `abs` in the mapping masks sign inversions from sensor
    /// drift; treat the output as a best-effort estimate.
    pub fn moisture(
        &mut self,
        gain: f64,
        cap_min: u16,
        cap_max: u16,
        temp_c: i32,
    ) -> Result<u8, ImpedanceError> {
        if cap_max <= cap_min {
            log::error!("undefined calibration band ({cap_min}..{cap_max})");
            return Err(ImpedanceError::MeasurementError);
        }

        let impedance = self.measure_impedance(gain)?;
        log::debug!("fitted impedance: {impedance}");
        if impedance < 0.0 {
            return Err(ImpedanceError::MeasurementError);
        }

        let mid_freq = (START_FREQ + FREQ_INCR * NUM_INCR as u32 / 2) as f64;
        let cap = 1e12 / (2.0 * core::f64::consts::PI * mid_freq * impedance);
        let cap = temp_compensation(cap, temp_c as f64);
        log::debug!("compensated capacitance: {cap}");

        let percent =
            libm::fabs((cap - cap_min as f64) * 100.0 / (cap_max as f64 - cap_min as f64));
        Ok(percent.clamp(0.0, 100.0) as u8)
    }
}

/// Linear first-order correction toward the reference temperature.
fn temp_compensation(capacitance: f64, temp: f64) -> f64 {
    capacitance * (1.0 + TEMP_COEFF * (temp - REF_TEMP))
}
