//! Battery gauge: averaged ADC samples across the voltage divider,
//! mapped linearly onto a 0-100 percentage.

use embedded_hal::delay::DelayNs;

/// Millivolts treated as an empty battery.
pub const VMIN_MV: f32 = 3300.0;
/// Millivolts treated as a full battery.
pub const VMAX_MV: f32 = 4600.0;

const MV_PER_LSB: f32 = 0.73242188;
const DIVIDER_COMP: f32 = 1.73;
/// Divider-compensated millivolts per raw ADC code.
pub const REAL_MV_PER_LSB: f32 = DIVIDER_COMP * MV_PER_LSB;

const BATTERY_SAMPLES: u32 = 5;
const SAMPLE_DELAY_MS: u32 = 5;

/// Percentage below which the node reports a low battery.
pub const LOW_BATTERY_THRESHOLD: f32 = 20.0;

/// Raw ADC access for the battery divider. The implementation owns
/// reference/resolution configuration and any divider-enable pin.
pub trait BatteryAdc {
    fn read_raw(&mut self) -> u16;
}

pub struct PowerMonitor<A: BatteryAdc, D: DelayNs> {
    adc: A,
    delay: D,
}

impl<A: BatteryAdc, D: DelayNs> PowerMonitor<A, D> {
    pub fn new(adc: A, delay: D) -> Self {
        Self { adc, delay }
    }

    /// Remaining battery estimate, percent, clamped to `[0, 100]`.
    pub fn battery_percent(&mut self) -> f32 {
        let mut millivolts = 0.0;
        for _ in 0..BATTERY_SAMPLES {
            millivolts += self.adc.read_raw() as f32 * REAL_MV_PER_LSB;
            self.delay.delay_ms(SAMPLE_DELAY_MS);
        }
        millivolts /= BATTERY_SAMPLES as f32;
        percent_from_millivolts(millivolts)
    }

    pub fn is_low_battery(&mut self) -> bool {
        self.battery_percent() < LOW_BATTERY_THRESHOLD
    }
}

/// Linear `[VMIN_MV, VMAX_MV]` to `[0, 100]` mapping.
pub fn percent_from_millivolts(millivolts: f32) -> f32 {
    let percent = (millivolts - VMIN_MV) / (VMAX_MV - VMIN_MV) * 100.0;
    percent.clamp(0.0, 100.0)
}
