//! Duty-cycle controller: the INIT → MEASUREMENT → TRANSMIT → SLEEP
//! state machine that sequences the node's peripherals.
//!
//! The controller is the single logical thread of control. The
//! periodic wakeup timer and the downlink receive path only ever set
//! the shared [`WakeFlag`]; the shared mutable pieces a downlink may
//! touch (interval byte, timer, calibration store) live behind one
//! mutex in [`IntervalCell`], which also serializes access to the
//! I2C bus those peripherals share.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use loam_sensor::battery::LOW_BATTERY_THRESHOLD;
use loam_sensor::{
    Band, BatteryAdc, CalibrationStore, ImpedanceMeter, PowerMonitor, Reading, SensorConfig,
    StorageError, Tmp102,
};

use crate::error::NodeError;
use crate::link::{self, DownlinkHandler, RadioHooks};
use crate::wake::WakeFlag;

/// Measurement attempts per cycle before the cycle is abandoned.
pub const RETRY_COUNT_MAX: u8 = 3;

/// Controller phase. Transitions are strictly
/// INIT → MEASUREMENT → (TRANSMIT |) SLEEP → MEASUREMENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Init,
    Measurement,
    Transmit,
    Sleep,
}

/// Soil-moisture measurement seam. Implemented by
/// [`loam_sensor::ImpedanceMeter`]; tests substitute mocks.
pub trait SoilProbe {
    fn initialize(&mut self) -> Result<(), NodeError>;
    fn moisture(
        &mut self,
        gain: f64,
        cap_min: u16,
        cap_max: u16,
        temp_c: i32,
    ) -> Result<u8, NodeError>;
}

pub trait Thermometer {
    fn initialize(&mut self) -> Result<(), NodeError>;
    fn temperature_c(&mut self) -> Result<i32, NodeError>;
}

pub trait BatteryGauge {
    fn battery_percent(&mut self) -> f32;
}

/// Uplink seam over [`crate::link::TransmitLink`].
pub trait Uplink {
    fn send(&mut self, payload: &[u8]) -> Result<(), NodeError>;
}

/// Calibration persistence seam over [`loam_sensor::CalibrationStore`].
pub trait ConfigStorage {
    fn load(&mut self) -> Result<SensorConfig, StorageError>;
    fn save_interval(&mut self, units: u8) -> Result<(), StorageError>;
}

/// Periodic wakeup timer. `arm(units)` (re)starts the period at
/// `units ×` [`loam_sensor::INTERVAL_UNIT_MS`]; each expiry must
/// signal the controller's [`WakeFlag`] and rearm itself.
pub trait WakeTimer {
    fn arm(&mut self, units: u8);
}

/// Low-power peripheral state around the sleep phase (bus disable,
/// leakage pin configuration, and their restoration).
pub trait PowerControl {
    fn enter_low_power(&mut self);
    fn wake_up(&mut self);
}

/// Hard-reset capability for the remote reset command. The production
/// implementation does not return.
pub trait ResetControl: Send + Sync {
    fn system_reset(&self);
}

/// The downlink-touchable state: current interval, its persistence,
/// and the timer it rearms. One mutex for all three, shared between
/// the controller and the receive context, so bus use is serialized.
pub struct IntervalCell<S: ConfigStorage, T: WakeTimer> {
    inner: Mutex<IntervalInner<S, T>>,
}

struct IntervalInner<S: ConfigStorage, T: WakeTimer> {
    store: S,
    timer: T,
    units: u8,
}

impl<S: ConfigStorage, T: WakeTimer> IntervalCell<S, T> {
    pub fn new(store: S, timer: T) -> Self {
        Self {
            inner: Mutex::new(IntervalInner {
                store,
                timer,
                units: 0,
            }),
        }
    }

    /// Currently armed interval, units.
    pub fn units(&self) -> u8 {
        self.lock().units
    }

    fn lock(&self) -> MutexGuard<'_, IntervalInner<S, T>> {
        self.inner.lock().unwrap()
    }
}

/// Shared handle the radio stack's receive context gets: downlink
/// dispatch targets and the stack's query hooks. Everything it owns
/// is either atomic or behind the interval mutex.
pub struct NodeHandle<S: ConfigStorage, T: WakeTimer, R: ResetControl> {
    wake: Arc<WakeFlag>,
    interval: Arc<IntervalCell<S, T>>,
    battery: Arc<AtomicU8>,
    dev_eui: [u8; 8],
    reset: R,
}

impl<S: ConfigStorage, T: WakeTimer, R: ResetControl> NodeHandle<S, T, R> {
    pub fn new(
        wake: Arc<WakeFlag>,
        interval: Arc<IntervalCell<S, T>>,
        battery: Arc<AtomicU8>,
        dev_eui: [u8; 8],
        reset: R,
    ) -> Self {
        Self {
            wake,
            interval,
            battery,
            dev_eui,
            reset,
        }
    }
}

impl<S: ConfigStorage, T: WakeTimer, R: ResetControl> DownlinkHandler for NodeHandle<S, T, R> {
    /// Rearm the period and persist the byte. No state transition:
    /// the controller keeps sleeping until the (rearmed) timer fires.
    fn on_interval_update(&self, units: u8) {
        let mut cell = self.interval.lock();
        cell.timer.arm(units);
        cell.units = units;
        match cell.store.save_interval(units) {
            Ok(()) => log::info!("measurement interval persisted: {units} units"),
            Err(e) => log::warn!("interval not persisted ({e}), keeping stored value"),
        }
    }

    fn on_measurement_request(&self) {
        self.wake.signal();
    }

    fn on_reset_request(&self) {
        self.reset.system_reset();
    }
}

impl<S: ConfigStorage, T: WakeTimer, R: ResetControl> RadioHooks for NodeHandle<S, T, R>
where
    S: Send,
    T: Send,
{
    fn battery_level(&self) -> u8 {
        self.battery.load(Ordering::Relaxed)
    }

    fn unique_id(&self) -> [u8; 8] {
        self.dev_eui
    }

    fn random_seed(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or(0)
    }
}

pub struct DutyCycleController<P, Th, B, U, Pc, S, T>
where
    P: SoilProbe,
    Th: Thermometer,
    B: BatteryGauge,
    U: Uplink,
    Pc: PowerControl,
    S: ConfigStorage,
    T: WakeTimer,
{
    probe: P,
    thermometer: Th,
    battery: B,
    uplink: U,
    power: Pc,
    interval: Arc<IntervalCell<S, T>>,
    wake: Arc<WakeFlag>,
    battery_gauge: Arc<AtomicU8>,
    config: SensorConfig,
    band: Band,
    state: SystemState,
    retry_count: u8,
}

impl<P, Th, B, U, Pc, S, T> DutyCycleController<P, Th, B, U, Pc, S, T>
where
    P: SoilProbe,
    Th: Thermometer,
    B: BatteryGauge,
    U: Uplink,
    Pc: PowerControl,
    S: ConfigStorage,
    T: WakeTimer,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        probe: P,
        thermometer: Th,
        battery: B,
        uplink: U,
        power: Pc,
        interval: Arc<IntervalCell<S, T>>,
        wake: Arc<WakeFlag>,
        battery_gauge: Arc<AtomicU8>,
        band: Band,
    ) -> Self {
        Self {
            probe,
            thermometer,
            battery,
            uplink,
            power,
            interval,
            wake,
            battery_gauge,
            config: SensorConfig::default(),
            band,
            state: SystemState::Init,
            retry_count: 0,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// INIT phase: bring up the peripherals, load calibration (with
    /// in-memory defaults when storage is unavailable) and arm the
    /// periodic timer. Peripheral failure here is fatal by policy;
    /// a restart is the defined recovery.
    pub fn initialize(&mut self) -> Result<(), NodeError> {
        self.state = SystemState::Init;
        self.probe.initialize()?;
        self.thermometer.initialize()?;

        let mut cell = self.interval.lock();
        self.config = match cell.store.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("calibration load failed ({e}), running with defaults");
                SensorConfig::default()
            }
        };
        let units = self.config.sleep_interval_units;
        cell.units = units;
        cell.timer.arm(units);
        drop(cell);

        log::info!(
            "initialized, measuring every {} units on the {:?} band",
            self.config.sleep_interval_units,
            self.band
        );
        self.state = SystemState::Measurement;
        Ok(())
    }

    /// MEASUREMENT phase. Each attempt re-reads temperature and
    /// battery (moisture conversion depends on the temperature);
    /// moisture failure retries the whole phase up to
    /// [`RETRY_COUNT_MAX`] attempts.
    fn measure(&mut self) -> Result<Reading, NodeError> {
        self.retry_count = 0;
        loop {
            // The interval mutex doubles as the bus guard; a downlink
            // must not drive the storage peripheral while the
            // thermometer or the probe owns the bus.
            let _bus = self.interval.lock();
            let temperature_c = self.thermometer.temperature_c()?;
            let battery_percent = self.battery.battery_percent();
            self.battery_gauge
                .store(battery_percent.clamp(0.0, 100.0) as u8, Ordering::Relaxed);
            if battery_percent < LOW_BATTERY_THRESHOLD {
                log::warn!("battery low: {battery_percent:.0}%");
            }

            let (cap_min, cap_max) = self.config.cap_bounds(self.band);
            let gain = self.config.gain(self.band);
            match self.probe.moisture(gain, cap_min, cap_max, temperature_c) {
                Ok(moisture) => {
                    log::info!(
                        "reading: {moisture}% moisture, {temperature_c}°C, \
                         {battery_percent:.0}% battery"
                    );
                    return Ok(Reading {
                        moisture: Some(moisture),
                        temperature_c,
                        battery_percent,
                    });
                }
                Err(e) => {
                    self.retry_count += 1;
                    log::warn!(
                        "moisture measurement failed ({e}), attempt {}/{}",
                        self.retry_count,
                        RETRY_COUNT_MAX
                    );
                    if self.retry_count >= RETRY_COUNT_MAX {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// One duty cycle: measure, transmit on success, then sleep until
    /// the timer or a downlink-triggered wake releases the node.
    pub fn run_cycle(&mut self) {
        self.state = SystemState::Measurement;
        match self.measure() {
            Ok(reading) => {
                self.state = SystemState::Transmit;
                let payload = link::encode_uplink(&reading);
                if let Err(e) = self.uplink.send(&payload) {
                    // Logged, not retried: the next cycle re-measures
                    // and sends fresh data instead of stale data.
                    log::error!("uplink send failed: {e}");
                }
            }
            Err(e) => {
                log::error!("abandoning cycle, skipping transmit: {e}");
            }
        }

        self.state = SystemState::Sleep;
        self.power.enter_low_power();
        self.wake.wait();
        self.power.wake_up();
    }

    /// Run forever. Returns only on an initialization failure, which
    /// the platform layer answers with a hard restart.
    pub fn run(&mut self) -> NodeError {
        if let Err(e) = self.initialize() {
            log::error!("peripheral initialization failed: {e}");
            return e;
        }
        loop {
            self.run_cycle();
        }
    }
}

// The loam-sensor peripherals satisfy the controller seams directly.

impl<I2C: I2c, D: DelayNs> SoilProbe for ImpedanceMeter<I2C, D> {
    fn initialize(&mut self) -> Result<(), NodeError> {
        ImpedanceMeter::initialize(self).map_err(NodeError::from)
    }

    fn moisture(
        &mut self,
        gain: f64,
        cap_min: u16,
        cap_max: u16,
        temp_c: i32,
    ) -> Result<u8, NodeError> {
        ImpedanceMeter::moisture(self, gain, cap_min, cap_max, temp_c).map_err(NodeError::from)
    }
}

impl<I2C: I2c, D: DelayNs> Thermometer for Tmp102<I2C, D> {
    fn initialize(&mut self) -> Result<(), NodeError> {
        Tmp102::initialize(self).map_err(NodeError::from)
    }

    fn temperature_c(&mut self) -> Result<i32, NodeError> {
        Tmp102::temperature_c(self).map_err(NodeError::from)
    }
}

impl<A: BatteryAdc, D: DelayNs> BatteryGauge for PowerMonitor<A, D> {
    fn battery_percent(&mut self) -> f32 {
        PowerMonitor::battery_percent(self)
    }
}

impl<I2C: I2c, D: DelayNs> ConfigStorage for CalibrationStore<I2C, D> {
    fn load(&mut self) -> Result<SensorConfig, StorageError> {
        CalibrationStore::load(self)
    }

    fn save_interval(&mut self, units: u8) -> Result<(), StorageError> {
        CalibrationStore::save_interval(self, units)
    }
}

impl<R: crate::link::Radio> Uplink for crate::link::TransmitLink<R> {
    fn send(&mut self, payload: &[u8]) -> Result<(), NodeError> {
        self.send_data(payload).map_err(NodeError::from)
    }
}
