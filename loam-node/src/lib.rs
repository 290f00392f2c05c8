//! Node firmware core for a loam soil-moisture sensor.
//!
//! Sequencing lives in [`controller::DutyCycleController`]: a fixed
//! INIT → MEASUREMENT → TRANSMIT → SLEEP loop over capability traits
//! so the whole cycle runs on the host under test. [`link`] owns the
//! uplink frame format, join bookkeeping and the downlink command
//! dispatch; [`wake`] is the one primitive that releases the sleeping
//! controller, shared by the periodic timer and the downlink path.
//!
//! The actual peripheral drivers live in the `loam-sensor` crate and
//! plug into the controller via its seam traits.

pub mod controller;
pub mod error;
pub mod link;
pub mod wake;

pub use controller::{
    BatteryGauge, ConfigStorage, DutyCycleController, IntervalCell, NodeHandle, PowerControl,
    ResetControl, SoilProbe, SystemState, Thermometer, Uplink, WakeTimer, RETRY_COUNT_MAX,
};
pub use error::{LinkError, NodeError};
pub use link::{
    dispatch_downlink, encode_uplink, Credentials, DownlinkHandler, LinkEvent, Radio, RadioHooks,
    TransmitLink,
};
pub use wake::WakeFlag;
