//! Transmit link: join-state tracking, uplink framing, and downlink
//! command dispatch over an injected radio collaborator.
//!
//! The radio protocol stack itself (join procedure, channel plan,
//! encryption) is out of scope; it is reached through the [`Radio`]
//! trait and calls back in through [`RadioHooks`], [`LinkEvent`] and
//! the downlink dispatch below. Credentials are provisioned at build
//! time through `cfg.toml`.

use loam_sensor::Reading;

use crate::error::LinkError;

/// Build-time radio identity. Override the placeholder values in a
/// `cfg.toml` next to the workspace manifest:
///
/// ```toml
/// [loam-node]
/// dev_eui = "AC1F09FFFE000001"
/// app_eui = "B827EBFFFE000001"
/// app_key = "000102030405060708090A0B0C0D0E0F"
/// ```
#[toml_cfg::toml_config]
pub struct RadioIdentity {
    #[default("0000000000000000")]
    dev_eui: &'static str,
    #[default("0000000000000000")]
    app_eui: &'static str,
    #[default("00000000000000000000000000000000")]
    app_key: &'static str,
}

/// Application port uplink frames are handed to.
pub const UPLINK_PORT: u8 = 2;
/// Owned uplink buffer size; payloads are copied in before handoff.
pub const APP_DATA_BUFF_SIZE: usize = 64;
/// Join attempts the radio stack is configured for.
pub const JOIN_TRIALS: u8 = 8;

/// Moisture byte placed in the uplink when the measurement failed.
pub const MOISTURE_FAILED: u8 = 0xff;

pub const CMD_SET_INTERVAL: u8 = 0x01;
pub const CMD_MEASURE_NOW: u8 = 0x02;
pub const CMD_RESET: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub dev_eui: [u8; 8],
    pub app_eui: [u8; 8],
    pub app_key: [u8; 16],
}

impl Credentials {
    /// Credentials from the build-time identity. Malformed hex falls
    /// back to zeros, which a real network will refuse at join time.
    pub fn from_build_config() -> Self {
        Self {
            dev_eui: parse_hex(RADIO_IDENTITY.dev_eui).unwrap_or_else(|| {
                log::warn!("malformed dev_eui in build config, using zeros");
                [0; 8]
            }),
            app_eui: parse_hex(RADIO_IDENTITY.app_eui).unwrap_or_else(|| {
                log::warn!("malformed app_eui in build config, using zeros");
                [0; 8]
            }),
            app_key: parse_hex(RADIO_IDENTITY.app_key).unwrap_or_else(|| {
                log::warn!("malformed app_key in build config, using zeros");
                [0; 16]
            }),
        }
    }
}

fn parse_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    if s.len() != N * 2 || !s.is_ascii() {
        return None;
    }
    let mut out = [0u8; N];
    for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out[i] = (hi as u8) << 4 | lo as u8;
    }
    Some(out)
}

/// Queries the radio stack issues while it runs; implemented by the
/// node and registered at link initialization.
pub trait RadioHooks: Send {
    /// Latest battery estimate, percent.
    fn battery_level(&self) -> u8;
    fn unique_id(&self) -> [u8; 8];
    fn random_seed(&self) -> u32;
}

/// Procedural notifications from the radio stack. Only logging and
/// join-state updates happen here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    JoinSuccess,
    JoinFailure,
    ClassSwitch(char),
}

/// The radio stack collaborator. One implementation binds a real
/// LoRaWAN stack; tests substitute a recorder.
pub trait Radio {
    fn configure(
        &mut self,
        credentials: &Credentials,
        join_trials: u8,
        hooks: Box<dyn RadioHooks>,
    ) -> Result<(), LinkError>;
    fn start_join(&mut self) -> Result<(), LinkError>;
    /// Single unconfirmed (fire-and-forget) send.
    fn send_unconfirmed(&mut self, port: u8, payload: &[u8]) -> Result<(), LinkError>;
}

pub struct TransmitLink<R: Radio> {
    radio: R,
    joined: bool,
    buffer: [u8; APP_DATA_BUFF_SIZE],
}

impl<R: Radio> TransmitLink<R> {
    /// Configure the radio stack with the node identity and hooks and
    /// start the join procedure.
    pub fn initialize(
        mut radio: R,
        credentials: &Credentials,
        hooks: Box<dyn RadioHooks>,
    ) -> Result<Self, LinkError> {
        radio.configure(credentials, JOIN_TRIALS, hooks)?;
        log::info!("starting join procedure");
        radio.start_join()?;
        Ok(Self {
            radio,
            joined: false,
            buffer: [0; APP_DATA_BUFF_SIZE],
        })
    }

    pub fn joined(&self) -> bool {
        self.joined
    }

    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::JoinSuccess => {
                log::info!("network join successful");
                self.joined = true;
            }
            LinkEvent::JoinFailure => {
                log::error!("network join failed");
                self.joined = false;
            }
            LinkEvent::ClassSwitch(class) => {
                log::info!("switched to device class {class}");
            }
        }
    }

    /// Send one uplink. Refused while not joined; no retry at this
    /// layer, the next cycle sends fresh data instead.
    pub fn send_data(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.joined {
            log::error!("not joined to network, refusing send");
            return Err(LinkError::NotJoined);
        }
        if payload.len() > self.buffer.len() {
            return Err(LinkError::PayloadTooLong);
        }
        self.buffer[..payload.len()].copy_from_slice(payload);
        self.radio
            .send_unconfirmed(UPLINK_PORT, &self.buffer[..payload.len()])
    }
}

/// Uplink frame: temperature (i8 Celsius), battery (u8 percent),
/// moisture (u8 percent, [`MOISTURE_FAILED`] when the measurement
/// failed). The order is the wire contract.
pub fn encode_uplink(reading: &Reading) -> [u8; 3] {
    [
        reading.temperature_c.clamp(i8::MIN as i32, i8::MAX as i32) as i8 as u8,
        reading.battery_percent.clamp(0.0, 100.0) as u8,
        reading.moisture.unwrap_or(MOISTURE_FAILED),
    ]
}

/// Handlers for the three downlink commands. These run on the radio
/// stack's receive context and must not block.
pub trait DownlinkHandler {
    fn on_interval_update(&self, units: u8);
    fn on_measurement_request(&self);
    /// Immediate, unconditional hard reset. Abrupt by design.
    fn on_reset_request(&self);
}

/// Dispatch one downlink frame on its command byte. Unknown commands
/// are logged and dropped.
pub fn dispatch_downlink(handler: &dyn DownlinkHandler, data: &[u8]) {
    let Some(&command) = data.first() else {
        return;
    };
    match command {
        CMD_SET_INTERVAL => {
            if let Some(&units) = data.get(1) {
                log::info!("downlink: set measurement interval to {units} units");
                handler.on_interval_update(units);
            }
        }
        CMD_MEASURE_NOW => {
            log::info!("downlink: immediate measurement requested");
            handler.on_measurement_request();
        }
        CMD_RESET => {
            log::warn!("downlink: system reset requested");
            handler.on_reset_request();
        }
        other => log::warn!("unknown downlink command: {other:#04x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingRadio {
        sent: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
        configured: bool,
        join_started: bool,
    }

    impl Radio for RecordingRadio {
        fn configure(
            &mut self,
            _credentials: &Credentials,
            join_trials: u8,
            _hooks: Box<dyn RadioHooks>,
        ) -> Result<(), LinkError> {
            assert_eq!(join_trials, JOIN_TRIALS);
            self.configured = true;
            Ok(())
        }

        fn start_join(&mut self) -> Result<(), LinkError> {
            self.join_started = true;
            Ok(())
        }

        fn send_unconfirmed(&mut self, port: u8, payload: &[u8]) -> Result<(), LinkError> {
            self.sent.lock().unwrap().push((port, payload.to_vec()));
            Ok(())
        }
    }

    struct NoHooks;

    impl RadioHooks for NoHooks {
        fn battery_level(&self) -> u8 {
            0
        }
        fn unique_id(&self) -> [u8; 8] {
            [0; 8]
        }
        fn random_seed(&self) -> u32 {
            0
        }
    }

    fn link() -> (TransmitLink<RecordingRadio>, Arc<Mutex<Vec<(u8, Vec<u8>)>>>) {
        let radio = RecordingRadio::default();
        let sent = Arc::clone(&radio.sent);
        let link = TransmitLink::initialize(
            radio,
            &Credentials::from_build_config(),
            Box::new(NoHooks),
        )
        .unwrap();
        (link, sent)
    }

    #[test]
    fn send_refused_until_joined() {
        let (mut link, sent) = link();
        assert_eq!(link.send_data(&[1, 2, 3]), Err(LinkError::NotJoined));
        assert!(sent.lock().unwrap().is_empty());

        link.handle_event(LinkEvent::JoinSuccess);
        link.send_data(&[1, 2, 3]).unwrap();
        assert_eq!(sent.lock().unwrap().as_slice(), &[(UPLINK_PORT, vec![1, 2, 3])]);
    }

    #[test]
    fn join_failure_drops_back_to_not_joined() {
        let (mut link, _sent) = link();
        link.handle_event(LinkEvent::JoinSuccess);
        assert!(link.joined());
        link.handle_event(LinkEvent::JoinFailure);
        assert!(!link.joined());
    }

    #[test]
    fn oversized_payload_is_refused() {
        let (mut link, sent) = link();
        link.handle_event(LinkEvent::JoinSuccess);
        let too_long = vec![0u8; APP_DATA_BUFF_SIZE + 1];
        assert_eq!(link.send_data(&too_long), Err(LinkError::PayloadTooLong));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn uplink_frame_is_temp_battery_moisture() {
        let reading = Reading {
            moisture: Some(57),
            temperature_c: -3,
            battery_percent: 84.6,
        };
        assert_eq!(encode_uplink(&reading), [(-3i8) as u8, 84, 57]);

        let failed = Reading {
            moisture: None,
            temperature_c: 20,
            battery_percent: 50.0,
        };
        assert_eq!(encode_uplink(&failed), [20, 50, MOISTURE_FAILED]);
    }

    #[derive(Default)]
    struct RecordingHandler {
        intervals: Rc<RefCell<Vec<u8>>>,
        measurements: Rc<RefCell<u32>>,
        resets: Rc<RefCell<u32>>,
    }

    impl DownlinkHandler for RecordingHandler {
        fn on_interval_update(&self, units: u8) {
            self.intervals.borrow_mut().push(units);
        }
        fn on_measurement_request(&self) {
            *self.measurements.borrow_mut() += 1;
        }
        fn on_reset_request(&self) {
            *self.resets.borrow_mut() += 1;
        }
    }

    fn counts(handler: &RecordingHandler) -> (Vec<u8>, u32, u32) {
        (
            handler.intervals.borrow().clone(),
            *handler.measurements.borrow(),
            *handler.resets.borrow(),
        )
    }

    #[test]
    fn interval_command_invokes_only_the_interval_handler() {
        let handler = RecordingHandler::default();
        dispatch_downlink(&handler, &[CMD_SET_INTERVAL, 30]);
        assert_eq!(counts(&handler), (vec![30], 0, 0));
    }

    #[test]
    fn interval_command_without_operand_is_dropped() {
        let handler = RecordingHandler::default();
        dispatch_downlink(&handler, &[CMD_SET_INTERVAL]);
        assert_eq!(counts(&handler), (vec![], 0, 0));
    }

    #[test]
    fn measure_command_invokes_only_the_measurement_handler() {
        let handler = RecordingHandler::default();
        dispatch_downlink(&handler, &[CMD_MEASURE_NOW]);
        assert_eq!(counts(&handler), (vec![], 1, 0));
    }

    #[test]
    fn reset_command_invokes_only_the_reset_handler() {
        let handler = RecordingHandler::default();
        dispatch_downlink(&handler, &[CMD_RESET]);
        assert_eq!(counts(&handler), (vec![], 0, 1));
    }

    #[test]
    fn unknown_and_empty_frames_are_ignored() {
        let handler = RecordingHandler::default();
        dispatch_downlink(&handler, &[0x05]);
        dispatch_downlink(&handler, &[]);
        assert_eq!(counts(&handler), (vec![], 0, 0));
    }

    #[test]
    fn hex_identity_parses_or_falls_back() {
        assert_eq!(
            parse_hex::<8>("AC1F09FFFE182257"),
            Some([0xac, 0x1f, 0x09, 0xff, 0xfe, 0x18, 0x22, 0x57])
        );
        assert_eq!(parse_hex::<8>("not hex at all!!"), None);
        assert_eq!(parse_hex::<8>("AB"), None);
        // Placeholder build config parses to all-zero credentials.
        assert_eq!(Credentials::from_build_config().dev_eui, [0; 8]);
    }
}
