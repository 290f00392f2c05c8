use thiserror::Error;

use loam_sensor::{BusError, ImpedanceError, StorageError};

/// Transmit-link failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The join procedure has not completed; nothing was sent.
    #[error("not joined to the network")]
    NotJoined,
    /// The radio stack rejected the send request.
    #[error("radio send rejected")]
    SendError,
    #[error("payload exceeds the uplink buffer")]
    PayloadTooLong,
    #[error("radio stack initialization failed")]
    InitFailed,
}

/// Umbrella error for the duty-cycle controller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    #[error(transparent)]
    Impedance(#[from] ImpedanceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("temperature probe error: {0}")]
    Probe(#[from] BusError),
    #[error("peripheral initialization failed")]
    InitFailed,
}
