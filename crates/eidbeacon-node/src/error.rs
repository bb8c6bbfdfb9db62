//! Node error types.

use eidbeacon_core::BeaconError;
use eidbeacon_proto::ProtocolError;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that stop the node or reject its configuration.
///
/// Peer errors never surface here; they are answered on the configuration
/// link and the node keeps running.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Invalid command-line or library configuration
    ///
    /// Fatal at startup. Fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage could not be read at boot
    ///
    /// Booting on top of unreadable storage would replace the lock key with
    /// the factory default, so the node refuses to start.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A configured value failed to encode
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Beacon state machine rejected an operation
    #[error("beacon error: {0}")]
    Beacon(#[from] BeaconError),

    /// Runtime I/O failure (signal handling)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
