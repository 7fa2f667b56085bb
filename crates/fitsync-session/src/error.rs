use std::time::Duration;

use thiserror::Error;

/// Why a session step or a single file transfer did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Discovery, connect or subscribe failed at the transport.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    /// No notification arrived within the wait bound.
    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },
    #[error("request for {0} was not acknowledged")]
    NotAcknowledged(String),
    #[error("transfer stalled for {cycles} cycles")]
    Stall { cycles: usize },
    #[error("transfer exceeded {cycles} acknowledgement cycles")]
    CycleLimit { cycles: usize },
    #[error("listing contained no activity files")]
    IncompleteListing,
    #[error("no data received")]
    EmptyTransfer,
    #[error("failed to store file: {0}")]
    Storage(String),
}
