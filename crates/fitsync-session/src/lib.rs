//! Protocol engine for syncing activity files off a cycling computer.
//!
//! The session drives a fixed command/acknowledgement protocol over a
//! `GattLink`. Notifications are classified by the `Dispatcher` on the link's
//! own thread and applied to `SessionState` by the session, so the two sides
//! never share mutable state.

pub mod assembler;
pub mod config;
pub mod dispatch;
pub mod error;
mod handshake;
pub mod listing;
pub mod report;
pub mod session;
pub mod sink;
pub mod state;

pub use assembler::ChunkAssembler;
pub use config::SessionConfig;
pub use dispatch::{Dispatcher, Inbound};
pub use error::SyncError;
pub use listing::extract_fit_filenames;
pub use report::{SyncReport, TransferOutcome, TransferResult};
pub use session::{sync_device, SessionPhase, SyncSession, PARTIAL_SUFFIX};
pub use sink::{DirSink, FileSink, MemorySink};
pub use state::SessionState;
