use std::fmt;
use std::thread;
use std::time::Instant;

use fitsync_transport_ble::protocol::decode_free_space;
use fitsync_transport_ble::{Characteristic, Command, DeviceHandle, GattLink};
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::error::SyncError;
use crate::listing::extract_fit_filenames;
use crate::report::{SyncReport, TransferOutcome, TransferResult};
use crate::sink::FileSink;
use crate::state::SessionState;

/// Appended to the name of a transfer that was cut short, so a later run
/// does not mistake it for a finished download.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Characteristics whose notifications the session listens to.
pub const SUBSCRIBED: [Characteristic; 2] = [Characteristic::Control, Characteristic::Tx];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    DiskSpaceQueried,
    ListingFetched,
    FileSync(String),
    Disconnected,
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::DiskSpaceQueried => f.write_str("disk space queried"),
            Self::ListingFetched => f.write_str("listing fetched"),
            Self::FileSync(name) => write!(f, "syncing {name}"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// One connected peripheral and everything needed to drain it.
pub struct SyncSession<L: GattLink, S: FileSink> {
    pub(crate) link: L,
    pub(crate) sink: S,
    pub(crate) config: SessionConfig,
    pub(crate) state: SessionState,
    device: DeviceHandle,
    phase: SessionPhase,
    _dispatcher: Dispatcher,
}

impl<L: GattLink, S: FileSink> SyncSession<L, S> {
    /// Discovers `target`, connects and enables notifications.
    pub fn connect(
        mut link: L,
        sink: S,
        config: SessionConfig,
        target: &str,
    ) -> Result<Self, SyncError> {
        let device = link
            .discover(target)
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .ok_or_else(|| SyncError::DeviceNotFound(target.to_string()))?;
        info!("found target device {device}");

        link.connect(&device)
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        info!("connected to {device}");
        if !config.connect_settle.is_zero() {
            thread::sleep(config.connect_settle);
        }

        let (dispatcher, inbox) = Dispatcher::channel();
        for characteristic in SUBSCRIBED {
            if let Err(err) = link.subscribe(characteristic, dispatcher.handler()) {
                if let Err(e) = link.disconnect() {
                    warn!("disconnect failed: {e}");
                }
                return Err(SyncError::Transport(format!(
                    "subscribe {characteristic}: {err}"
                )));
            }
        }
        info!("notifications started");

        Ok(Self {
            link,
            sink,
            config,
            state: SessionState::new(inbox),
            device,
            phase: SessionPhase::Connected,
            _dispatcher: dispatcher,
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (L, S) {
        (self.link, self.sink)
    }

    fn enter(&mut self, phase: SessionPhase) {
        info!("session: {} -> {phase}", self.phase);
        self.phase = phase;
    }

    /// Runs the whole session: disk space, listing, every new file, then
    /// disconnect. Per-file failures never stop the loop.
    pub fn run(&mut self) -> SyncReport {
        let mut report = SyncReport {
            device: Some(self.device.clone()),
            ..SyncReport::default()
        };

        report.free_space = self.query_disk_space();
        self.enter(SessionPhase::DiskSpaceQueried);

        let listing = match self.fetch_listing() {
            Ok(listing) => listing,
            Err(err) => {
                error!("failed to fetch file listing: {err}");
                return self.finish(report, Some(err));
            }
        };
        let files = extract_fit_filenames(&listing);
        self.enter(SessionPhase::ListingFetched);
        if files.is_empty() {
            warn!("no activity files in listing");
            return self.finish(report, Some(SyncError::IncompleteListing));
        }
        info!("found {} activity files", files.len());
        report.listed = files.len();

        let mut attempted = 0usize;
        for (idx, name) in files.iter().enumerate() {
            if self.config.skip_existing && self.sink.exists(name) {
                info!("skipping {name}, already downloaded");
                report.results.push(TransferResult {
                    name: name.clone(),
                    outcome: TransferOutcome::Skipped,
                    elapsed: Default::default(),
                });
                continue;
            }
            if attempted > 0 && !self.config.file_settle.is_zero() {
                thread::sleep(self.config.file_settle);
            }
            attempted += 1;

            info!("transferring file {}/{}: {name}", idx + 1, files.len());
            self.enter(SessionPhase::FileSync(name.clone()));
            let result = self.sync_file(name);
            if result.is_success() {
                info!("{result}");
            } else {
                error!("{result}");
            }
            report.results.push(result);
        }

        info!(
            "transfer summary: {} successful, {} failed",
            report.succeeded(),
            report.failed()
        );
        self.finish(report, None)
    }

    fn finish(&mut self, mut report: SyncReport, err: Option<SyncError>) -> SyncReport {
        if let Err(e) = self.link.disconnect() {
            warn!("disconnect failed: {e}");
        }
        let failed = err.is_some();
        report.session_error = err;
        self.enter(if failed {
            SessionPhase::Failed
        } else {
            SessionPhase::Disconnected
        });
        report
    }

    /// Free space text reported by the peripheral, if it answered in the
    /// expected shape.
    pub fn query_disk_space(&mut self) -> Option<String> {
        if let Err(err) = self.exchange(&Command::DiskSpaceQuery) {
            warn!("disk space query failed: {err}");
            return None;
        }
        let free = self.state.last_notification().and_then(decode_free_space);
        match &free {
            Some(free) => info!("free disk space: {free}kb"),
            None => warn!("unexpected disk space reply"),
        }
        free
    }

    /// Downloads the raw directory listing and stores it through the sink.
    pub fn fetch_listing(&mut self) -> Result<Vec<u8>, SyncError> {
        self.state.reset_transfer();
        self.request_read_permission()?;
        self.exchange(&Command::ListRequest)?;
        self.copy_handshake()?;
        if let Some(reason) = self.collect() {
            warn!("listing transfer cut short: {reason}");
        }
        if let Err(err) = self.end_of_transfer() {
            warn!("listing end of transfer: {err}");
        }

        let listing = self.state.assembler().contents().to_vec();
        info!("listing received ({} bytes)", listing.len());
        if let Err(err) = self.sink.write(&self.config.listing_name, &listing) {
            warn!("failed to store {}: {err}", self.config.listing_name);
        }
        Ok(listing)
    }

    /// Runs the file-sync sub-protocol for one file.
    pub fn sync_file(&mut self, name: &str) -> TransferResult {
        let started = Instant::now();
        let outcome = match self.try_sync_file(name) {
            Ok((bytes, aborted)) => TransferOutcome::Synced { bytes, aborted },
            Err(err) => TransferOutcome::Failed(err),
        };
        TransferResult {
            name: name.to_string(),
            outcome,
            elapsed: started.elapsed(),
        }
    }

    fn try_sync_file(&mut self, name: &str) -> Result<(usize, Option<SyncError>), SyncError> {
        self.state.reset_transfer();
        let request = Command::FileRequest(name.to_string());
        self.state.expect_ack(request.expected_ack());

        self.request_read_permission()?;
        self.exchange(&request)?;
        if !self.state.reply_acknowledged() {
            return Err(SyncError::NotAcknowledged(name.to_string()));
        }

        self.copy_handshake()?;
        let aborted = self.collect();
        if let Err(err) = self.end_of_transfer() {
            warn!("{name}: end of transfer: {err}");
        }

        let data = self.state.assembler().contents();
        if data.is_empty() {
            return Err(SyncError::EmptyTransfer);
        }
        let stored = match &aborted {
            Some(reason) => {
                let partial = format!("{name}{PARTIAL_SUFFIX}");
                warn!("{name}: keeping {} bytes as {partial} ({reason})", data.len());
                partial
            }
            None => name.to_string(),
        };
        self.sink
            .write(&stored, data)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok((data.len(), aborted))
    }
}

/// Connects to `target` and runs a full session. Connection failures are
/// reported like any other session-level error.
pub fn sync_device<L: GattLink, S: FileSink>(
    link: L,
    sink: S,
    config: SessionConfig,
    target: &str,
) -> SyncReport {
    match SyncSession::connect(link, sink, config, target) {
        Ok(mut session) => session.run(),
        Err(err) => {
            error!("could not start session with {target}: {err}");
            SyncReport {
                session_error: Some(err),
                ..SyncReport::default()
            }
        }
    }
}
