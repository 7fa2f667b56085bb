//! Fixed command/acknowledgement exchanges shared by listing and file
//! transfers.

use std::thread;

use fitsync_transport_ble::{Command, GattLink};
use tracing::{debug, error, warn};

use crate::error::SyncError;
use crate::session::SyncSession;
use crate::sink::FileSink;

impl<L: GattLink, S: FileSink> SyncSession<L, S> {
    /// Writes one command, then waits out the link's settle time. A failed
    /// write is only logged; the wait that follows will time out.
    pub(crate) fn send(&mut self, command: &Command) {
        let bytes = command.encode();
        debug!("write {} {}: {}", command.characteristic(), command.name(), hex::encode(&bytes));
        if let Err(err) = self.link.write(command.characteristic(), &bytes) {
            error!("failed to write {}: {err}", command.name());
        }
        let settle = self.link.write_settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }

    /// Arms a wait, sends, and waits for any reply.
    pub(crate) fn exchange(&mut self, command: &Command) -> Result<(), SyncError> {
        self.state.arm();
        self.send(command);
        self.await_ready(command.name())
    }

    pub(crate) fn await_ready(&mut self, step: &'static str) -> Result<(), SyncError> {
        let timeout = self.config.ready_timeout;
        if self.state.wait_ready(timeout) {
            return Ok(());
        }
        error!("timeout waiting for {step} reply after {timeout:?}");
        Err(SyncError::Timeout {
            step,
            after: timeout,
        })
    }

    pub(crate) fn request_read_permission(&mut self) -> Result<(), SyncError> {
        self.exchange(&Command::ReadPermission)
    }

    pub(crate) fn copy_handshake(&mut self) -> Result<(), SyncError> {
        self.exchange(&Command::Copy)?;
        self.send(&Command::CopyAck);
        Ok(())
    }

    /// Waits for a full burst group, trims its trailer and acknowledges it.
    pub(crate) fn copy_burst_cycle(&mut self) -> Result<(), SyncError> {
        let timeout = self.config.burst_timeout;
        if !self
            .state
            .wait_for(timeout, |s| s.assembler().ready_to_ack())
        {
            return Err(SyncError::Timeout {
                step: "copy-burst-cycle",
                after: timeout,
            });
        }
        if self.state.assembler_mut().acknowledge_group() {
            self.send(&Command::CopyAck);
        }
        Ok(())
    }

    /// Opens a collection window and runs burst cycles until the end marker
    /// or a cap. Returns why the loop was cut short, if it was; the window is
    /// closed either way.
    pub(crate) fn collect(&mut self) -> Option<SyncError> {
        self.state.assembler_mut().begin();
        self.send(&Command::Copy);

        let reason = self.run_burst_cycles();
        if reason.is_some() {
            let assembler = self.state.assembler_mut();
            assembler.discard_pending_trailer();
            assembler.stop();
        }
        reason
    }

    fn run_burst_cycles(&mut self) -> Option<SyncError> {
        let mut cycles = 0usize;
        let mut idle = 0usize;
        let mut last_len = self.state.assembler().len();
        loop {
            self.state.drain();
            if !self.state.assembler().is_collecting() {
                return None;
            }
            if cycles >= self.config.max_cycles {
                warn!("giving up after {cycles} cycles");
                return Some(SyncError::CycleLimit { cycles });
            }
            if let Err(err) = self.copy_burst_cycle() {
                warn!("burst cycle aborted: {err}");
                return Some(err);
            }
            cycles += 1;

            let len = self.state.assembler().len();
            if len > last_len {
                idle = 0;
            } else {
                idle += 1;
                if idle >= self.config.stall_cycles {
                    warn!("no data for {idle} cycles");
                    return Some(SyncError::Stall { cycles: idle });
                }
            }
            last_len = len;
        }
    }

    /// Double round trip that closes every transfer.
    pub(crate) fn end_of_transfer(&mut self) -> Result<(), SyncError> {
        self.exchange(&Command::CopyAckAck)?;
        self.exchange(&Command::CopyAck)
    }
}
