use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use fitsync_transport_ble::protocol::matches_ack;
use tracing::{debug, info};

use crate::assembler::ChunkAssembler;
use crate::dispatch::Inbound;

/// Per-connection protocol state, fed by dispatched notifications.
///
/// `last` is `None` while a reply is awaited; any notification on either
/// channel makes it `Some`.
#[derive(Debug)]
pub struct SessionState {
    inbox: Receiver<Inbound>,
    last: Option<Vec<u8>>,
    expected_ack: Option<Vec<u8>>,
    reply_acknowledged: bool,
    assembler: ChunkAssembler,
}

impl SessionState {
    pub fn new(inbox: Receiver<Inbound>) -> Self {
        Self {
            inbox,
            last: None,
            expected_ack: None,
            reply_acknowledged: false,
            assembler: ChunkAssembler::default(),
        }
    }

    pub fn apply(&mut self, event: Inbound) {
        self.last = Some(event.payload().to_vec());
        match event {
            Inbound::ControlMarker => {}
            Inbound::ControlReply(payload) => {
                if let Some(expected) = &self.expected_ack {
                    if matches_ack(&payload, expected) {
                        info!("request acknowledged: {}", hex::encode(expected));
                        self.reply_acknowledged = true;
                    }
                }
            }
            Inbound::DataBurst(payload) => {
                self.assembler.push_burst(&payload);
                if self.assembler.is_collecting() {
                    debug!(
                        "burst {}: {} bytes",
                        self.assembler.burst_count(),
                        payload.len()
                    );
                }
            }
            Inbound::EndOfData => {
                info!("end of data marker received");
                self.assembler.end_of_data();
            }
        }
    }

    /// Applies every event already queued. Returns how many there were.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Starts waiting for a fresh reply. Earlier notifications are applied
    /// first so they cannot satisfy the new wait.
    pub fn arm(&mut self) {
        self.drain();
        self.last = None;
    }

    /// Applies events until `done` holds or `timeout` elapses. A timeout too
    /// large to express as a deadline waits without bound.
    pub fn wait_for(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            self.drain();
            if done(self) {
                return true;
            }
            let event = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match self.inbox.recv_timeout(deadline - now) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => return done(self),
                        Err(RecvTimeoutError::Disconnected) => return false,
                    }
                }
                None => match self.inbox.recv() {
                    Ok(event) => event,
                    Err(_) => return false,
                },
            };
            self.apply(event);
        }
    }

    pub fn wait_ready(&mut self, timeout: Duration) -> bool {
        self.wait_for(timeout, |s| s.last.is_some())
    }

    /// Clears everything tied to a single transfer.
    pub fn reset_transfer(&mut self) {
        self.drain();
        self.last = None;
        self.expected_ack = None;
        self.reply_acknowledged = false;
        self.assembler.reset();
    }

    pub fn expect_ack(&mut self, expected: Option<Vec<u8>>) {
        self.expected_ack = expected;
        self.reply_acknowledged = false;
    }

    pub fn reply_acknowledged(&self) -> bool {
        self.reply_acknowledged
    }

    pub fn last_notification(&self) -> Option<&[u8]> {
        self.last.as_deref()
    }

    pub fn assembler(&self) -> &ChunkAssembler {
        &self.assembler
    }

    pub fn assembler_mut(&mut self) -> &mut ChunkAssembler {
        &mut self.assembler
    }
}
