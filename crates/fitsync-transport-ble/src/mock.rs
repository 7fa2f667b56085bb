use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use crate::protocol::{
    file_ack, Characteristic, BURSTS_PER_GROUP, BURST_PREFIX_LEN, COPY, COPY_ACK, COPY_ACK_ACK,
    DISK_SPACE_PREFIX, DISK_SPACE_QUERY, END_MARKER, FILE_REQUEST_TAG, FILE_REQUEST_TRAILER,
    GROUP_TRAILER_LEN, LISTING_NAME, LISTING_REQUEST_TRAILER, READ_PERMISSION,
};
use crate::{DeviceHandle, GattLink, NotifyHandler};

const NAK: u8 = 0x15;
const BLOCK_TRAILER: [u8; GROUP_TRAILER_LEN] = [0xA5, 0x5A];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Selected,
    Handshake,
    Primed,
    Streaming,
    Finished,
    Closing,
}

/// Scripted stand-in for the peripheral firmware.
///
/// Files are streamed in blocks of `3-byte header + payload + 2-byte trailer`,
/// each block spread over exactly six bursts. The last block is zero padded.
#[derive(Debug, Clone)]
pub struct PeripheralScript {
    files: BTreeMap<String, Vec<u8>>,
    listing: Option<Vec<u8>>,
    free_space: String,
    burst_len: usize,
    muted: bool,
    stall_after_blocks: Option<usize>,
    phase: Phase,
    selected: Vec<u8>,
    offset: usize,
    blocks_sent: usize,
}

impl Default for PeripheralScript {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            listing: None,
            free_space: "1024".to_string(),
            burst_len: 20,
            muted: false,
            stall_after_blocks: None,
            phase: Phase::Idle,
            selected: Vec::new(),
            offset: 0,
            blocks_sent: 0,
        }
    }
}

impl PeripheralScript {
    pub fn with_file(mut self, name: impl Into<String>, contents: Vec<u8>) -> Self {
        self.files.insert(name.into(), contents);
        self
    }

    /// Overrides the generated `filelist.txt`.
    pub fn with_listing(mut self, listing: impl Into<Vec<u8>>) -> Self {
        self.listing = Some(listing.into());
        self
    }

    pub fn with_free_space(mut self, free_space: impl Into<String>) -> Self {
        self.free_space = free_space.into();
        self
    }

    pub fn with_burst_len(mut self, burst_len: usize) -> Self {
        self.burst_len = burst_len.max(1);
        self
    }

    /// Stops answering acknowledgements once `blocks` blocks went out.
    pub fn stall_after_blocks(mut self, blocks: usize) -> Self {
        self.stall_after_blocks = Some(blocks);
        self
    }

    /// A muted peripheral swallows every write without notifying.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn block_payload_len(&self) -> usize {
        (self.burst_len * BURSTS_PER_GROUP).saturating_sub(BURST_PREFIX_LEN + GROUP_TRAILER_LEN)
    }

    fn listing_bytes(&self) -> Vec<u8> {
        if let Some(listing) = &self.listing {
            return listing.clone();
        }
        let mut out = String::from("ID,NAME,SIZE\n");
        for (idx, (name, contents)) in self.files.iter().enumerate() {
            out.push_str(&format!("{idx},{name},{}\n", contents.len()));
        }
        out.into_bytes()
    }

    /// Notifications the firmware emits in reply to one write.
    pub fn respond(
        &mut self,
        characteristic: Characteristic,
        bytes: &[u8],
    ) -> Vec<(Characteristic, Vec<u8>)> {
        if self.muted {
            return Vec::new();
        }
        match characteristic {
            Characteristic::Control => self.respond_control(bytes),
            Characteristic::Rx => self.respond_data(bytes),
            Characteristic::Tx => Vec::new(),
        }
    }

    fn respond_control(&mut self, bytes: &[u8]) -> Vec<(Characteristic, Vec<u8>)> {
        if bytes == READ_PERMISSION {
            return vec![(Characteristic::Control, vec![COPY_ACK, END_MARKER])];
        }
        if bytes == DISK_SPACE_QUERY {
            let mut reply = vec![DISK_SPACE_PREFIX];
            reply.extend_from_slice(self.free_space.as_bytes());
            reply.push(0x00);
            return vec![(Characteristic::Control, reply)];
        }
        let [FILE_REQUEST_TAG, name @ .., trailer] = bytes else {
            return Vec::new();
        };
        let Ok(name) = std::str::from_utf8(name) else {
            return vec![(Characteristic::Control, vec![NAK, END_MARKER])];
        };
        let contents = match *trailer {
            LISTING_REQUEST_TRAILER if name == LISTING_NAME => Some(self.listing_bytes()),
            FILE_REQUEST_TRAILER => self.files.get(name).cloned(),
            _ => None,
        };
        let Some(contents) = contents else {
            self.phase = Phase::Idle;
            return vec![(Characteristic::Control, vec![NAK, END_MARKER])];
        };
        self.selected = contents;
        self.offset = 0;
        self.blocks_sent = 0;
        self.phase = Phase::Selected;
        let mut ack = file_ack(name);
        ack.push(END_MARKER);
        vec![(Characteristic::Control, ack)]
    }

    fn respond_data(&mut self, bytes: &[u8]) -> Vec<(Characteristic, Vec<u8>)> {
        match (bytes, self.phase) {
            ([COPY], Phase::Selected) => {
                self.phase = Phase::Handshake;
                vec![(Characteristic::Tx, vec![COPY])]
            }
            ([COPY_ACK], Phase::Handshake) => {
                self.phase = Phase::Primed;
                Vec::new()
            }
            ([COPY], Phase::Primed) => {
                self.phase = Phase::Streaming;
                self.next_block_or_end()
            }
            ([COPY_ACK], Phase::Streaming) => {
                if self
                    .stall_after_blocks
                    .is_some_and(|limit| self.blocks_sent >= limit)
                {
                    return Vec::new();
                }
                self.next_block_or_end()
            }
            ([COPY_ACK_ACK], Phase::Streaming | Phase::Finished) => {
                self.phase = Phase::Closing;
                vec![(Characteristic::Tx, vec![COPY_ACK])]
            }
            ([COPY_ACK], Phase::Closing) => {
                self.phase = Phase::Idle;
                vec![(Characteristic::Tx, vec![COPY_ACK])]
            }
            _ => Vec::new(),
        }
    }

    fn next_block_or_end(&mut self) -> Vec<(Characteristic, Vec<u8>)> {
        if self.offset >= self.selected.len() {
            self.phase = Phase::Finished;
            return vec![(Characteristic::Tx, vec![END_MARKER])];
        }
        let payload_len = self.block_payload_len();
        let end = (self.offset + payload_len).min(self.selected.len());
        let seq = (self.blocks_sent as u8).wrapping_add(1);

        let mut block = Vec::with_capacity(self.burst_len * BURSTS_PER_GROUP);
        block.extend_from_slice(&[0x02, seq, !seq]);
        block.extend_from_slice(&self.selected[self.offset..end]);
        block.resize(BURST_PREFIX_LEN + payload_len, 0);
        block.extend_from_slice(&BLOCK_TRAILER);

        self.offset = end;
        self.blocks_sent += 1;
        block
            .chunks(self.burst_len)
            .map(|chunk| (Characteristic::Tx, chunk.to_vec()))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum MockLinkError {
    #[error("not connected")]
    NotConnected,
    #[error("unknown device {0}")]
    UnknownDevice(String),
    #[error("write rejected")]
    WriteRejected,
}

/// In-memory link that delivers the scripted peripheral's replies
/// synchronously from inside `write`.
pub struct MockGattLink {
    devices: Vec<DeviceHandle>,
    connected: Option<DeviceHandle>,
    handlers: HashMap<Characteristic, NotifyHandler>,
    peripheral: PeripheralScript,
    writes: Vec<(Characteristic, Vec<u8>)>,
    fail_writes: bool,
    write_settle: Duration,
}

impl MockGattLink {
    pub fn new(peripheral: PeripheralScript) -> Self {
        Self {
            devices: vec![DeviceHandle::with_name("00:11:22:33:44:55", "M1_74F7")],
            connected: None,
            handlers: HashMap::new(),
            peripheral,
            writes: Vec::new(),
            fail_writes: false,
            write_settle: Duration::ZERO,
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceHandle>) -> Self {
        self.devices = devices;
        self
    }

    pub fn set_fail_writes(&mut self, fail_writes: bool) {
        self.fail_writes = fail_writes;
    }

    pub fn peripheral_mut(&mut self) -> &mut PeripheralScript {
        &mut self.peripheral
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    pub fn writes(&self) -> &[(Characteristic, Vec<u8>)] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<(Characteristic, Vec<u8>)> {
        std::mem::take(&mut self.writes)
    }

    /// Pushes an unsolicited notification through the subscribed handler.
    pub fn inject(&self, characteristic: Characteristic, payload: &[u8]) {
        if let Some(handler) = self.handlers.get(&characteristic) {
            handler(characteristic, payload);
        }
    }
}

impl std::fmt::Debug for MockGattLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGattLink")
            .field("connected", &self.connected)
            .field("subscriptions", &self.handlers.len())
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl GattLink for MockGattLink {
    type Error = MockLinkError;

    fn discover(&mut self, target: &str) -> Result<Option<DeviceHandle>, Self::Error> {
        Ok(self.devices.iter().find(|d| d.matches(target)).cloned())
    }

    fn connect(&mut self, device: &DeviceHandle) -> Result<(), Self::Error> {
        if !self.devices.contains(device) {
            return Err(MockLinkError::UnknownDevice(device.addr.clone()));
        }
        self.connected = Some(device.clone());
        Ok(())
    }

    fn subscribe(
        &mut self,
        characteristic: Characteristic,
        handler: NotifyHandler,
    ) -> Result<(), Self::Error> {
        if self.connected.is_none() {
            return Err(MockLinkError::NotConnected);
        }
        self.handlers.insert(characteristic, handler);
        Ok(())
    }

    fn write(&mut self, characteristic: Characteristic, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.connected.is_none() {
            return Err(MockLinkError::NotConnected);
        }
        trace!("mock write {characteristic}: {}", hex::encode(bytes));
        self.writes.push((characteristic, bytes.to_vec()));
        if self.fail_writes {
            return Err(MockLinkError::WriteRejected);
        }
        for (source, payload) in self.peripheral.respond(characteristic, bytes) {
            self.inject(source, &payload);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected = None;
        self.handlers.clear();
        Ok(())
    }

    fn write_settle(&self) -> Duration {
        self.write_settle
    }
}
