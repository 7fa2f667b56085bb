//! Wire vocabulary of the cycling computer's file service.
//!
//! Commands are fixed byte strings; inbound payloads are recognised by exact
//! value comparison. Nothing here carries a version or an error code, so every
//! decode helper answers "no match" rather than failing.

pub const CONTROL_CHAR_UUID: &str = "6e400004-b5a3-f393-e0a9-e50e24dcca9e";
pub const TX_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";
pub const RX_CHAR_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// Single-byte end marker. On the data path it ends a transfer, on the
/// control path it is a bare keepalive.
pub const END_MARKER: u8 = 0x04;

pub const FILE_REQUEST_TAG: u8 = 0x05;
pub const FILE_REQUEST_TRAILER: u8 = 0x50;
pub const FILE_ACK_TAG: u8 = 0x06;
pub const LISTING_REQUEST_TRAILER: u8 = 0x57;
pub const LISTING_NAME: &str = "filelist.txt";

/// First byte of a disk-space reply (`'\n'`).
pub const DISK_SPACE_PREFIX: u8 = 0x0A;

pub const READ_PERMISSION: [u8; 3] = [0xFF, 0x00, 0xFF];
pub const DISK_SPACE_QUERY: [u8; 3] = [0x09, 0x00, 0x09];
pub const COPY: u8 = 0x43;
pub const COPY_ACK: u8 = 0x06;
pub const COPY_ACK_ACK: u8 = 0x15;

/// Bytes dropped from the first burst after every resume.
pub const BURST_PREFIX_LEN: usize = 3;
/// Bytes dropped from the buffer tail each time a burst group is acknowledged.
pub const GROUP_TRAILER_LEN: usize = 2;
/// Burst count at which a group is ready to be acknowledged.
pub const BURSTS_PER_GROUP: usize = 6;

/// GATT characteristics used by the file service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Permission and file-open requests, and their replies.
    Control,
    /// Notify-only data channel.
    Tx,
    /// Write-only data/command channel.
    Rx,
}

impl Characteristic {
    pub const ALL: [Characteristic; 3] = [Self::Control, Self::Tx, Self::Rx];

    pub fn uuid_str(self) -> &'static str {
        match self {
            Self::Control => CONTROL_CHAR_UUID,
            Self::Tx => TX_CHAR_UUID,
            Self::Rx => RX_CHAR_UUID,
        }
    }

    pub fn from_uuid_str(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.uuid_str().eq_ignore_ascii_case(uuid))
    }
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Control => "control",
            Self::Tx => "tx",
            Self::Rx => "rx",
        };
        f.write_str(name)
    }
}

/// Outbound instruction, built per use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReadPermission,
    DiskSpaceQuery,
    ListRequest,
    FileRequest(String),
    Copy,
    CopyAck,
    CopyAckAck,
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ReadPermission => READ_PERMISSION.to_vec(),
            Self::DiskSpaceQuery => DISK_SPACE_QUERY.to_vec(),
            Self::ListRequest => named_request(LISTING_NAME, LISTING_REQUEST_TRAILER),
            Self::FileRequest(name) => named_request(name, FILE_REQUEST_TRAILER),
            Self::Copy => vec![COPY],
            Self::CopyAck => vec![COPY_ACK],
            Self::CopyAckAck => vec![COPY_ACK_ACK],
        }
    }

    /// Characteristic the command is written to.
    pub fn characteristic(&self) -> Characteristic {
        match self {
            Self::ReadPermission
            | Self::DiskSpaceQuery
            | Self::ListRequest
            | Self::FileRequest(_) => Characteristic::Control,
            Self::Copy | Self::CopyAck | Self::CopyAckAck => Characteristic::Rx,
        }
    }

    /// Control payload (minus its trailing byte) that accepts this request.
    /// Only file requests are checked.
    pub fn expected_ack(&self) -> Option<Vec<u8>> {
        match self {
            Self::FileRequest(name) => Some(file_ack(name)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadPermission => "read-permission",
            Self::DiskSpaceQuery => "disk-space",
            Self::ListRequest => "list-request",
            Self::FileRequest(_) => "file-request",
            Self::Copy => "copy",
            Self::CopyAck => "copy-ack",
            Self::CopyAckAck => "copy-ack-ack",
        }
    }
}

fn named_request(name: &str, trailer: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    out.push(FILE_REQUEST_TAG);
    out.extend_from_slice(name.as_bytes());
    out.push(trailer);
    out
}

/// `06` followed by the UTF-8 file name.
pub fn file_ack(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    out.push(FILE_ACK_TAG);
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn is_end_marker(payload: &[u8]) -> bool {
    payload == [END_MARKER]
}

/// Drops the trailing byte of a control reply.
pub fn control_reply_body(payload: &[u8]) -> &[u8] {
    &payload[..payload.len().saturating_sub(1)]
}

/// True when `payload` is `expected` plus exactly one trailing byte.
pub fn matches_ack(payload: &[u8], expected: &[u8]) -> bool {
    !payload.is_empty() && control_reply_body(payload) == expected
}

/// Free space text of a disk-space reply: everything between the prefix byte
/// and the last byte.
pub fn decode_free_space(reply: &[u8]) -> Option<String> {
    if reply.len() < 2 || reply[0] != DISK_SPACE_PREFIX {
        return None;
    }
    std::str::from_utf8(&reply[1..reply.len() - 1])
        .ok()
        .map(str::to_string)
}

/// Strips trailing zero padding from an assembled buffer.
pub fn trim_trailing_zeros(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}
