use fitsync_transport_ble::protocol::{
    trim_trailing_zeros, BURSTS_PER_GROUP, BURST_PREFIX_LEN, GROUP_TRAILER_LEN,
};

/// Accumulates data-channel bursts into the transfer buffer.
///
/// Framing is positional: the first burst after each resume carries a
/// three-byte header, and every acknowledged group leaves two trailing bytes
/// behind.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    collecting: bool,
    strip_next_prefix: bool,
    burst_count: usize,
    bursts_since_ack: usize,
    buffer: Vec<u8>,
}

impl ChunkAssembler {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Opens a collection window; the next burst is a resume.
    pub fn begin(&mut self) {
        self.collecting = true;
        self.strip_next_prefix = true;
    }

    pub fn push_burst(&mut self, payload: &[u8]) {
        let mut payload = payload;
        if self.strip_next_prefix {
            payload = payload.get(BURST_PREFIX_LEN..).unwrap_or_default();
            self.strip_next_prefix = false;
        }
        if self.collecting {
            self.buffer.extend_from_slice(payload);
            self.burst_count += 1;
            self.bursts_since_ack += 1;
        }
    }

    pub fn end_of_data(&mut self) {
        self.collecting = false;
        self.burst_count = BURSTS_PER_GROUP;
    }

    /// Closes the window without an end marker.
    pub fn stop(&mut self) {
        self.collecting = false;
    }

    /// Trims the trailer of a complete group that will never be acknowledged.
    pub fn discard_pending_trailer(&mut self) {
        if self.bursts_since_ack >= BURSTS_PER_GROUP {
            let keep = self.buffer.len().saturating_sub(GROUP_TRAILER_LEN);
            self.buffer.truncate(keep);
            self.bursts_since_ack = 0;
        }
    }

    pub fn ready_to_ack(&self) -> bool {
        self.burst_count >= BURSTS_PER_GROUP
    }

    /// Closes the current burst group. Returns false when the group was
    /// opened by the end marker alone and nothing must be acknowledged.
    pub fn acknowledge_group(&mut self) -> bool {
        self.burst_count = 0;
        if !self.collecting && self.bursts_since_ack == 0 {
            return false;
        }
        self.bursts_since_ack = 0;
        let keep = self.buffer.len().saturating_sub(GROUP_TRAILER_LEN);
        self.buffer.truncate(keep);
        self.strip_next_prefix = true;
        true
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    pub fn strips_next_prefix(&self) -> bool {
        self.strip_next_prefix
    }

    pub fn burst_count(&self) -> usize {
        self.burst_count
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Buffer contents without trailing zero padding.
    pub fn contents(&self) -> &[u8] {
        trim_trailing_zeros(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_outside_window_are_dropped() {
        let mut asm = ChunkAssembler::default();
        asm.push_burst(&[1, 2, 3, 4]);
        assert!(asm.is_empty());
        assert_eq!(asm.burst_count(), 0);
    }

    #[test]
    fn first_burst_after_resume_loses_header() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.push_burst(&[0xAA, 0xBB, 0xCC, 1, 2]);
        asm.push_burst(&[3, 4]);
        assert_eq!(asm.buffer(), &[1, 2, 3, 4]);
    }

    #[test]
    fn short_resume_burst_strips_to_nothing() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.push_burst(&[0xAA]);
        assert!(asm.is_empty());
        assert_eq!(asm.burst_count(), 1);
        assert!(!asm.strips_next_prefix());
    }

    #[test]
    fn end_of_data_closes_window_and_signals_ready() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.end_of_data();
        assert!(!asm.is_collecting());
        assert!(asm.ready_to_ack());
    }

    #[test]
    fn seven_bursts_then_one_group_ack() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.strip_next_prefix = false;
        for _ in 0..7 {
            asm.push_burst(&[0x11; 20]);
        }
        assert_eq!(asm.len(), 140);
        assert!(asm.ready_to_ack());
        assert!(asm.acknowledge_group());
        assert_eq!(asm.len(), 138);
        assert_eq!(asm.burst_count(), 0);
    }

    #[test]
    fn group_ack_strips_exactly_one_following_burst() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.push_burst(&[0, 0, 0, 1, 1]);
        asm.acknowledge_group();
        asm.push_burst(&[9, 9, 9, 2, 2]);
        asm.push_burst(&[3, 3, 3]);
        assert_eq!(asm.buffer(), &[2, 2, 3, 3, 3]);
    }

    #[test]
    fn group_opened_by_end_marker_alone_is_not_acknowledged() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.push_burst(&[0, 0, 0, 5, 6, 7]);
        assert!(asm.acknowledge_group());
        asm.end_of_data();
        assert!(!asm.acknowledge_group());
        assert_eq!(asm.buffer(), &[5]);
    }

    #[test]
    fn pending_trailer_is_dropped_only_for_a_full_group() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        for _ in 0..5 {
            asm.push_burst(&[0x11; 20]);
        }
        asm.discard_pending_trailer();
        assert_eq!(asm.len(), 97);

        asm.push_burst(&[0x11; 20]);
        asm.discard_pending_trailer();
        assert_eq!(asm.len(), 115);
        asm.discard_pending_trailer();
        assert_eq!(asm.len(), 115);
    }

    #[test]
    fn contents_drop_zero_padding() {
        let mut asm = ChunkAssembler::default();
        asm.begin();
        asm.push_burst(&[0, 0, 0, 4, 0, 5, 0, 0]);
        assert_eq!(asm.contents(), &[4, 0, 5]);
    }
}
