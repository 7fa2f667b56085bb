use std::time::Duration;

use fitsync_transport_ble::protocol::LISTING_NAME;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on every wait for a reply notification.
    pub ready_timeout: Duration,
    /// Bound on one burst group arriving during a transfer.
    pub burst_timeout: Duration,
    /// Pause between two file transfers while the peripheral recovers.
    pub file_settle: Duration,
    /// Pause after connecting, before enabling notifications.
    pub connect_settle: Duration,
    /// Maximum acknowledgement cycles for a single transfer.
    pub max_cycles: usize,
    /// Consecutive cycles without buffer growth before a transfer is abandoned.
    pub stall_cycles: usize,
    /// Do not request files the sink already holds.
    pub skip_existing: bool,
    /// Name the raw listing is stored under.
    pub listing_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            burst_timeout: Duration::from_secs(10),
            file_settle: Duration::from_secs(2),
            connect_settle: Duration::from_secs(5),
            max_cycles: 2000,
            stall_cycles: 100,
            skip_existing: true,
            listing_name: LISTING_NAME.to_string(),
        }
    }
}
