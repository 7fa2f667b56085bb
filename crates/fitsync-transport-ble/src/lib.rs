//! Bluetooth LE transport for the cycling computer file service.
//!
//! The session engine only talks to a peripheral through `GattLink`, a small
//! blocking capability (discover, connect, subscribe, write, disconnect).
//! `MockGattLink` scripts the peripheral firmware for tests; enable the
//! `btleplug` feature for the hardware backend.

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;
pub mod mock;
pub mod protocol;

pub use mock::{MockGattLink, MockLinkError, PeripheralScript};
pub use protocol::{Characteristic, Command};

/// Settle time the peripheral needs after every write.
pub const DEFAULT_WRITE_SETTLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub addr: String,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: None,
        }
    }

    pub fn with_name(addr: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: Some(name.into()),
        }
    }

    /// True if `target` is this device's advertised name or its address.
    pub fn matches(&self, target: &str) -> bool {
        self.name.as_deref() == Some(target) || self.addr.eq_ignore_ascii_case(target)
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// Callback invoked for every notification. Links may call it from any
/// thread, concurrently for different characteristics; it must not block.
pub type NotifyHandler = Arc<dyn Fn(Characteristic, &[u8]) + Send + Sync>;

/// Blocking GATT capability consumed by the session engine.
///
/// Connection-level retries belong to the implementation, never to callers.
pub trait GattLink {
    type Error: std::fmt::Display;

    /// Looks up a peripheral by advertised name or address.
    fn discover(&mut self, target: &str) -> Result<Option<DeviceHandle>, Self::Error>;
    fn connect(&mut self, device: &DeviceHandle) -> Result<(), Self::Error>;
    /// Enables notifications on `characteristic`, routing them to `handler`.
    fn subscribe(
        &mut self,
        characteristic: Characteristic,
        handler: NotifyHandler,
    ) -> Result<(), Self::Error>;
    /// Write without response.
    fn write(&mut self, characteristic: Characteristic, bytes: &[u8]) -> Result<(), Self::Error>;
    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Pause the caller should take after each write.
    fn write_settle(&self) -> Duration {
        DEFAULT_WRITE_SETTLE
    }
}
