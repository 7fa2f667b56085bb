use std::fmt;
use std::time::Duration;

use fitsync_transport_ble::DeviceHandle;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Stored. `aborted` is set when a cycle cap cut the transfer short; the
    /// data collected so far was kept under the partial name.
    Synced {
        bytes: usize,
        aborted: Option<SyncError>,
    },
    /// Already present at the destination, not requested.
    Skipped,
    Failed(SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub name: String,
    pub outcome: TransferOutcome,
    pub elapsed: Duration,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Synced { .. })
    }

    pub fn bytes(&self) -> usize {
        match self.outcome {
            TransferOutcome::Synced { bytes, .. } => bytes,
            _ => 0,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.outcome {
            TransferOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for TransferResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            TransferOutcome::Synced {
                bytes,
                aborted: None,
            } => write!(f, "{}: {bytes} bytes", self.name),
            TransferOutcome::Synced {
                bytes,
                aborted: Some(reason),
            } => write!(f, "{}: {bytes} bytes (truncated, {reason})", self.name),
            TransferOutcome::Skipped => write!(f, "{}: already downloaded", self.name),
            TransferOutcome::Failed(err) => write!(f, "{}: failed, {err}", self.name),
        }
    }
}

/// Everything one session did, in human-readable form via `Display`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub device: Option<DeviceHandle>,
    pub free_space: Option<String>,
    pub listed: usize,
    pub results: Vec<TransferResult>,
    /// Set when the session stopped before visiting every file.
    pub session_error: Option<SyncError>,
}

impl SyncReport {
    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r.outcome, TransferOutcome::Skipped))
    }

    pub fn new_files(&self) -> usize {
        self.listed.saturating_sub(self.skipped())
    }

    pub fn succeeded(&self) -> usize {
        self.count(TransferResult::is_success)
    }

    pub fn failed(&self) -> usize {
        self.count(|r| r.error().is_some())
    }

    pub fn bytes_total(&self) -> usize {
        self.results.iter().map(TransferResult::bytes).sum()
    }

    pub fn result(&self, name: &str) -> Option<&TransferResult> {
        self.results.iter().find(|r| r.name == name)
    }

    fn count(&self, pred: impl Fn(&TransferResult) -> bool) -> usize {
        self.results.iter().filter(|r| pred(r)).count()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{device}: ")?,
            None => write!(f, "no device: ")?,
        }
        write!(
            f,
            "{} listed, {} new, {} skipped, {} succeeded, {} failed",
            self.listed,
            self.new_files(),
            self.skipped(),
            self.succeeded(),
            self.failed()
        )?;
        if let Some(free) = &self.free_space {
            write!(f, ", {free}kb free")?;
        }
        if let Some(err) = &self.session_error {
            write!(f, " ({err})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: TransferOutcome) -> TransferResult {
        TransferResult {
            name: name.to_string(),
            outcome,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn counts_split_by_outcome() {
        let report = SyncReport {
            device: Some(DeviceHandle::with_name("aa:bb", "M1_74F7")),
            free_space: Some("512".into()),
            listed: 4,
            results: vec![
                result(
                    "a.fit",
                    TransferOutcome::Synced {
                        bytes: 10,
                        aborted: None,
                    },
                ),
                result("b.fit", TransferOutcome::Skipped),
                result("c.fit", TransferOutcome::Failed(SyncError::EmptyTransfer)),
                result(
                    "d.fit",
                    TransferOutcome::Synced {
                        bytes: 5,
                        aborted: Some(SyncError::Stall { cycles: 100 }),
                    },
                ),
            ],
            session_error: None,
        };
        assert_eq!(report.new_files(), 3);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.bytes_total(), 15);
        assert_eq!(
            report.to_string(),
            "M1_74F7 (aa:bb): 4 listed, 3 new, 1 skipped, 2 succeeded, 1 failed, 512kb free"
        );
        assert_eq!(
            report.result("d.fit").unwrap().to_string(),
            "d.fit: 5 bytes (truncated, transfer stalled for 100 cycles)"
        );
    }

    #[test]
    fn session_error_is_shown_without_raw_bytes() {
        let report = SyncReport {
            session_error: Some(SyncError::IncompleteListing),
            ..SyncReport::default()
        };
        assert_eq!(
            report.to_string(),
            "no device: 0 listed, 0 new, 0 skipped, 0 succeeded, 0 failed (listing contained no activity files)"
        );
    }
}
