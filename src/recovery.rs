//! Per-engine failure tracking.

/// Health of an engine's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
    /// The device is open and reporting no errors.
    Healthy,
    /// The device failed to open or reported an error.
    Failed,
    /// No device validated during the last restart.
    NoDevice,
}

/// Failure state machine shared by the playout and capture engines.
///
/// The `failed` flag is set by any device error and cleared only by a
/// successful reopen. Counters survive recovery so they can be reported.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecoveryState {
    failed: bool,
    no_device: bool,
    consecutive_failures: u32,
    total_failures: u64,
    restarts: u64,
    last_error: Option<String>,
}

impl RecoveryState {
    /// Records a device failure.
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.failed = true;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_error = Some(error.into());
    }

    /// Records that no device validated. Implies failure.
    pub(crate) fn no_device(&mut self) {
        self.no_device = true;
        self.fail("no device available");
    }

    /// Records a successful open.
    pub(crate) fn recover(&mut self) {
        self.failed = false;
        self.no_device = false;
        self.consecutive_failures = 0;
    }

    /// Records a run of the restart protocol.
    pub(crate) fn record_restart(&mut self) {
        self.restarts += 1;
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn health(&self) -> DeviceHealth {
        if self.no_device {
            DeviceHealth::NoDevice
        } else if self.failed {
            DeviceHealth::Failed
        } else {
            DeviceHealth::Healthy
        }
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub(crate) fn restarts(&self) -> u64 {
        self.restarts
    }

    pub(crate) fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
