//! Collaborators supplied by the host application.
//!
//! The session never talks to the platform directly. It asks a [`KeepAlive`]
//! to keep the process awake while a request is in flight and hands decoded
//! alarms to an [`AlarmSink`].

use std::fmt;
use std::sync::Arc;

use crate::types::AlarmKind;

/// Keeps the host awake while the pump is being talked to.
///
/// Calls are balanced: every `acquire` is followed by exactly one `release`.
pub trait KeepAlive: Send + Sync {
    /// Called when a request goes in flight.
    fn acquire(&self);

    /// Called when the request finishes, whatever the outcome.
    fn release(&self);
}

/// Receives alarm conditions reported by the pump.
pub trait AlarmSink: Send + Sync {
    /// Called once per decoded alarm.
    fn raise(&self, alarm: AlarmKind);
}

/// Keep-alive that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeepAlive;

impl KeepAlive for NoKeepAlive {
    fn acquire(&self) {}

    fn release(&self) {}
}

/// Alarm sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlarms;

impl AlarmSink for LogAlarms {
    fn raise(&self, alarm: AlarmKind) {
        tracing::warn!(%alarm, "pump alarm");
    }
}

/// Holds one keep-alive acquisition and releases it on drop.
pub struct KeepAliveGuard {
    keep_alive: Arc<dyn KeepAlive>,
}

impl KeepAliveGuard {
    /// Acquires the keep-alive.
    #[must_use]
    pub fn acquire(keep_alive: Arc<dyn KeepAlive>) -> Self {
        keep_alive.acquire();
        Self { keep_alive }
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.keep_alive.release();
    }
}

impl fmt::Debug for KeepAliveGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveGuard").finish_non_exhaustive()
    }
}
