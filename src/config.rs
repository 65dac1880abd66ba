//! Session configuration.

use std::time::Duration;

use crate::protocol::FrameConfig;

/// Default time to wait for a reply before re-sending.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of re-sends after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default depth of the request queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Default capacity of the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What the session does with inbound frames no definition is registered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownCommandPolicy {
    /// Log the frame and drop it.
    #[default]
    Ignore,
    /// Fail the pending request with [`crate::Error::UnknownCommand`].
    Fail,
}

/// Per-request timing overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Time to wait for the reply to each attempt.
    pub timeout: Duration,
    /// Re-sends after the first attempt.
    pub max_retries: u32,
    /// Linear backoff step: attempt `n` waits `backoff * n` before re-sending.
    pub backoff: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::ZERO,
        }
    }
}

impl RequestOptions {
    /// Sets the reply timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of re-sends.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the linear backoff step.
    #[must_use]
    pub const fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before re-send number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Upper bound on how long a request can stay unanswered before it fails.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff: Duration = (1..=self.max_retries).map(|n| self.backoff_for(n)).sum();
        self.timeout.saturating_mul(attempts).saturating_add(backoff)
    }
}

/// Configuration for a [`crate::session::Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Default timing for requests sent without explicit options.
    pub request: RequestOptions,
    /// Handling of inbound frames with unregistered command codes.
    pub unknown_commands: UnknownCommandPolicy,
    /// Wire framing.
    pub frame: FrameConfig,
    /// Depth of the caller-to-session channel.
    pub queue_depth: Option<usize>,
    /// Capacity of the event bus.
    pub event_capacity: Option<usize>,
}

impl SessionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default reply timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = timeout;
        self
    }

    /// Sets the default number of re-sends.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.request.max_retries = retries;
        self
    }

    /// Sets the default linear backoff step.
    #[must_use]
    pub const fn backoff(mut self, backoff: Duration) -> Self {
        self.request.backoff = backoff;
        self
    }

    /// Sets the unknown command policy.
    #[must_use]
    pub const fn unknown_commands(mut self, policy: UnknownCommandPolicy) -> Self {
        self.unknown_commands = policy;
        self
    }

    /// Sets the wire framing.
    #[must_use]
    pub const fn frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Sets the depth of the request channel.
    #[must_use]
    pub const fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    /// Sets the capacity of the event bus.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    pub(crate) fn queue_depth_or_default(&self) -> usize {
        self.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH).max(1)
    }

    pub(crate) fn event_capacity_or_default(&self) -> usize {
        self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY).max(1)
    }
}
