//! Error kinds shared across the pipeline, plus the retry helpers used by
//! the networked adapters.
//!
//! Propagation policy: errors local to a single record are contained to that
//! record (logged, record dropped); errors local to a single source or sink
//! are contained to that adapter (reconnect / re-arm); only fatal resource
//! errors terminate the enclosing component.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaqError {
    /// Unknown field, bad type, invalid range.  Raised at construction.
    #[error("config: {0}")]
    Config(String),
    /// Connection refused, timeout, EAGAIN.  Retried per policy.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Peer sent FIN/RST; the adapter closes and re-arms.
    #[error("remote closed the connection")]
    RemoteClosed,
    /// Malformed JSON, bad UTF-8, unparseable timestamp.
    #[error("decode: {0}")]
    Decode(String),
    /// A record that does not have the shape it claims to have.
    #[error("invariant: {0}")]
    Invariant(String),
    /// Cannot bind, cannot create a required directory.  Terminates the
    /// enclosing component.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<das_record::EnvelopeError> for DaqError {
    fn from(err: das_record::EnvelopeError) -> Self {
        DaqError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for DaqError {
    fn from(err: serde_json::Error) -> Self {
        DaqError::Decode(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// WarningLimiter
// ---------------------------------------------------------------------------

/// Mutes chronic failure logging.
///
/// Each consecutive failure should be logged until `warning_limit` of them
/// have been, after which further failures are silent.  The counter resets
/// only after two consecutive successes: datagram sockets can report success
/// on the send following a failed delivery, so a single success proves
/// nothing.
#[derive(Debug)]
pub struct WarningLimiter {
    warning_limit: u32,
    failures: u32,
    successes: u32,
}

impl WarningLimiter {
    pub fn new(warning_limit: u32) -> Self {
        WarningLimiter {
            warning_limit,
            failures: 0,
            successes: 0,
        }
    }

    /// Record a failure.  Returns true if this failure should be logged.
    pub fn on_failure(&mut self) -> bool {
        self.successes = 0;
        self.failures += 1;
        self.failures <= self.warning_limit
    }

    /// True when this failure is the last one that will be logged.
    pub fn just_muted(&self) -> bool {
        self.failures == self.warning_limit
    }

    /// Record a success.  Returns true if the limiter was muted and has now
    /// recovered (worth an info-level note).
    pub fn on_success(&mut self) -> bool {
        self.successes += 1;
        if self.successes < 2 || self.failures == 0 {
            return false;
        }
        let was_muted = self.failures >= self.warning_limit;
        self.failures = 0;
        was_muted
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential reconnect backoff, capped at a configured maximum.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait before the next attempt; doubles on each call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
