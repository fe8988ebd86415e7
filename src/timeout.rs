//! Per-operation deadlines for connections.
//!
//! A [`Deadline`] is armed before an I/O operation and guards it: when the
//! timer wins the race the operation is abandoned and the caller is expected
//! to shut the transport down. Cancelling is idempotent, including after the
//! deadline has already fired.

use crate::error::ServerError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// The two configured deadline classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading the request line and headers, and the TLS handshake
    Request,
    /// Reading the body and writing the response
    Content,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "reading request headers",
            Phase::Content => "transferring content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadlineState {
    /// Zero duration: nothing is enforced
    Disarmed,
    Armed,
    Cancelled,
    Fired,
}

/// Hands out deadlines for the configured phase durations.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    request_timeout: u64,
    content_timeout: u64,
}

impl TimeoutSupervisor {
    /// Durations in seconds; zero disables the deadline for that phase
    pub fn new(request_timeout: u64, content_timeout: u64) -> Self {
        Self {
            request_timeout,
            content_timeout,
        }
    }

    pub fn seconds(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Request => self.request_timeout,
            Phase::Content => self.content_timeout,
        }
    }

    /// Arm a deadline for one operation of the given phase
    pub fn arm(&self, phase: Phase) -> Deadline {
        Deadline::new(phase, self.seconds(phase))
    }
}

/// A one-shot timer guarding a single operation
pub struct Deadline {
    phase: Phase,
    seconds: u64,
    timer: Option<Pin<Box<Sleep>>>,
    state: DeadlineState,
}

impl Deadline {
    pub fn new(phase: Phase, seconds: u64) -> Self {
        if seconds == 0 {
            return Self {
                phase,
                seconds,
                timer: None,
                state: DeadlineState::Disarmed,
            };
        }
        Self {
            phase,
            seconds,
            timer: Some(Box::pin(sleep(Duration::from_secs(seconds)))),
            state: DeadlineState::Armed,
        }
    }

    /// Run `op` until it completes or the deadline expires, whichever comes
    /// first. An expired deadline drops `op` and reports [`ServerError::Timeout`].
    pub async fn guard<F: Future>(&mut self, op: F) -> Result<F::Output, ServerError> {
        match self.state {
            DeadlineState::Armed => {}
            DeadlineState::Fired => return Err(self.expired()),
            DeadlineState::Disarmed | DeadlineState::Cancelled => return Ok(op.await),
        }
        let Some(timer) = self.timer.as_mut() else {
            return Ok(op.await);
        };

        tokio::pin!(op);
        tokio::select! {
            biased;
            output = &mut op => return Ok(output),
            _ = timer.as_mut() => {}
        }

        self.state = DeadlineState::Fired;
        Err(self.expired())
    }

    /// Stop the timer. Safe to call any number of times, and a no-op once
    /// the deadline has fired.
    pub fn cancel(&mut self) {
        if self.state == DeadlineState::Armed {
            self.state = DeadlineState::Cancelled;
            self.timer = None;
        }
    }

    pub fn has_fired(&self) -> bool {
        self.state == DeadlineState::Fired
    }

    pub fn is_armed(&self) -> bool {
        self.state == DeadlineState::Armed
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn expired(&self) -> ServerError {
        ServerError::Timeout {
            phase: self.phase.as_str(),
            seconds: self.seconds,
        }
    }
}
