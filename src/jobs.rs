// ============================================================================
// ASYNC EXECUTION GATE: single-flight background colorization
// ============================================================================
//
// Jobs run on `rayon::spawn`; completions come back over an mpsc channel and
// are only ever consumed by the controller (`poll` / `wait`).  Every job
// carries a token: a completion whose token is not the one in flight
// (because it was cancelled or superseded) is dropped on arrival.
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::canvas::ImageBuffer;
use crate::error::JobError;
use crate::ops::colorize::{ColorizationAdapter, ColorizeOutcome};

/// Identifies one submitted colorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub token: u64,
    pub session: Uuid,
}

/// Result delivered from the background worker.
#[derive(Debug)]
pub struct ColorizeCompletion {
    pub handle: JobHandle,
    /// `Err` holds the panic message if the worker itself panicked.
    pub outcome: Result<ColorizeOutcome, String>,
    pub elapsed: Duration,
}

pub struct ColorizeGate {
    sender: mpsc::Sender<ColorizeCompletion>,
    receiver: mpsc::Receiver<ColorizeCompletion>,
    next_token: u64,
    in_flight: Option<JobHandle>,
}

impl Default for ColorizeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorizeGate {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            next_token: 1,
            in_flight: None,
        }
    }

    /// Start colorizing `gray` in the background. Rejected with
    /// [`JobError::Busy`] while another job is in flight.
    pub fn submit(
        &mut self,
        adapter: Arc<ColorizationAdapter>,
        gray: ImageBuffer,
        session: Uuid,
    ) -> Result<JobHandle, JobError> {
        if let Some(pending) = self.in_flight {
            return Err(JobError::Busy(pending.token));
        }
        if gray.is_empty() {
            return Err(JobError::NoImage);
        }

        let handle = JobHandle {
            token: self.next_token,
            session,
        };
        self.next_token = self.next_token.wrapping_add(1).max(1);
        self.in_flight = Some(handle);

        let sender = self.sender.clone();
        log::debug!("colorize job {} submitted ({}x{})", handle.token, gray.width(), gray.height());
        rayon::spawn(move || {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| adapter.colorize(&gray))).map_err(|panic_info| {
                if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                }
            });
            // Receiver gone means the controller was dropped; nothing to do.
            let _ = sender.send(ColorizeCompletion {
                handle,
                outcome,
                elapsed: started.elapsed(),
            });
        });
        Ok(handle)
    }

    /// Forget the in-flight job. The worker keeps running, but its result is
    /// discarded when it arrives.
    pub fn cancel(&mut self) -> Option<JobHandle> {
        let cancelled = self.in_flight.take();
        if let Some(h) = cancelled {
            log::debug!("colorize job {} cancelled", h.token);
        }
        cancelled
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Non-blocking: return the in-flight job's completion if it has arrived.
    pub fn poll(&mut self) -> Option<ColorizeCompletion> {
        while let Ok(completion) = self.receiver.try_recv() {
            if let Some(done) = self.accept(completion) {
                return Some(done);
            }
        }
        None
    }

    /// Block up to `timeout` for the in-flight job. Returns `None` on timeout
    /// or when nothing is in flight.
    pub fn wait(&mut self, timeout: Duration) -> Option<ColorizeCompletion> {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    if let Some(done) = self.accept(completion) {
                        return Some(done);
                    }
                }
                Err(_) => return None,
            }
        }
        None
    }

    fn accept(&mut self, completion: ColorizeCompletion) -> Option<ColorizeCompletion> {
        if self.in_flight == Some(completion.handle) {
            self.in_flight = None;
            Some(completion)
        } else {
            log::debug!("discarding stale colorize result (job {})", completion.handle.token);
            None
        }
    }
}
