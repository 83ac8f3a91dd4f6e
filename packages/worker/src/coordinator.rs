//! Gating of job requests on engine readiness.
//!
//! ```text
//!   AwaitingReady ──(readiness resolved)──▶ Ready
//!        │  run request: queue (replaces)     │  run request: run now
//!        └────────────────────────────────────┘
//! ```
//!
//! There is no way back to `AwaitingReady`.

use tracing::{info, warn};

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    AwaitingReady,
    Ready,
}

/// Owns the pending job and decides when a job runs.
///
/// Each method returns the job to run right now, if any.
#[derive(Debug)]
pub struct Coordinator {
    state: Lifecycle,
    pending: Option<String>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            state: Lifecycle::AwaitingReady,
            pending: None,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// A run request arrived.
    pub fn on_request(&mut self, netlist: String) -> Option<String> {
        match self.state {
            Lifecycle::Ready => Some(netlist),
            Lifecycle::AwaitingReady => {
                if self.pending.replace(netlist).is_some() {
                    warn!("second run request before ready; replacing queued job");
                } else {
                    info!("engine not ready; job queued");
                }
                None
            }
        }
    }

    /// Readiness resolved. Hands back the queued job, once.
    pub fn on_ready(&mut self) -> Option<String> {
        if self.state == Lifecycle::Ready {
            return None;
        }
        self.state = Lifecycle::Ready;
        let job = self.pending.take();
        if job.is_some() {
            info!("running queued job");
        }
        job
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
