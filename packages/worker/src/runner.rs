//! Execution of the single job a context runs.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bootstrap::Readiness;
use crate::capture::OutputCapture;
use crate::config::WorkerConfig;
use crate::error::EngineError;
use crate::module::{resolve_entrypoint, EngineModule};
use crate::protocol::{Outbound, Outbox};

/// Message sent when the circuit text is blank.
pub const EMPTY_NETLIST: &str = "Netlist is empty.";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `done` was sent.
    Completed,
    /// The engine failed; `error` was sent with the logs.
    Failed,
    /// The netlist was blank; `error` was sent and the engine never ran.
    Rejected,
}

/// Runs one circuit through the engine and reports the outcome.
///
/// Consuming `self` makes a second run impossible.
pub struct Runner {
    module: Arc<dyn EngineModule>,
    capture: OutputCapture,
    outbox: Outbox,
    readiness: Readiness,
    config: Arc<WorkerConfig>,
}

impl Runner {
    pub fn new(
        module: Arc<dyn EngineModule>,
        capture: OutputCapture,
        outbox: Outbox,
        readiness: Readiness,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            module,
            capture,
            outbox,
            readiness,
            config,
        }
    }

    /// Run `netlist` and send exactly one terminal message.
    pub async fn run(self, netlist: String) -> RunOutcome {
        if netlist.trim().is_empty() {
            warn!("rejecting empty netlist");
            self.capture.seal();
            self.outbox.send(Outbound::error(EMPTY_NETLIST));
            return RunOutcome::Rejected;
        }

        self.readiness.wait().await;
        self.outbox.send(Outbound::Status {
            message: self.config.status_message.clone(),
        });

        match self.execute(&netlist).await {
            Ok(()) => {
                let logs = self.capture.seal();
                info!(
                    stdout_bytes = logs.stdout.len(),
                    stderr_bytes = logs.stderr.len(),
                    "simulation finished"
                );
                self.outbox.send(Outbound::Done {
                    exit_code: 0,
                    stdout: logs.stdout,
                    stderr: logs.stderr,
                });
                RunOutcome::Completed
            }
            Err(err) => {
                let logs = self.capture.seal();
                error!(%err, "simulation failed");
                self.outbox.send(Outbound::Error {
                    message: err.to_string(),
                    stdout: Some(logs.stdout),
                    stderr: Some(logs.stderr),
                });
                RunOutcome::Failed
            }
        }
    }

    async fn execute(&self, netlist: &str) -> Result<(), EngineError> {
        let layout = &self.config.layout;
        let fs = self.module.fs();

        fs.write_file(&layout.circuit_path, netlist.as_bytes()).await?;
        if let Err(err) = fs.unlink(&layout.output_path).await {
            debug!(%err, "no stale output to clear");
        }

        let (binding, entry) = resolve_entrypoint(self.module.as_ref())?;
        let args = self.config.batch_args();
        info!(%binding, ?args, "invoking engine");
        match entry.call(&args).await? {
            0 => Ok(()),
            code => Err(EngineError::Exit(code)),
        }
    }
}
