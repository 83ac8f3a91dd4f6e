//! One worker context: bootstrap racing message intake, then one job.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::assets::AssetSource;
use crate::bootstrap::{Bootstrap, BootstrapError, Readiness};
use crate::capture::OutputCapture;
use crate::config::WorkerConfig;
use crate::coordinator::Coordinator;
use crate::error::{Result, WorkerError};
use crate::module::ModuleLoader;
use crate::protocol::{Inbound, Outbound, Outbox};
use crate::runner::{RunOutcome, Runner};

/// Why a context stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A job ran and its terminal message was sent.
    Finished(RunOutcome),
    /// Staging failed and an `error` was sent.
    StagingFailed,
    /// The parent hung up without a job for us.
    Disconnected,
}

fn run_request(value: JsonValue) -> Option<String> {
    match Inbound::from_value(value) {
        Some(message) => Some(message.into_netlist()),
        None => {
            debug!("ignoring message that is not a run request");
            None
        }
    }
}

/// A single-shot simulation context.
///
/// [`serve`](Self::serve) consumes the worker: once it returns, the
/// context is finished and nothing else is processed.
pub struct Worker {
    config: Arc<WorkerConfig>,
    loader: Arc<dyn ModuleLoader>,
    assets: Arc<dyn AssetSource>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        loader: Arc<dyn ModuleLoader>,
        assets: Arc<dyn AssetSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            loader,
            assets,
        }
    }

    /// Bootstrap the engine while accepting messages from `inbox`, run at
    /// most one job, and report through `outbox`.
    ///
    /// Returns `Err` only when the engine cannot be loaded at all; no
    /// message reaches the parent in that case.
    pub async fn serve(
        self,
        mut inbox: mpsc::UnboundedReceiver<JsonValue>,
        outbox: Outbox,
    ) -> Result<Termination> {
        let capture = OutputCapture::new(self.config.noise.clone(), outbox.clone());
        let readiness = Readiness::new();
        let bootstrap = Bootstrap {
            loader: self.loader,
            assets: self.assets,
            config: self.config.clone(),
            capture: capture.clone(),
            readiness: readiness.clone(),
        }
        .run();
        tokio::pin!(bootstrap);

        let mut coordinator = Coordinator::new();
        let mut inbox_open = true;

        let (module, queued) = loop {
            tokio::select! {
                result = &mut bootstrap => match result {
                    Ok(module) => break (module, coordinator.on_ready()),
                    Err(BootstrapError::Load(err)) => {
                        error!(%err, "engine module failed to load");
                        return Err(WorkerError::Load(err));
                    }
                    Err(BootstrapError::Staging(err)) => {
                        error!(%err, "staging support files failed");
                        capture.seal();
                        outbox.send(Outbound::error(err.to_string()));
                        return Ok(Termination::StagingFailed);
                    }
                },
                message = inbox.recv(), if inbox_open => match message {
                    Some(value) => {
                        if let Some(netlist) = run_request(value) {
                            coordinator.on_request(netlist);
                        }
                    }
                    None => {
                        debug!("parent channel closed before the engine was ready");
                        inbox_open = false;
                    }
                },
            }
        };

        let runner = Runner::new(module, capture, outbox, readiness, self.config);
        let job = match queued {
            Some(job) => job,
            None => loop {
                match inbox.recv().await {
                    Some(value) => {
                        if let Some(job) = run_request(value).and_then(|n| coordinator.on_request(n)) {
                            break job;
                        }
                    }
                    None => {
                        info!("parent channel closed with no job to run");
                        return Ok(Termination::Disconnected);
                    }
                }
            },
        };

        Ok(Termination::Finished(runner.run(job).await))
    }
}
