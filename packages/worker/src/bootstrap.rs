//! One-time engine bootstrap: load the module, stage its filesystem, and
//! signal readiness.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::assets::AssetSource;
use crate::capture::{Channel, OutputCapture};
use crate::config::WorkerConfig;
use crate::error::{LoadError, StagingError};
use crate::module::{wasm_locator, EngineModule, ModuleConfig, ModuleLoader};
use crate::stager::Stager;

/// Resolves once, when the engine is loaded and every support asset has
/// been written. Never resets.
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<bool>>,
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark ready. Returns `false` if already resolved.
    pub fn resolve(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until resolved. Pending forever if it never is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the bootstrap did not complete.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Everything the bootstrap needs, gathered once per context.
pub struct Bootstrap {
    pub loader: Arc<dyn ModuleLoader>,
    pub assets: Arc<dyn AssetSource>,
    pub config: Arc<WorkerConfig>,
    pub capture: OutputCapture,
    pub readiness: Readiness,
}

impl Bootstrap {
    /// The module configuration handed to the loader: no auto-run, output
    /// routed into the capture, `.wasm` requests pointed at the engine image.
    pub fn module_config(&self) -> ModuleConfig {
        ModuleConfig {
            no_initial_run: true,
            print: self.capture.sink(Channel::Stdout),
            print_err: self.capture.sink(Channel::Stderr),
            locate_file: wasm_locator(self.config.engine_image.clone()),
        }
    }

    /// Load and stage. Readiness resolves only if both succeed.
    pub async fn run(self) -> Result<Arc<dyn EngineModule>, BootstrapError> {
        info!(image = %self.config.engine_image, "loading engine module");
        let module = self.loader.load(self.module_config()).await?;

        info!("engine runtime initialized; staging support files");
        Stager::new(&self.config.assets, &self.config.layout)
            .stage(self.assets.as_ref(), module.fs())
            .await?;

        self.readiness.resolve();
        info!(
            models = self.config.assets.models.len(),
            "support files staged; engine ready"
        );
        Ok(module)
    }
}
