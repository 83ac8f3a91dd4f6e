//! Interface to the binary-module runtime that hosts the engine.
//!
//! The runtime itself is external. The worker hands it a [`ModuleConfig`]
//! once and gets back an [`EngineModule`]: the loaded engine with its
//! sandboxed filesystem and its batch entry point.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capture::OutputSink;
use crate::error::{EngineError, LoadError};
use crate::fs::VirtualFs;

/// Maps a file name the runtime asks for to the asset path to load.
pub type LocateFile = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Redirect `.wasm` requests to `image`; leave every other path alone.
pub fn wasm_locator(image: impl Into<String>) -> LocateFile {
    let image = image.into();
    Arc::new(move |path: &str| {
        if path.ends_with(".wasm") {
            image.clone()
        } else {
            path.to_string()
        }
    })
}

/// Configuration handed to the loader.
#[derive(Clone)]
pub struct ModuleConfig {
    /// Do not run the engine's main on load.
    pub no_initial_run: bool,
    /// Receives each standard-output line.
    pub print: OutputSink,
    /// Receives each error-output line.
    pub print_err: OutputSink,
    /// Resolves the binary image path.
    pub locate_file: LocateFile,
}

impl fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("no_initial_run", &self.no_initial_run)
            .finish_non_exhaustive()
    }
}

/// Where an entry point may be bound in a given build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryBinding {
    /// Bare global symbol.
    Global,
    /// Symbol namespaced on the module object.
    Namespaced,
}

impl fmt::Display for EntryBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryBinding::Global => write!(f, "callMain"),
            EntryBinding::Namespaced => write!(f, "Module.callMain"),
        }
    }
}

/// Bindings probed for the entry point, in order.
pub const ENTRY_CANDIDATES: [EntryBinding; 2] = [EntryBinding::Global, EntryBinding::Namespaced];

/// The engine's command-line style entry point.
#[async_trait]
pub trait EntryPoint: Send + Sync {
    /// Run the engine with `args` (program name excluded) and return its
    /// exit status.
    async fn call(&self, args: &[String]) -> Result<i32, EngineError>;
}

/// A loaded engine.
pub trait EngineModule: Send + Sync {
    /// The engine's sandboxed filesystem.
    fn fs(&self) -> &dyn VirtualFs;

    /// The entry point at `binding`, if this build has one there.
    fn entrypoint(&self, binding: EntryBinding) -> Option<Arc<dyn EntryPoint>>;
}

/// Loads the engine into its runtime.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the engine. Resolves once the runtime reports initialization
    /// complete.
    async fn load(&self, config: ModuleConfig) -> Result<Arc<dyn EngineModule>, LoadError>;
}

/// Probe [`ENTRY_CANDIDATES`] in order; first available wins.
pub fn resolve_entrypoint(
    module: &dyn EngineModule,
) -> Result<(EntryBinding, Arc<dyn EntryPoint>), EngineError> {
    ENTRY_CANDIDATES
        .iter()
        .find_map(|&binding| module.entrypoint(binding).map(|entry| (binding, entry)))
        .ok_or(EngineError::EntrypointUnavailable)
}
