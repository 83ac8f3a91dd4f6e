//! In-memory stand-ins for the external collaborators.
//!
//! [`MemoryAssets`] serves assets from a map, and [`ScriptedLoader`] loads
//! a fake engine over a [`MemFs`] whose behavior is a plain closure. Both
//! exist so the lifecycle can be driven deterministically without a real
//! runtime or asset server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::assets::AssetSource;
use crate::capture::OutputSink;
use crate::config::{AssetManifest, MODEL_FILES};
use crate::error::{EngineError, FetchError, LoadError};
use crate::fs::{MemFs, VirtualFs};
use crate::module::{EngineModule, EntryBinding, EntryPoint, ModuleConfig, ModuleLoader};

/// Assets held in memory, keyed by asset path.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every asset the default manifest asks for, plus an engine image.
    pub fn engine_defaults() -> Self {
        let manifest = AssetManifest::default();
        let mut assets = Self::new();
        for name in MODEL_FILES {
            assets = assets.with(manifest.model_path(name), format!("model:{}", name));
        }
        assets
            .with("spinit", "* ngspice init\nset ngbehavior=ps\n")
            .with("ngspice.wasm", b"\0asm\x01\0\0\0".to_vec())
    }

    pub fn with(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), data.into());
        self
    }

    pub fn without(mut self, path: &str) -> Self {
        self.files.remove(path);
        self
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }
}

#[async_trait]
impl AssetSource for MemoryAssets {
    async fn fetch_binary(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        self.get(path).ok_or_else(|| FetchError::not_found(path))
    }
}

/// What a scripted engine sees when it is invoked.
pub struct Invocation<'a> {
    pub args: &'a [String],
    /// Contents of the circuit file named by the last argument.
    pub circuit: String,
    print: &'a OutputSink,
    print_err: &'a OutputSink,
}

impl Invocation<'_> {
    pub fn stdout(&self, line: &str) {
        (self.print)(line)
    }

    pub fn stderr(&self, line: &str) {
        (self.print_err)(line)
    }
}

/// Behavior of a scripted engine run: returns the exit status.
pub type Behavior = Arc<dyn Fn(&Invocation<'_>) -> Result<i32, EngineError> + Send + Sync>;

/// Echoes the circuit title and emits the usual sandbox noise.
pub fn echo_behavior() -> Behavior {
    Arc::new(|run: &Invocation<'_>| {
        let title = run.circuit.lines().next().unwrap_or_default();
        run.stderr("fopen(\"/proc/meminfo\", \"r\") failed");
        run.stdout(&format!("Circuit: {}", title));
        run.stdout("Simulation complete");
        run.stderr("program exited (with status: 0), but keepRuntimeAlive() is set (counter=0)");
        Ok(0)
    })
}

/// Releases a gated [`ScriptedLoader`].
#[derive(Debug)]
pub struct LoadGate(oneshot::Sender<()>);

impl LoadGate {
    /// Let the runtime report initialization complete.
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

/// Observations shared between a [`ScriptedLoader`] and the test.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    invocations: Arc<AtomicUsize>,
    args: Arc<Mutex<Vec<Vec<String>>>>,
    image: Arc<Mutex<Option<String>>>,
    no_initial_run: Arc<Mutex<Option<bool>>>,
    fs: Arc<MemFs>,
}

impl Probe {
    /// Number of times the entry point ran.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Arguments of every invocation, in order.
    pub fn args(&self) -> Vec<Vec<String>> {
        self.args
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Image path the loader resolved through `locate_file`.
    pub fn image(&self) -> Option<String> {
        self.image
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn no_initial_run(&self) -> Option<bool> {
        *self
            .no_initial_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The engine's filesystem.
    pub fn fs(&self) -> &MemFs {
        &self.fs
    }
}

/// A loader producing a fake engine.
pub struct ScriptedLoader {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    failure: Option<String>,
    binding: Option<EntryBinding>,
    behavior: Behavior,
    probe: Probe,
}

impl ScriptedLoader {
    /// Loads immediately; entry point bound globally; runs [`echo_behavior`].
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(None),
            failure: None,
            binding: Some(EntryBinding::Global),
            behavior: echo_behavior(),
            probe: Probe::default(),
        }
    }

    /// Hold initialization until the returned gate is opened.
    pub fn gated(mut self) -> (Self, LoadGate) {
        let (tx, rx) = oneshot::channel();
        self.gate = Mutex::new(Some(rx));
        (self, LoadGate(tx))
    }

    /// Fail to load with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Expose the entry point at `binding`, or nowhere.
    pub fn with_binding(mut self, binding: Option<EntryBinding>) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

impl Default for ScriptedLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleLoader for ScriptedLoader {
    async fn load(&self, config: ModuleConfig) -> Result<Arc<dyn EngineModule>, LoadError> {
        if let Some(message) = &self.failure {
            return Err(LoadError::Module(message.clone()));
        }

        *self
            .probe
            .image
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((config.locate_file)("ngspice.wasm"));
        *self
            .probe
            .no_initial_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(config.no_initial_run);

        let gate = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(gate) = gate {
            gate.await
                .map_err(|_| LoadError::Runtime("load gate dropped".to_string()))?;
        }

        Ok(Arc::new(ScriptedModule {
            binding: self.binding,
            entry: Arc::new(ScriptedEntry {
                config,
                behavior: self.behavior.clone(),
                probe: self.probe.clone(),
            }),
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptedModule {
    binding: Option<EntryBinding>,
    entry: Arc<ScriptedEntry>,
    probe: Probe,
}

impl EngineModule for ScriptedModule {
    fn fs(&self) -> &dyn VirtualFs {
        self.probe.fs.as_ref()
    }

    fn entrypoint(&self, binding: EntryBinding) -> Option<Arc<dyn EntryPoint>> {
        if self.binding == Some(binding) {
            Some(self.entry.clone() as Arc<dyn EntryPoint>)
        } else {
            None
        }
    }
}

struct ScriptedEntry {
    config: ModuleConfig,
    behavior: Behavior,
    probe: Probe,
}

#[async_trait]
impl EntryPoint for ScriptedEntry {
    async fn call(&self, args: &[String]) -> Result<i32, EngineError> {
        self.probe.invocations.fetch_add(1, Ordering::SeqCst);
        self.probe
            .args
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_vec());

        let circuit = match args.last() {
            Some(path) => String::from_utf8_lossy(&self.probe.fs.read_file(path).await?).into_owned(),
            None => String::new(),
        };
        let invocation = Invocation {
            args,
            circuit,
            print: &self.config.print,
            print_err: &self.config.print_err,
        };
        (self.behavior)(&invocation)
    }
}
