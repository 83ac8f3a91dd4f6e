//! Worker configuration.
//!
//! The defaults describe the app-style ngspice build: where its assets are
//! served from and where inside the sandbox it expects to find them.

use crate::capture::NoiseFilter;
use crate::fs::join;

/// Code-model libraries the engine loads from its library directory.
pub const MODEL_FILES: [&str; 7] = [
    "analog.cm",
    "digital.cm",
    "spice2poly.cm",
    "table.cm",
    "tlines.cm",
    "xtradev.cm",
    "xtraevt.cm",
];

/// Which support assets to fetch, by relative asset path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    /// Code-model file names.
    pub models: Vec<String>,
    /// Asset path prefix for code models.
    pub model_prefix: String,
    /// Asset path of the initialization script.
    pub init_script: String,
}

impl AssetManifest {
    /// Asset path of one code model.
    pub fn model_path(&self, name: &str) -> String {
        format!("{}{}", self.model_prefix, name)
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self {
            models: MODEL_FILES.iter().map(|s| s.to_string()).collect(),
            model_prefix: "cm/".to_string(),
            init_script: "spinit".to_string(),
        }
    }
}

/// Fixed locations inside the sandbox filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsLayout {
    /// Where the circuit is written before each run.
    pub circuit_path: String,
    /// Output artifact cleared before each run.
    pub output_path: String,
    /// Code-model library directory.
    pub library_dir: String,
    /// Directory holding the initialization script.
    pub scripts_dir: String,
    /// File name of the initialization script inside `scripts_dir`.
    pub init_script_name: String,
    /// Second location the engine probes for the script.
    pub init_script_mirror: String,
}

impl FsLayout {
    /// Every path the initialization script is written to.
    pub fn init_script_targets(&self) -> [String; 2] {
        [
            join(&self.scripts_dir, &self.init_script_name),
            self.init_script_mirror.clone(),
        ]
    }
}

impl Default for FsLayout {
    fn default() -> Self {
        Self {
            circuit_path: "/circuit.cir".to_string(),
            output_path: "/output.txt".to_string(),
            library_dir: "/usr/local/lib/ngspice".to_string(),
            scripts_dir: "/usr/local/share/ngspice/scripts".to_string(),
            init_script_name: "spinit".to_string(),
            init_script_mirror: "/spinit".to_string(),
        }
    }
}

/// Configuration for one worker context.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Image served in place of any `.wasm` file the loader asks for.
    pub engine_image: String,
    pub assets: AssetManifest,
    pub layout: FsLayout,
    /// Engine diagnostics that never reach the parent.
    pub noise: NoiseFilter,
    /// Text of the `status` event sent when a run starts.
    pub status_message: String,
}

impl WorkerConfig {
    /// Arguments for the engine's batch entry point.
    pub fn batch_args(&self) -> Vec<String> {
        vec!["-b".to_string(), self.layout.circuit_path.clone()]
    }

    pub fn with_engine_image(mut self, image: impl Into<String>) -> Self {
        self.engine_image = image.into();
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine_image: "ngspice.wasm".to_string(),
            assets: AssetManifest::default(),
            layout: FsLayout::default(),
            noise: NoiseFilter::default(),
            status_message: "Running simulation…".to_string(),
        }
    }
}
