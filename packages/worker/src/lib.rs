//! # ngspice-worker
//!
//! Runs exactly one circuit simulation per worker context.
//!
//! A context loads the ngspice engine into a sandboxed binary runtime,
//! stages the support files the engine needs into its virtual filesystem,
//! takes one `run` request from its parent, and reports progress and the
//! result back as messages. Then it is done.
//!
//! ## Lifecycle
//!
//! ```text
//!  context start
//!       │
//!       ├── Bootstrap ─ load module ─▶ stage assets ─▶ Readiness resolved
//!       │                                                    │
//!       └── inbox ─ run request ─▶ Coordinator ──────────────┤
//!                     (queued while not ready)               ▼
//!                                                          Runner
//!                                              status, stdout/stderr…, done|error
//! ```
//!
//! Loading is slow and the request can arrive at any point during it, so
//! the [`Coordinator`] holds an early request until the engine is ready.
//! At most one job ever runs: [`Runner::run`] and [`Worker::serve`] both
//! consume their receiver.
//!
//! ## Collaborators
//!
//! The engine runtime, the asset server, and the parent are external:
//!
//! - [`ModuleLoader`] / [`EngineModule`]: the runtime. With the `wasmtime`
//!   feature, [`wasm_host::WasmHostLoader`] runs a WASI build of the engine.
//! - [`AssetSource`]: [`HttpAssetSource`] or [`DirAssetSource`].
//! - The parent talks to [`Worker::serve`] through a channel of JSON values
//!   in and an [`Outbox`] of [`Outbound`] messages out.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ngspice_worker::{HttpAssetSource, Outbox, Worker, WorkerConfig};
//!
//! let assets = Arc::new(HttpAssetSource::new("https://example.com/ngspice/")?);
//! let (outbox, mut events) = Outbox::channel();
//! let (inbox_tx, inbox) = tokio::sync::mpsc::unbounded_channel();
//!
//! inbox_tx.send(serde_json::json!({"type": "run", "netlist": circuit}))?;
//! let worker = Worker::new(WorkerConfig::default(), loader, assets);
//! let termination = worker.serve(inbox, outbox).await?;
//! ```

pub mod assets;
pub mod bootstrap;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fs;
pub mod module;
pub mod protocol;
pub mod runner;
pub mod stager;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(feature = "wasmtime")]
pub mod wasm_host;

pub use assets::{AssetSource, DirAssetSource, HttpAssetSource};
pub use bootstrap::{Bootstrap, BootstrapError, Readiness};
pub use capture::{CapturedOutput, Channel, NoiseFilter, NoiseRule, OutputCapture, OutputSink};
pub use config::{AssetManifest, FsLayout, WorkerConfig, MODEL_FILES};
pub use coordinator::{Coordinator, Lifecycle};
pub use error::{
    EngineError, FetchError, FsError, LoadError, Result, StagingError, WorkerError,
};
pub use fs::{ensure_path, HostDirFs, MemFs, VirtualFs};
pub use module::{
    resolve_entrypoint, wasm_locator, EngineModule, EntryBinding, EntryPoint, LocateFile,
    ModuleConfig, ModuleLoader, ENTRY_CANDIDATES,
};
pub use protocol::{Inbound, Outbound, Outbox};
pub use runner::{RunOutcome, Runner, EMPTY_NETLIST};
pub use stager::Stager;
pub use worker::{Termination, Worker};
