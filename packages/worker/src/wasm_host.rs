//! Engine hosting on Wasmtime.
//!
//! Runs a WASI build of the engine. The guest's `/` is a host directory
//! exposed through [`HostDirFs`], so whatever the worker stages there is
//! exactly what the guest sees.
//!
//! Each invocation gets a fresh instance (WASI arguments are fixed at
//! instantiation). Guest stdout and stderr are split into lines as the
//! guest writes them, and each line goes straight to the configured sink.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};
use wasmtime::{Config, Engine, ExternType, Linker, Module, Store, ValType};
use wasmtime_wasi::cli::{IsTerminal, StdoutStream};
use wasmtime_wasi::p1::{self, WasiP1Ctx};
use wasmtime_wasi::p2::{OutputStream, Pollable, StreamResult};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use crate::assets::AssetSource;
use crate::capture::OutputSink;
use crate::error::{EngineError, LoadError};
use crate::fs::{HostDirFs, VirtualFs};
use crate::module::{EngineModule, EntryBinding, EntryPoint, ModuleConfig, ModuleLoader};

/// File name the host asks `locate_file` to resolve.
pub const IMAGE_REQUEST: &str = "ngspice.wasm";

/// Export backing [`EntryBinding::Global`]: the WASI command entry, `() -> ()`.
pub const START_EXPORT: &str = "_start";

/// Export backing [`EntryBinding::Namespaced`]: wasi-libc's
/// `int __main_void(void)`, whose return value is the exit status.
pub const MAIN_EXPORT: &str = "__main_void";

const PROGRAM_NAME: &str = "ngspice";

fn export_for(binding: EntryBinding) -> &'static str {
    match binding {
        EntryBinding::Global => START_EXPORT,
        EntryBinding::Namespaced => MAIN_EXPORT,
    }
}

fn returns_status(export: &str) -> bool {
    export == MAIN_EXPORT
}

/// Cuts a guest output stream into lines.
///
/// Complete lines go to the sink immediately; a trailing partial line is
/// held until more bytes arrive or [`finish`](Self::finish) is called.
struct LineSplitter {
    sink: OutputSink,
    pending: Mutex<Vec<u8>>,
}

impl LineSplitter {
    fn new(sink: OutputSink) -> Arc<Self> {
        Arc::new(Self {
            sink,
            pending: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, bytes: &[u8]) {
        let lines: Vec<Vec<u8>> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.extend_from_slice(bytes);
            let mut lines = Vec::new();
            while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                lines.push(pending.drain(..=end).collect());
            }
            lines
        };
        for line in lines {
            self.emit(&line);
        }
    }

    fn finish(&self) {
        let rest = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        if !rest.is_empty() {
            self.emit(&rest);
        }
    }

    fn emit(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\n').unwrap_or(&text);
        let line = line.strip_suffix('\r').unwrap_or(line);
        (self.sink)(line);
    }
}

/// Guest stdout/stderr wired to a [`LineSplitter`].
#[derive(Clone)]
struct SinkStream(Arc<LineSplitter>);

impl IsTerminal for SinkStream {
    fn is_terminal(&self) -> bool {
        false
    }
}

impl StdoutStream for SinkStream {
    fn p2_stream(&self) -> Box<dyn OutputStream> {
        Box::new(self.clone())
    }

    fn async_stream(&self) -> Box<dyn AsyncWrite + Send + Sync> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl Pollable for SinkStream {
    async fn ready(&mut self) {}
}

#[async_trait]
impl OutputStream for SinkStream {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        self.0.push(&bytes);
        Ok(())
    }

    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        Ok(usize::MAX)
    }
}

impl AsyncWrite for SinkStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.push(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Loads the engine image from an [`AssetSource`] and compiles it.
pub struct WasmHostLoader {
    assets: Arc<dyn AssetSource>,
    root: PathBuf,
}

impl WasmHostLoader {
    /// `root` is the host directory that becomes the guest's `/`.
    pub fn new(assets: Arc<dyn AssetSource>, root: impl Into<PathBuf>) -> Self {
        Self {
            assets,
            root: root.into(),
        }
    }
}

#[async_trait]
impl ModuleLoader for WasmHostLoader {
    async fn load(&self, config: ModuleConfig) -> Result<Arc<dyn EngineModule>, LoadError> {
        if !config.no_initial_run {
            warn!("run-on-load requested but not supported; engine runs only on request");
        }

        let image = (config.locate_file)(IMAGE_REQUEST);
        let bytes = self.assets.fetch_binary(&image).await?;
        debug!(%image, bytes = bytes.len(), "engine image fetched");

        let engine = Engine::new(&Config::new()).map_err(|e| LoadError::Runtime(e.to_string()))?;
        let module = {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || Module::new(&engine, &bytes))
                .await
                .map_err(|e| LoadError::Runtime(e.to_string()))?
                .map_err(|e| LoadError::Module(e.to_string()))?
        };

        let mut linker: Linker<WasiP1Ctx> = Linker::new(&engine);
        p1::add_to_linker_sync(&mut linker, |ctx| ctx)
            .map_err(|e| LoadError::Runtime(e.to_string()))?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| LoadError::Runtime(format!("sandbox root {}: {}", self.root.display(), e)))?;

        let program = Arc::new(Program {
            engine,
            module,
            linker,
            root: self.root.clone(),
            print: config.print,
            print_err: config.print_err,
        });
        Ok(Arc::new(WasmEngineModule {
            fs: HostDirFs::new(&self.root),
            program,
        }))
    }
}

/// The compiled engine plus everything needed to instantiate it.
struct Program {
    engine: Engine,
    module: Module,
    linker: Linker<WasiP1Ctx>,
    root: PathBuf,
    print: OutputSink,
    print_err: OutputSink,
}

impl Program {
    /// Whether `export` exists with the signature its binding expects.
    fn has_entry(&self, export: &str) -> bool {
        let Some(ExternType::Func(ty)) = self.module.get_export(export) else {
            return false;
        };
        if ty.params().next().is_some() {
            return false;
        }
        let results: Vec<ValType> = ty.results().collect();
        if returns_status(export) {
            matches!(results.as_slice(), [ValType::I32])
        } else {
            results.is_empty()
        }
    }

    fn call_export(&self, store: &mut Store<WasiP1Ctx>, export: &str) -> wasmtime::Result<i32> {
        let instance = self.linker.instantiate(&mut *store, &self.module)?;
        if returns_status(export) {
            let main = instance.get_typed_func::<(), i32>(&mut *store, export)?;
            main.call(&mut *store, ())
        } else {
            let start = instance.get_typed_func::<(), ()>(&mut *store, export)?;
            start.call(&mut *store, ()).map(|()| 0)
        }
    }

    /// Instantiate with `args` and run `export` to completion.
    fn invoke(&self, export: &str, args: &[String]) -> Result<i32, EngineError> {
        let stdout = LineSplitter::new(self.print.clone());
        let stderr = LineSplitter::new(self.print_err.clone());

        let mut builder = WasiCtxBuilder::new();
        builder
            .arg(PROGRAM_NAME)
            .args(args)
            .stdout(SinkStream(stdout.clone()))
            .stderr(SinkStream(stderr.clone()));
        builder
            .preopened_dir(&self.root, "/", DirPerms::all(), FilePerms::all())
            .map_err(|e| EngineError::Trap(e.to_string()))?;
        let mut store = Store::new(&self.engine, builder.build_p1());

        let result = self.call_export(&mut store, export);
        stdout.finish();
        stderr.finish();

        match result {
            Ok(code) => Ok(code),
            Err(err) => match err.downcast_ref::<I32Exit>() {
                Some(exit) => Ok(exit.0),
                None => Err(EngineError::Trap(err.to_string())),
            },
        }
    }
}

/// A loaded engine running on Wasmtime.
pub struct WasmEngineModule {
    fs: HostDirFs,
    program: Arc<Program>,
}

impl EngineModule for WasmEngineModule {
    fn fs(&self) -> &dyn VirtualFs {
        &self.fs
    }

    fn entrypoint(&self, binding: EntryBinding) -> Option<Arc<dyn EntryPoint>> {
        let export = export_for(binding);
        if !self.program.has_entry(export) {
            return None;
        }
        Some(Arc::new(WasiEntry {
            program: self.program.clone(),
            export,
        }))
    }
}

struct WasiEntry {
    program: Arc<Program>,
    export: &'static str,
}

#[async_trait]
impl EntryPoint for WasiEntry {
    async fn call(&self, args: &[String]) -> Result<i32, EngineError> {
        let program = self.program.clone();
        let export = self.export;
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || program.invoke(export, &args))
            .await
            .map_err(|e| EngineError::Trap(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::module::{resolve_entrypoint, wasm_locator};
    use crate::testing::MemoryAssets;

    const HELLO: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 8) "Circuit: rc\n")
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 8))
            (i32.store (i32.const 4) (i32.const 12))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 20)))))
    "#;

    const INTERLEAVED: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "out1\n")
          (data (i32.const 24) "err1\n")
          (data (i32.const 32) "out2\n")
          (data (i32.const 40) "tail")
          (func $write (param $fd i32) (param $ptr i32) (param $len i32)
            (i32.store (i32.const 0) (local.get $ptr))
            (i32.store (i32.const 4) (local.get $len))
            (drop (call $fd_write (local.get $fd) (i32.const 0) (i32.const 1) (i32.const 8))))
          (func (export "_start")
            (call $write (i32.const 1) (i32.const 16) (i32.const 5))
            (call $write (i32.const 2) (i32.const 24) (i32.const 5))
            (call $write (i32.const 1) (i32.const 32) (i32.const 5))
            (call $write (i32.const 1) (i32.const 40) (i32.const 4))))
    "#;

    const EXIT_THREE: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
          (memory (export "memory") 1)
          (func (export "_start") (call $exit (i32.const 3))))
    "#;

    const MAIN_RETURNS_TWO: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "__main_void") (result i32) (i32.const 2)))
    "#;

    const MAIN_WITHOUT_STATUS: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "__main_void")))
    "#;

    type Lines = Arc<Mutex<Vec<String>>>;

    fn recorder(lines: &Lines, tag: &'static str) -> OutputSink {
        let lines = lines.clone();
        Arc::new(move |line: &str| {
            lines.lock().unwrap().push(format!("{}:{}", tag, line));
        })
    }

    fn config(lines: &Lines) -> ModuleConfig {
        ModuleConfig {
            no_initial_run: true,
            print: recorder(lines, "stdout"),
            print_err: recorder(lines, "stderr"),
            locate_file: wasm_locator("engine.wasm"),
        }
    }

    async fn load(image: &str, lines: &Lines) -> (tempfile::TempDir, Arc<dyn EngineModule>) {
        let root = tempfile::tempdir().unwrap();
        let assets = MemoryAssets::new().with("engine.wasm", image);
        let loader = WasmHostLoader::new(Arc::new(assets), root.path());
        let module = loader.load(config(lines)).await.ok().unwrap();
        (root, module)
    }

    #[test]
    fn line_splitter_joins_chunks() {
        let lines = Lines::default();
        let splitter = LineSplitter::new(recorder(&lines, "stdout"));

        splitter.push(b"Circ");
        assert!(lines.lock().unwrap().is_empty());
        splitter.push(b"uit: rc\nNo");
        splitter.push(b"de\r\n\n");
        splitter.finish();

        assert_eq!(
            *lines.lock().unwrap(),
            vec!["stdout:Circuit: rc", "stdout:Node", "stdout:"]
        );
    }

    #[tokio::test]
    async fn runs_wasi_command_and_relays_output() {
        let lines = Lines::default();
        let (_root, module) = load(HELLO, &lines).await;
        assert!(module.entrypoint(EntryBinding::Namespaced).is_none());

        let (binding, entry) = resolve_entrypoint(module.as_ref()).unwrap();
        assert_eq!(binding, EntryBinding::Global);
        let args = vec!["-b".to_string(), "/circuit.cir".to_string()];
        assert_eq!(entry.call(&args).await.unwrap(), 0);
        assert_eq!(*lines.lock().unwrap(), vec!["stdout:Circuit: rc"]);
    }

    #[tokio::test]
    async fn output_keeps_write_order_across_channels() {
        let lines = Lines::default();
        let (_root, module) = load(INTERLEAVED, &lines).await;

        let (_, entry) = resolve_entrypoint(module.as_ref()).unwrap();
        assert_eq!(entry.call(&[]).await.unwrap(), 0);
        assert_eq!(
            *lines.lock().unwrap(),
            vec!["stdout:out1", "stderr:err1", "stdout:out2", "stdout:tail"]
        );
    }

    #[tokio::test]
    async fn proc_exit_status_is_returned() {
        let lines = Lines::default();
        let (_root, module) = load(EXIT_THREE, &lines).await;

        let (binding, entry) = resolve_entrypoint(module.as_ref()).unwrap();
        assert_eq!(binding, EntryBinding::Global);
        assert_eq!(entry.call(&[]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn main_void_return_value_is_exit_status() {
        let lines = Lines::default();
        let (_root, module) = load(MAIN_RETURNS_TWO, &lines).await;

        let (binding, entry) = resolve_entrypoint(module.as_ref()).unwrap();
        assert_eq!(binding, EntryBinding::Namespaced);
        assert_eq!(entry.call(&[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mistyped_main_void_is_not_an_entrypoint() {
        let lines = Lines::default();
        let (_root, module) = load(MAIN_WITHOUT_STATUS, &lines).await;

        assert!(module.entrypoint(EntryBinding::Namespaced).is_none());
        assert!(matches!(
            resolve_entrypoint(module.as_ref()),
            Err(EngineError::EntrypointUnavailable)
        ));
    }

    #[tokio::test]
    async fn staged_files_land_in_sandbox_root() {
        let lines = Lines::default();
        let (root, module) = load(HELLO, &lines).await;

        module
            .fs()
            .write_file("/circuit.cir", b"* rc\n")
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(root.path().join("circuit.cir")).unwrap(),
            b"* rc\n"
        );
    }

    #[tokio::test]
    async fn missing_image_fails_load() {
        let root = tempfile::tempdir().unwrap();
        let loader = WasmHostLoader::new(Arc::new(MemoryAssets::new()), root.path());

        let err = loader.load(config(&Lines::default())).await.err().unwrap();
        assert!(matches!(err, LoadError::Image(_)));
    }

    #[tokio::test]
    async fn invalid_image_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let assets = MemoryAssets::new().with("engine.wasm", b"not wasm".to_vec());
        let loader = WasmHostLoader::new(Arc::new(assets), root.path());

        let err = loader.load(config(&Lines::default())).await.err().unwrap();
        assert!(matches!(err, LoadError::Module(_)));
    }
}
