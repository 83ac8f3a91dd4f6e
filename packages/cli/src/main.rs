use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ngspice_worker::wasm_host::WasmHostLoader;
use ngspice_worker::{
    AssetSource, DirAssetSource, HttpAssetSource, Outbox, Termination, Worker, WorkerConfig,
    WorkerError,
};
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod transport;

const LOG_ENV: &str = "NGSPICE_WORKER_LOG";

/// Runs one ngspice simulation, speaking JSON lines on stdin/stdout
#[derive(Parser, Debug)]
#[command(name = "ngspice-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where the engine image and support files are served from (URL or directory)
    #[arg(long, default_value = ".")]
    assets: String,

    /// Path of the engine image relative to the asset location
    #[arg(long)]
    engine_image: Option<String>,

    /// Host directory used as the engine's filesystem root (default: a temp dir)
    #[arg(long)]
    sandbox_root: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "ngspice_worker=trace"
    #[arg(long)]
    log: Option<String>,
}

fn init_tracing(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn asset_source(location: &str) -> Result<Arc<dyn AssetSource>, ngspice_worker::FetchError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpAssetSource::new(location)?))
    } else {
        Ok(Arc::new(DirAssetSource::new(location)))
    }
}

async fn run(args: Args) -> i32 {
    let assets = match asset_source(&args.assets) {
        Ok(assets) => assets,
        Err(err) => {
            error!(%err, location = %args.assets, "invalid asset location");
            return 1;
        }
    };

    // The temp dir guard must outlive the worker.
    let (root, _guard) = match args.sandbox_root {
        Some(root) => (root, None),
        None => match tempfile::tempdir() {
            Ok(dir) => (dir.path().to_path_buf(), Some(dir)),
            Err(err) => {
                error!(%err, "cannot create sandbox directory");
                return 1;
            }
        },
    };
    info!(root = %root.display(), assets = %args.assets, "starting worker");

    let mut config = WorkerConfig::default();
    if let Some(image) = args.engine_image {
        config = config.with_engine_image(image);
    }

    let loader = Arc::new(WasmHostLoader::new(assets.clone(), root));
    let worker = Worker::new(config, loader, assets);

    let (inbox_tx, inbox) = tokio::sync::mpsc::unbounded_channel();
    let (outbox, events) = Outbox::channel();

    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(err) = transport::read_inbox(stdin, inbox_tx).await {
            error!(%err, "reading stdin failed");
        }
    });
    let writer = tokio::spawn(transport::write_outbox(tokio::io::stdout(), events));

    let result = worker.serve(inbox, outbox).await;

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "writing stdout failed"),
        Err(err) => error!(%err, "stdout writer panicked"),
    }

    match result {
        Ok(Termination::Finished(outcome)) => {
            info!(?outcome, "worker finished");
            0
        }
        Ok(Termination::StagingFailed) => 0,
        Ok(Termination::Disconnected) => {
            info!("input closed before a job arrived");
            0
        }
        Err(WorkerError::Load(err)) => {
            error!(%err, "worker could not start");
            1
        }
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.log.as_deref());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(args));
    std::process::exit(code);
}
