//! `blksum`: the CLI front-end around the `blkhash` engine (spec.md §6.2).
//!
//! Everything here — argument parsing, driver selection, output
//! formatting and the exit-code mapping — is deliberately out of the
//! core's scope (spec.md §1) and lives only in this binary.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, Level};

use blkhash::cancel::CancellationToken;
use blkhash::digest::Primitive;
use blkhash::engine::{
    Config, Engine, DEFAULT_BLOCK_SIZE, DEFAULT_QUEUE_DEPTH, DEFAULT_STREAMS, DEFAULT_THREAD_COUNT,
};
use blkhash::source::extent_map::ExtentMapSource;
use blkhash::source::{FileSource, PipeSource, DEFAULT_READ_SIZE};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Parallel, content-addressable block checksum for disk images",
    long_about = None
)]
struct Cli {
    /// Digest primitive to use. See --list-digests for the available set.
    #[arg(long, env = "BLKSUM_DIGEST", default_value = "sha256")]
    digest: String,

    /// Print the available digest primitives and exit.
    #[arg(long)]
    list_digests: bool,

    /// Retain the OS page cache for the input instead of advisory-dropping
    /// finished ranges as they're consumed.
    #[arg(long, env = "BLKSUM_CACHE")]
    cache: bool,

    /// Hasher worker thread count.
    #[arg(long, env = "BLKSUM_THREADS", default_value_t = DEFAULT_THREAD_COUNT)]
    threads: usize,

    /// Per-worker inbound queue depth, and in-flight read count for the
    /// extent-map driver.
    #[arg(long, env = "BLKSUM_QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// Read buffer size in bytes for the file and pipe drivers.
    #[arg(long, env = "BLKSUM_READ_SIZE", default_value_t = DEFAULT_READ_SIZE)]
    read_size: usize,

    /// Block size in bytes. Part of the digest's wire-stable contract;
    /// only meant to be changed for experiments.
    #[arg(long, env = "BLKSUM_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// File to checksum, an `nbd+unix:///?socket=…` image-server URL, or
    /// `-`/omitted for standard input.
    path: Option<String>,
}

enum RunError {
    Fatal(blkhash::Error),
    Cancelled,
}

impl From<blkhash::Error> for RunError {
    fn from(err: blkhash::Error) -> Self {
        match err {
            blkhash::Error::Cancelled => RunError::Cancelled,
            other => RunError::Fatal(other),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = blkhash_tracing::TracingBuilder::default()
        .level(Level::INFO)
        .build()
    {
        eprintln!("blksum: failed to initialize logging: {err}");
    }

    if cli.list_digests {
        for primitive in Primitive::all() {
            println!("{primitive}");
        }
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("blksum: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        // spec.md §7: signal termination prints no digest.
        Err(RunError::Cancelled) => ExitCode::from(130),
        Err(RunError::Fatal(err)) => {
            error!(%err, "blksum failed");
            eprintln!("blksum: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let primitive = Primitive::from_name(&cli.digest)?;
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let config = Config {
        primitive,
        block_size: cli.block_size,
        streams: DEFAULT_STREAMS,
        thread_count: cli.threads,
        queue_depth: cli.queue_depth,
        zero_detect: true,
    };

    let label = cli.path.clone().unwrap_or_else(|| "-".to_string());

    let root = match cli.path.as_deref() {
        None | Some("-") => run_pipe(config, cancel, cli.read_size).await?,
        Some(path) if is_nbd_unix_url(path) => {
            let socket = socket_path_from_url(path)?;
            let queue_depth = cli
                .queue_depth
                .max(cli.threads)
                .max(blkhash::source::extent_map::DEFAULT_QUEUE_DEPTH);
            run_extent_map(config, cancel, socket, queue_depth, cli.read_size).await?
        }
        Some(path) => run_file(config, cancel, PathBuf::from(path), cli.cache, cli.read_size).await?,
    };

    println!("{}  {}", data_encoding::HEXLOWER.encode(&root), label);
    Ok(())
}

async fn run_pipe(
    config: Config,
    cancel: CancellationToken,
    read_size: usize,
) -> Result<Vec<u8>, blkhash::Error> {
    tokio::task::spawn_blocking(move || {
        let mut engine = Engine::new(config)?;
        PipeSource::new(io::stdin())
            .with_read_size(read_size)
            .run(&mut engine, &cancel)?;
        engine.finalize()
    })
    .await
    .expect("pipe driver thread panicked")
}

async fn run_file(
    config: Config,
    cancel: CancellationToken,
    path: PathBuf,
    cache: bool,
    read_size: usize,
) -> Result<Vec<u8>, blkhash::Error> {
    tokio::task::spawn_blocking(move || {
        let file = File::open(&path)?;
        let mut engine = Engine::new(config)?;
        FileSource::new(file, cache)?
            .with_read_size(read_size)
            .run(&mut engine, &cancel)?;
        engine.finalize()
    })
    .await
    .expect("file driver thread panicked")
}

async fn run_extent_map(
    config: Config,
    cancel: CancellationToken,
    socket: PathBuf,
    queue_depth: usize,
    read_size: usize,
) -> Result<Vec<u8>, blkhash::Error> {
    let mut engine = Engine::new(config)?;
    let source = ExtentMapSource::connect_unix(socket, queue_depth)
        .await?
        .with_read_size(read_size);
    source.run(&mut engine, &cancel).await?;
    engine.finalize()
}

fn is_nbd_unix_url(path: &str) -> bool {
    path.starts_with("nbd+unix://")
}

fn socket_path_from_url(raw: &str) -> Result<PathBuf, RunError> {
    let url = url::Url::parse(raw).map_err(|err| {
        RunError::Fatal(blkhash::Error::ServerFailure {
            message: format!("invalid image-server URL: {err}"),
        })
    })?;

    url.query_pairs()
        .find(|(key, _)| key == "socket")
        .map(|(_, value)| PathBuf::from(value.into_owned()))
        .ok_or_else(|| {
            RunError::Fatal(blkhash::Error::ServerFailure {
                message: "nbd+unix URL is missing a socket= query parameter".to_string(),
            })
        })
}

