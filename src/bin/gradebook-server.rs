use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use gradebook::{
    AccountStore, AuthService, DataStore, GradebookError, GradebookServer, MemoryStore,
    NaiveThreadPool, Permission, Result, ServerOptions, SharedQueueThreadPool, SledStore,
    ThreadPool, DEFAULT_PORT,
};

const DEFAULT_ADDR: &str = "0.0.0.0:8888";
const DEFAULT_DATA_DIR: &str = "gradebook-data";
const MEMORY_DATA_DIR: &str = ":memory:";

#[derive(Clone, Copy, ValueEnum)]
enum PoolKind {
    /// One thread per connection
    Naive,
    /// Fixed worker set fed from a queue
    SharedQueue,
}

#[derive(Parser)]
#[command(name = "gradebook-server", version, about = "A student gradebook server")]
struct Cli {
    /// Server listening address
    #[arg(long, default_value = DEFAULT_ADDR, value_name = "IP-PORT")]
    addr: SocketAddr,

    /// Data directory, or ":memory:" for a throwaway in-memory store
    #[arg(long, default_value = DEFAULT_DATA_DIR, value_name = "PATH")]
    data_dir: PathBuf,

    /// Connection handling model
    #[arg(long, value_enum, default_value = "naive")]
    pool: PoolKind,

    /// Worker threads for the shared-queue pool (defaults to CPU count)
    #[arg(long, value_name = "N")]
    threads: Option<u32>,

    /// Require username/password on every privileged request
    #[arg(long)]
    require_auth: bool,

    /// Create the "admin" account with this password if it does not exist
    #[arg(long, value_name = "PASSWORD")]
    bootstrap_admin: Option<String>,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    info!("gradebook-server {}", env!("CARGO_PKG_VERSION"));
    if cli.addr.port() != DEFAULT_PORT {
        info!("Using non-default port {}", cli.addr.port());
    }

    if cli.data_dir.as_os_str() == MEMORY_DATA_DIR {
        warn!("Using in-memory store; data is lost on exit");
        run_with_store(MemoryStore::new(), &cli)
    } else {
        info!("Data directory: {}", cli.data_dir.display());
        run_with_store(SledStore::open(&cli.data_dir)?, &cli)
    }
}

fn run_with_store<S: DataStore>(store: S, cli: &Cli) -> Result<()> {
    if let Some(password) = &cli.bootstrap_admin {
        bootstrap_admin(&store, password)?;
    }

    match cli.pool {
        PoolKind::Naive => serve(store, NaiveThreadPool::new(0)?, cli),
        PoolKind::SharedQueue => {
            let threads = cli.threads.unwrap_or_else(|| num_cpus::get() as u32);
            info!("Shared-queue pool with {} workers", threads);
            serve(store, SharedQueueThreadPool::new(threads)?, cli)
        }
    }
}

fn serve<S: DataStore, P: ThreadPool>(store: S, pool: P, cli: &Cli) -> Result<()> {
    let options = ServerOptions {
        require_auth: cli.require_auth,
    };
    if options.require_auth {
        info!("Credentials required on privileged requests");
    } else {
        warn!(
            "Anonymous requests may modify the roster; pass --require-auth to demand credentials"
        );
    }

    let server = GradebookServer::bind(store, pool, cli.addr, options)?;
    let handle = server.shutdown_handle()?;
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        handle.shutdown();
    })
    .map_err(|e| GradebookError::StringError(format!("signal handler: {e}")))?;

    server.run()
}

fn bootstrap_admin<S: DataStore>(store: &S, password: &str) -> Result<()> {
    if store.account("admin")?.is_some() {
        info!("Account \"admin\" already exists, not bootstrapping");
        return Ok(());
    }
    AuthService::new(store.clone()).create_account("admin", password, Permission::Admin)?;
    info!("Created account \"admin\"");
    Ok(())
}
