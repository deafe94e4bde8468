use std::io;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use gradebook::{ClientConfig, ClientSession, GradebookClient, Result, SessionOutcome};

#[derive(Parser)]
#[command(name = "gradebook-client", version, about = "A student gradebook client")]
struct Cli {
    /// Config file with BACKEND_IP and BACKEND_PORT (defaults to .env next to the binary)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server host, overriding the config file
    #[arg(long)]
    host: Option<String>,

    /// Server port, overriding the config file
    #[arg(long)]
    port: Option<u16>,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(SessionOutcome::LockedOut) => exit(2),
        Ok(_) => {}
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<SessionOutcome> {
    let path = cli.config.unwrap_or_else(ClientConfig::default_path);
    let mut config = ClientConfig::load(path)?;
    if let Some(host) = cli.host {
        config.backend_ip = host;
    }
    if let Some(port) = cli.port {
        config.backend_port = port;
    }

    println!(
        "Connecting to {}:{}...",
        config.backend_ip, config.backend_port
    );
    let client = GradebookClient::connect_with_retry(&config.backend_ip, config.backend_port)?;
    println!("Connected.");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut session = ClientSession::new(client, stdin.lock(), stdout.lock());
    session.run()
}
