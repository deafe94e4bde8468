use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand, ValueEnum};

use gradebook::{
    hash_password, AccountStore, AuthService, GradebookError, Permission, Result, SledStore,
};

const DEFAULT_DATA_DIR: &str = "gradebook-data";

/// Offline account administration for a gradebook data directory.
#[derive(Parser)]
#[command(name = "gradebook-admin", version, about = "Manage gradebook accounts")]
struct Cli {
    /// Data directory of the server (must not be in use)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR, value_name = "PATH")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Admin,
    User,
}

impl From<Role> for Permission {
    fn from(role: Role) -> Permission {
        match role {
            Role::Admin => Permission::Admin,
            Role::User => Permission::User,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account, replacing any existing one with the same name
    AddAccount {
        /// Login name
        username: String,
        /// Password
        password: String,
        /// Access level
        #[arg(long, value_enum, default_value = "user")]
        role: Role,
    },
    /// Set a new password for an existing account
    Passwd {
        /// Login name
        username: String,
        /// New password
        password: String,
    },
    /// List accounts and their roles
    ListAccounts,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = SledStore::open(&cli.data_dir)?;

    match cli.command {
        Commands::AddAccount {
            username,
            password,
            role,
        } => {
            if username.is_empty() || password.is_empty() {
                return Err(GradebookError::StringError(
                    "username and password must not be empty".to_owned(),
                ));
            }
            let permission = Permission::from(role);
            AuthService::new(store).create_account(&username, &password, permission)?;
            println!("Added {} ({})", username, permission.as_role());
        }
        Commands::Passwd { username, password } => {
            if password.is_empty() {
                return Err(GradebookError::StringError(
                    "password must not be empty".to_owned(),
                ));
            }
            if !store.set_password_hash(&username, hash_password(&password))? {
                return Err(GradebookError::AccountNotFound(username));
            }
            println!("Password updated for {}", username);
        }
        Commands::ListAccounts => {
            for account in store.accounts()? {
                println!("{}\t{}", account.username, account.role);
            }
        }
    }
    Ok(())
}
