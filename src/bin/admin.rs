//! Pantree Admin CLI
//!
//! Administration tool for the server database.
//!
//! # Usage
//!
//! ```bash
//! pantree-admin user add cook@example.com --name Cook --measure imperial
//! pantree-admin user list
//! pantree-admin otp issue cook@example.com
//! pantree-admin hash cook@example.com
//! ```
//!
//! Uses the same configuration as the server (`--config`, `PANTREE_*`).

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pantree::auth::{normalize_email, SystemClock};
use pantree::db::{init_db, SqliteIdentityStore};
use pantree::models::{MeasureType, ProfileDefaults};
use pantree::server::AppState;
use pantree::store::IdentityStore;
use pantree::Config;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "pantree-admin")]
#[command(version)]
#[command(about = "Pantree server administration tool")]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User(UserCommand),
    /// One-time passwords
    Otp(OtpCommand),
    /// Print the sync state hash of a user's pantry
    Hash {
        /// User's email address
        email: String,
    },
}

#[derive(Args)]
struct UserCommand {
    #[command(subcommand)]
    command: UserSubcommand,
}

#[derive(Subcommand)]
enum UserSubcommand {
    /// Add a new user
    Add {
        /// User's email address
        email: String,
        /// User's display name
        #[arg(long, short)]
        name: Option<String>,
        /// Preferred unit system (metric, imperial)
        #[arg(long, short, default_value = "metric")]
        measure: MeasureType,
    },
    /// List all users
    List,
}

#[derive(Args)]
struct OtpCommand {
    #[command(subcommand)]
    command: OtpSubcommand,
}

#[derive(Subcommand)]
enum OtpSubcommand {
    /// Issue a code and digest without sending mail
    Issue {
        /// User's email address
        email: String,
    },
}

// ============================================================================
// Commands
// ============================================================================

async fn add_user(
    store: &SqliteIdentityStore,
    email: String,
    name: Option<String>,
    measure: MeasureType,
) -> Result<(), Box<dyn std::error::Error>> {
    let email = normalize_email(&email)?;

    if store.find_by_email(&email).await?.is_some() {
        return Err(format!("User '{}' already exists", email).into());
    }

    let defaults = ProfileDefaults {
        name,
        pref_measure: measure,
    };
    let user = store.create(&email, &defaults).await?;

    println!("Added user: {}", user.email);
    println!("  ID: {}", user.id);
    println!("  Name: {}", user.name);
    println!("  Measure: {}", user.pref_measure);

    Ok(())
}

async fn list_users(store: &SqliteIdentityStore) -> Result<(), Box<dyn std::error::Error>> {
    let users = store.list().await?;

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }

    println!("{:<38} {:<32} {:<20} {:<8}", "ID", "EMAIL", "NAME", "MEASURE");
    println!("{}", "-".repeat(100));

    for user in &users {
        println!(
            "{:<38} {:<32} {:<20} {:<8}",
            user.id, user.email, user.name, user.pref_measure
        );
    }

    println!();
    println!("Total: {} user(s)", users.len());

    Ok(())
}

fn issue_otp(state: &AppState, email: &str) -> Result<(), Box<dyn std::error::Error>> {
    let issued = state.authenticator.issue(email)?;
    let expires = chrono::DateTime::from_timestamp_millis(issued.expires_at_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    println!("Email:   {}", issued.email);
    println!("Code:    {}", issued.code);
    println!("Hash:    {}", issued.digest.to_hex());
    println!("Expires: {}", expires);

    Ok(())
}

async fn print_hash(
    state: &AppState,
    store: &SqliteIdentityStore,
    email: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let email = normalize_email(email)?;
    let user = store
        .find_by_email(&email)
        .await?
        .ok_or_else(|| format!("User '{}' not found", email))?;

    let hash = state.sync.state_hash(user.id).await?;
    println!("{}", hash);

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config)?;
    let pool = init_db(&config.database_path).await?;
    let store = SqliteIdentityStore::new(pool.clone());
    let state = AppState::new(&config, pool, Arc::new(SystemClock))?;

    match cli.command {
        Commands::User(user_cmd) => match user_cmd.command {
            UserSubcommand::Add {
                email,
                name,
                measure,
            } => add_user(&store, email, name, measure).await,
            UserSubcommand::List => list_users(&store).await,
        },
        Commands::Otp(otp_cmd) => match otp_cmd.command {
            OtpSubcommand::Issue { email } => issue_otp(&state, &email),
        },
        Commands::Hash { email } => print_hash(&state, &store, &email).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
