//! Larder CLI - migrations, seeding and account management.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! larder migrate
//!
//! # Load the demo catalog (or your own YAML file)
//! larder seed
//! larder seed --file catalog.yaml
//!
//! # Create an admin and give them a token
//! larder user create -e admin@example.com -n "Shop Admin" -r admin
//! larder token issue -e admin@example.com -l "ops laptop"
//! larder token revoke --id 3
//!
//! # Bill due subscriptions once
//! larder renewals run
//! ```
//!
//! # Environment Variables
//!
//! - `LARDER_DATABASE_URL` - `PostgreSQL` connection string
//! - `renewals run` additionally reads the server settings (`STRIPE_*`,
//!   `SMTP_*`, `PRICING_*`, `RENEWAL_*`, `LARDER_BASE_URL`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version, about = "Larder CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed the catalog with demo products
    Seed {
        /// YAML file with products and variants (defaults to the bundled demo catalog)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage API tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Subscription renewals
    Renewals {
        #[command(subcommand)]
        action: RenewalAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user
    Create {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Role (`customer` or `admin`)
        #[arg(short, long, default_value = "customer")]
        role: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a bearer token and print it once
    Issue {
        /// Email of the token's owner
        #[arg(short, long)]
        email: String,

        /// Label to recognise the token by
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Revoke a token
    Revoke {
        /// Token ID
        #[arg(long)]
        id: i32,
    },
}

#[derive(Subcommand)]
enum RenewalAction {
    /// Bill every due subscription once
    Run,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::catalog(file.as_deref()).await?,
        Commands::User { action } => match action {
            UserAction::Create { email, name, role } => {
                commands::users::create(&email, &name, &role).await?;
            }
        },
        Commands::Token { action } => match action {
            TokenAction::Issue { email, label } => {
                commands::users::issue_token(&email, label.as_deref()).await?;
            }
            TokenAction::Revoke { id } => commands::users::revoke_token(id).await?,
        },
        Commands::Renewals { action } => match action {
            RenewalAction::Run => commands::renewals::run().await?,
        },
    }
    Ok(())
}
