// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use receipt_tracker::{
    auth::{self, RegisterRequest},
    db::{self, User},
    export_csv, open_database, query_transactions, telemetry, Args, Config, FilterParams, Sector,
};
use rusqlite::Connection;
use std::io::Write;

/// Receipt Tracker command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RECEIPTS_CONFIG", default_value = "receipts.yaml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Terminal dashboard for one user's transactions
    Ui {
        #[arg(long)]
        email: String,
    },
    /// Write a user's transactions as CSV to stdout
    Export {
        #[arg(long)]
        email: String,
        /// Inclusive start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Inclusive end date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        sector: Option<String>,
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Create an account without going through the API
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long, env = "RECEIPTS_NEW_PASSWORD")]
        password: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// List the sector labels
    Sectors,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_telemetry()?;

    match cli.command {
        Command::Sectors => {
            for sector in Sector::ALL {
                println!("{}", sector);
            }
            Ok(())
        }
        Command::Ui { email } => run_ui_mode(&open(&cli.config)?, &email),
        Command::Export {
            email,
            from,
            to,
            sector,
            vendor,
        } => run_export(
            &open(&cli.config)?,
            &email,
            FilterParams {
                from,
                to,
                sector,
                vendor,
            },
        ),
        Command::CreateUser {
            email,
            password,
            first_name,
            last_name,
        } => {
            let shared = db::shared(open(&cli.config)?);
            let user = auth::register(
                &shared,
                &RegisterRequest {
                    email,
                    password,
                    first_name,
                    last_name,
                },
            )?;
            println!("✓ Created user {} ({})", user.email, user.id);
            Ok(())
        }
    }
}

fn open(config_path: &str) -> Result<Connection> {
    let config = Config::load(&Args {
        config: config_path.to_string(),
        validate: false,
    })
    .context("Failed to load configuration")?;

    open_database(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path.display()))
}

fn find_user(conn: &Connection, email: &str) -> Result<User> {
    db::find_user_by_email(conn, email)?.with_context(|| format!("No user registered with email {}", email))
}

fn run_export(conn: &Connection, email: &str, params: FilterParams) -> Result<()> {
    let user = find_user(conn, email)?;
    let filter = params.into_filter()?;

    let transactions = query_transactions(conn, &user.id, &filter)?;
    let csv = export_csv(&transactions)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(csv.as_bytes())?;
    stdout.flush()?;

    eprintln!("✓ Exported {} transactions", transactions.len());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(conn: &Connection, email: &str) -> Result<()> {
    let user = find_user(conn, email)?;

    println!("📊 Loading transactions...");
    let transactions = query_transactions(conn, &user.id, &Default::default())?;
    println!("✓ Loaded {} transactions\n", transactions.len());

    let mut app = ui::App::new(&user.email, transactions);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_conn: &Connection, _email: &str) -> Result<()> {
    anyhow::bail!("TUI mode not available. Rebuild with: cargo build --features tui")
}
