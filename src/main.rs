use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use studio_directory::{
    load_csv, monthly_status_histogram, status_counts, AccountRow, DirectoryAggregator,
    DirectoryConfig, DirectorySnapshot, Identity, RecordRow, SessionContext, SqliteBackend,
    StudentEntry, StudentStatus,
};

#[derive(Parser)]
#[command(name = "studio-directory", about = "Studio student directory admin tool", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "studio.toml")]
    config: PathBuf,

    /// Acting user id (must be an admin for directory commands)
    #[arg(long, env = "STUDIO_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create the database tables
    Init,
    /// Import profiles from a CSV file
    ImportAccounts { csv: PathBuf },
    /// Import patient records from a CSV file
    ImportRecords { csv: PathBuf },
    /// Register a single patient record
    AddRecord {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Print the merged student directory
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Current number of students per status
    Counts,
    /// Monthly status histogram
    Histogram,
    /// Move a student to Ativo, Pausado or Inativo
    SetStatus { identity: String, status: String },
    /// Open or close self-evaluation for a student
    ToggleSelfEval { identity: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DirectoryConfig::load_or_default(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let backend = Arc::new(SqliteBackend::open(Path::new(&config.database.path))?);

    match cli.command {
        Commands::Init => {
            println!("✓ Database ready at {}", config.database.path);
        }
        Commands::ImportAccounts { csv } => {
            let rows: Vec<AccountRow> = load_csv(&csv)?;
            let count = backend.import_accounts(&rows)?;
            println!("✓ Imported {} profiles", count);
        }
        Commands::ImportRecords { csv } => {
            let rows: Vec<RecordRow> = load_csv(&csv)?;
            let count = backend.import_records(&rows)?;
            println!("✓ Imported {} patient records", count);
        }
        Commands::AddRecord { name, email } => {
            let aggregator = DirectoryAggregator::from_backend(backend.clone());
            let session = admin_session(&aggregator, cli.user.as_deref()).await?;
            let record = backend.register_record(name, email, &session.user_id)?;
            println!("✓ Registered record:{}", record.id);
        }
        Commands::List { json } => {
            let (_, _, snapshot) = load(&backend, cli.user.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_directory(&snapshot);
            }
        }
        Commands::Counts => {
            let (_, _, snapshot) = load(&backend, cli.user.as_deref()).await?;
            let counts = status_counts(&snapshot.entries);
            println!("Ativos:    {}", counts.active);
            println!("Pausados:  {}", counts.paused);
            println!("Inativos:  {}", counts.inactive);
            println!("Sem login: {}", counts.no_login);
        }
        Commands::Histogram => {
            let (_, _, snapshot) = load(&backend, cli.user.as_deref()).await?;
            println!("{:<8} {:>6} {:>8} {:>8}", "month", "ativo", "pausado", "inativo");
            for row in monthly_status_histogram(&snapshot.entries) {
                println!(
                    "{:<8} {:>6} {:>8} {:>8}",
                    row.month, row.active_count, row.paused_count, row.inactive_count
                );
            }
        }
        Commands::SetStatus { identity, status } => {
            let identity: Identity = identity.parse()?;
            let status: StudentStatus = status.parse()?;
            let (aggregator, session, snapshot) = load(&backend, cli.user.as_deref()).await?;
            let next = aggregator
                .apply_status_change(&session, &snapshot, &identity, status)
                .await?;
            if let Some(entry) = next.get(&identity) {
                println!("✓ Status atualizado: {}", describe(entry));
            }
        }
        Commands::ToggleSelfEval { identity } => {
            let identity: Identity = identity.parse()?;
            let (aggregator, session, snapshot) = load(&backend, cli.user.as_deref()).await?;
            let next = aggregator
                .toggle_self_eval(&session, &snapshot, &identity)
                .await?;
            if let Some(entry) = next.get(&identity) {
                println!("✓ Autoavaliação atualizada: {}", describe(entry));
            }
        }
    }

    Ok(())
}

async fn admin_session(
    aggregator: &DirectoryAggregator,
    user: Option<&str>,
) -> Result<SessionContext> {
    let user = user.context("--user (or STUDIO_USER) is required for this command")?;
    let session = SessionContext::resolve(aggregator.accounts(), user).await?;
    session.require_admin()?;
    Ok(session)
}

async fn load(
    backend: &Arc<SqliteBackend>,
    user: Option<&str>,
) -> Result<(DirectoryAggregator, SessionContext, DirectorySnapshot)> {
    let aggregator = DirectoryAggregator::from_backend(backend.clone());
    let session = admin_session(&aggregator, user).await?;
    let snapshot = aggregator.load(&session).await?;
    if let Some(warning) = snapshot.partial_failure() {
        eprintln!("⚠️  {}", warning);
    }
    Ok((aggregator, session, snapshot))
}

fn describe(entry: &StudentEntry) -> String {
    format!(
        "{} - {} [{}] autoavaliação: {}",
        if entry.name.is_empty() { "Sem nome" } else { entry.name.as_str() },
        entry.email.as_deref().unwrap_or("sem email"),
        entry.status,
        if entry.self_eval_enabled { "liberada" } else { "fechada" }
    )
}

fn print_directory(snapshot: &DirectorySnapshot) {
    println!("📇 {} students", snapshot.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for entry in &snapshot.entries {
        println!("{:<40} {}", entry.identity.to_string(), describe(entry));
    }
}
