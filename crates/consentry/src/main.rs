use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use consentry::{ConsentEngine, EngineConfig, RootError};
use consentry_core::{ServiceId, StudentId};

/// Consentry: consent governance and access control for student data.
#[derive(Parser, Debug)]
#[command(name = "consentry", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and write a default configuration
    Init {
        /// Path for the SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Run the grant expiry sweep once and report the count
    Sweep,

    /// Show recent audit log entries for a student
    Audit {
        /// Student whose audit trail to show
        #[arg(long)]
        student: String,

        /// Maximum number of entries to display
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// List the registered services
    Services,

    /// Register a new service
    RegisterService {
        /// Display name for the service
        #[arg(long)]
        name: String,

        /// Risk category: low, medium, high, or critical
        #[arg(long, default_value = "medium")]
        risk: String,

        /// Optional description
        #[arg(long)]
        description: Option<String>,
    },

    /// Enable or disable a registered service
    SetServiceActive {
        /// Service id
        #[arg(long)]
        service: String,

        /// New activation state
        #[arg(long)]
        active: bool,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("consentry=debug,consentry_consent=debug,consentry_audit=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("consentry=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, RootError> {
    match path {
        Some(p) => EngineConfig::load(p),
        None => EngineConfig::load(&EngineConfig::default_config_path()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RootError> {
    match cli.command {
        Commands::Init { db_path } => cmd_init(cli.config.as_ref(), db_path),
        Commands::Sweep => cmd_sweep(cli.config.as_ref()),
        Commands::Audit { student, limit } => cmd_audit(cli.config.as_ref(), &student, limit),
        Commands::Services => cmd_services(cli.config.as_ref()),
        Commands::RegisterService {
            name,
            risk,
            description,
        } => cmd_register_service(cli.config.as_ref(), &name, &risk, description),
        Commands::SetServiceActive { service, active } => {
            cmd_set_service_active(cli.config.as_ref(), &service, active)
        }
    }
}

fn open_engine(config_path: Option<&PathBuf>) -> Result<(ConsentEngine, EngineConfig), RootError> {
    let config = load_config(config_path)?;
    let engine = ConsentEngine::open(&config)?;
    Ok((engine, config))
}

fn cmd_init(config_path: Option<&PathBuf>, db_path: Option<PathBuf>) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if let Some(db) = db_path {
        config.db_path = db;
    }

    info!("initializing consentry");
    let engine = ConsentEngine::open(&config)?;
    engine.shutdown()?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(EngineConfig::default_config_path);
    config.save(&save_path)?;

    println!("Consentry initialized.");
    println!("  Database: {}", config.db_path.display());
    println!("  Config:   {}", save_path.display());
    Ok(())
}

fn cmd_sweep(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let (engine, _) = open_engine(config_path)?;
    let flipped = engine.process_expired()?;
    engine.shutdown()?;
    println!("Expired {} grant(s).", flipped);
    Ok(())
}

fn cmd_audit(config_path: Option<&PathBuf>, student: &str, limit: u32) -> Result<(), RootError> {
    let (engine, _) = open_engine(config_path)?;
    let entries = engine.list_audit_logs(&StudentId::new(student), limit)?;
    engine.shutdown()?;

    println!("Audit log for {} ({} entries):", student, entries.len());
    if entries.is_empty() {
        println!("  (no entries)");
    }
    for entry in entries {
        println!(
            "  {}  {:<26}  service={}  {}",
            entry.timestamp.to_rfc3339(),
            entry.action.to_string(),
            entry
                .service_id
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or("-"),
            entry.metadata
        );
    }
    Ok(())
}

fn cmd_services(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let (engine, _) = open_engine(config_path)?;
    let services = engine.list_services()?;
    engine.shutdown()?;

    println!("Registered services ({}):", services.len());
    for service in services {
        println!(
            "  {}  {:<30}  {:<8}  {}",
            service.id,
            service.name,
            service.risk_category.to_string(),
            if service.active { "active" } else { "inactive" }
        );
    }
    Ok(())
}

fn cmd_register_service(
    config_path: Option<&PathBuf>,
    name: &str,
    risk: &str,
    description: Option<String>,
) -> Result<(), RootError> {
    let risk_category = risk
        .parse()
        .map_err(|e: String| RootError::Config(e))?;

    let (engine, _) = open_engine(config_path)?;
    let service = engine.register_service(name, description, risk_category)?;
    engine.shutdown()?;

    println!("Registered service {} ({}).", service.name, service.id);
    Ok(())
}

fn cmd_set_service_active(
    config_path: Option<&PathBuf>,
    service: &str,
    active: bool,
) -> Result<(), RootError> {
    let (engine, _) = open_engine(config_path)?;
    engine.set_service_active(&ServiceId::new(service), active)?;
    engine.shutdown()?;

    println!(
        "Service {} is now {}.",
        service,
        if active { "active" } else { "inactive" }
    );
    Ok(())
}
