use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use trailers::config::Config;
use trailers::feed::Fetcher;
use trailers::import::{ImportError, Importer};
use trailers::storage::{Database, TableName, TrailerRecord};

#[derive(Parser, Debug)]
#[command(
    name = "trailers",
    about = "Import the latest movie trailers from an RSS feed"
)]
struct Args {
    /// Configuration file (missing file = defaults)
    #[arg(long, value_name = "FILE", default_value = "trailers.toml", global = true)]
    config: PathBuf,

    /// Feed to import, overrides `feed_url`
    #[arg(long, value_name = "URL", global = true)]
    feed_url: Option<String>,

    /// Destination table, overrides `table_name`
    #[arg(long, value_name = "NAME", global = true)]
    table: Option<String>,

    /// SQLite database file, overrides `database_path`
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    /// Cookie jar file, overrides `cookie_jar`
    #[arg(long, value_name = "FILE", global = true)]
    cookie_jar: Option<PathBuf>,

    /// Request timeout in seconds (0 = none), overrides `request_timeout_secs`
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Replace the table with the newest feed items (default)
    Import,
    /// Print every imported trailer
    List,
    /// Print one trailer by id
    Show {
        /// Trailer id
        id: i64,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(url) = &args.feed_url {
        config.feed_url = url.clone();
    }
    if let Some(table) = &args.table {
        config.table_name = table.clone();
    }
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    if let Some(jar) = &args.cookie_jar {
        config.cookie_jar = jar.clone();
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }

    config.validate()?;
    Ok(config)
}

async fn open_database(config: &Config) -> Result<Database, trailers::storage::DatabaseError> {
    let table = TableName::parse(&config.table_name)?;
    let path = config.database_path.to_string_lossy();
    Database::open(&path, table).await
}

async fn run_import(config: &Config) -> Result<ExitCode> {
    println!("Start...");

    let db = match open_database(config).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Cannot prepare DB table: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let fetcher =
        Fetcher::new(&config.fetcher_options()).context("Failed to create HTTP client")?;
    let importer = Importer::new(db, fetcher, config.window);

    // Ctrl-C stops the run before the next save
    let cancel = importer.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping before the next save");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    match importer.run(&config.feed_url).await {
        Ok(summary) => {
            println!(
                "Done. Imported {} of {} trailers ({} malformed items skipped).",
                summary.saved, summary.parsed, summary.skipped
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ ImportError::PrepareFailed(_)) => {
            eprintln!("Cannot prepare DB table: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e @ ImportError::Fetch(_)) => {
            eprintln!("Cannot load RSS: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("Import failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_trailer(trailer: &TrailerRecord) {
    println!("id:          {}", trailer.id);
    println!("title:       {}", trailer.title);
    println!("link:        {}", trailer.link);
    println!("published:   {}", trailer.pub_date.to_rfc2822());
    println!("image:       {}", trailer.image.as_deref().unwrap_or("-"));
    println!("description: {}", trailer.description);
}

async fn list(config: &Config) -> Result<ExitCode> {
    let db = open_database(config)
        .await
        .context("Failed to open database")?;
    let trailers = db.list_trailers().await.context("Failed to list trailers")?;

    if trailers.is_empty() {
        println!("No trailers imported.");
    }
    for trailer in &trailers {
        println!(
            "{}\t{}\t{}",
            trailer.id,
            trailer.pub_date.format("%Y-%m-%d %H:%M"),
            trailer.title
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn show(config: &Config, id: i64) -> Result<ExitCode> {
    let db = open_database(config)
        .await
        .context("Failed to open database")?;

    match db.get_trailer(id).await.context("Failed to load trailer")? {
        Some(trailer) => {
            print_trailer(&trailer);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("Trailer {} not found", id);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; RUST_LOG overrides the default level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Import) {
        Command::Import => run_import(&config).await,
        Command::List => list(&config).await,
        Command::Show { id } => show(&config, id).await,
    }
}
