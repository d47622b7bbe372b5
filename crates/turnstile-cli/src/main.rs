use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use turnstile_core::{EmbeddingStore, EnrollError};
use turnstile_store::{
    Config, EventFilter, LogEntry, NewIdentity, SqliteAccessLog, SqliteEmbeddings, StorageError,
};

#[zbus::proxy(
    interface = "io.turnstile.Access1",
    default_service = "io.turnstile.Access1",
    default_path = "/io/turnstile/Access1"
)]
trait Access {
    fn submit_frame(&self, embeddings: Vec<Vec<f64>>) -> zbus::Result<String>;
    fn reload(&self) -> zbus::Result<u32>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "turnstile", about = "Turnstile access control CLI")]
struct Cli {
    /// Database path (default: from the turnstile config, as the daemon resolves it)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Talk to the daemon on the system bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the identity directory
    Identity {
        #[command(subcommand)]
        command: IdentityCommand,
    },
    /// Store reference embeddings for an identity (replaces existing ones)
    Enroll {
        #[arg(short, long)]
        identity: i64,
        /// JSON file holding an array of embedding vectors
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Remove an identity's embeddings
    Remove {
        identity: i64,
    },
    /// Show access events, newest first
    Events {
        #[arg(short, long)]
        identity: Option<i64>,
        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    /// Show access statistics
    Stats,
    /// List identities with an entry and no exit on a day
    OpenEntries {
        /// Day to report (default: derived from the closing time)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// End-of-day cut-off, HH:MM (default: configured closing time)
        #[arg(long)]
        closing_time: Option<String>,
    },
    /// Show daemon status
    Status,
    /// Send one frame's embeddings to the daemon
    Submit {
        /// JSON file holding an array of embedding vectors, one per face
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// Register a new identity
    Add {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        age: u32,
    },
    /// List identities
    List {
        /// Include deactivated identities
        #[arg(long)]
        all: bool,
    },
    /// Show one identity
    Show { id: i64 },
    /// Deactivate an identity; later recognitions are denied
    Deactivate { id: i64 },
    /// Delete an identity, its embeddings and its access history
    Delete { id: i64 },
}

/// `--db` wins; otherwise the path the daemon resolves from the same config.
fn db_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.db.clone().unwrap_or_else(|| config.db_path.clone())
}

/// Delete an identity, its embeddings and its history. Nothing is touched
/// when the identity is not in the directory.
fn delete_identity(db: &Path, id: i64, dimension: usize) -> Result<()> {
    let mut log = SqliteAccessLog::open(db)?;
    if log.get_identity(id)?.is_none() {
        return Err(StorageError::IdentityNotFound(id).into());
    }
    let mut store = EmbeddingStore::open(SqliteEmbeddings::open(db)?, dimension)?;
    store.remove(id)?;
    log.delete_permanently(id)?;
    Ok(())
}

fn read_vectors(path: &Path) -> Result<Vec<Vec<f32>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a JSON array of vectors", path.display()))
}

async fn connect(system: bool) -> Result<AccessProxy<'static>> {
    let connection = if system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    AccessProxy::new(&connection)
        .await
        .context("turnstiled is not reachable on D-Bus")
}

async fn reload_daemon(system: bool) -> Result<u32> {
    let proxy = connect(system).await?;
    Ok(proxy.reload().await?)
}

/// Ask a running daemon to pick up gallery changes. The database is
/// already updated, so an absent daemon is not an error.
async fn notify_daemon(system: bool) {
    match reload_daemon(system).await {
        Ok(identities) => println!("Daemon reloaded ({identities} identities)"),
        Err(e) => tracing::debug!(error = %e, "daemon not notified"),
    }
}

fn print_entries(entries: &[LogEntry]) {
    if entries.is_empty() {
        println!("No events");
        return;
    }
    for e in entries {
        let who = match (&e.first_name, &e.last_name, e.identity) {
            (Some(first), Some(last), _) => format!("{first} {last}"),
            (_, _, Some(id)) => format!("#{id}"),
            _ => "unknown".to_string(),
        };
        let confidence = e
            .confidence
            .map(|c| format!("{:.1}%", c * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {:<9} {:<28} {}", e.recorded_at, e.kind, who, confidence);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let db = db_path(&cli, &config);
    let dim = config.engine.embedding_dim;
    let system = cli.system || config.system_bus;

    match cli.command {
        Commands::Identity { command } => {
            let log = SqliteAccessLog::open(&db)?;
            match command {
                IdentityCommand::Add {
                    first_name,
                    last_name,
                    role,
                    age,
                } => {
                    let id = log.add_identity(
                        &NewIdentity {
                            first_name,
                            last_name,
                            role,
                            age,
                        },
                        Local::now().naive_local(),
                    )?;
                    println!("Added identity {id}");
                }
                IdentityCommand::List { all } => {
                    let identities = log.list_identities(!all)?;
                    if identities.is_empty() {
                        println!("No identities registered");
                    }
                    for p in identities {
                        println!(
                            "{:>5}  {:<28} {:<20} photos={:<4}{}",
                            p.id,
                            p.display_name(),
                            p.role,
                            p.photo_count,
                            if p.active { "" } else { " (inactive)" }
                        );
                    }
                }
                IdentityCommand::Show { id } => match log.get_identity(id)? {
                    Some(p) => println!("{}", serde_json::to_string_pretty(&p)?),
                    None => bail!("identity {id} not found"),
                },
                IdentityCommand::Deactivate { id } => {
                    log.deactivate(id)?;
                    println!("Identity {id} deactivated");
                }
                IdentityCommand::Delete { id } => {
                    delete_identity(&db, id, dim)?;
                    println!("Identity {id} deleted");
                    notify_daemon(system).await;
                }
            }
        }
        Commands::Enroll { identity, file } => {
            let vectors = read_vectors(&file)?;
            let mut store = EmbeddingStore::open(SqliteEmbeddings::open(&db)?, dim)?;
            let kept = match store.upsert(identity, &vectors) {
                Ok(kept) => kept,
                Err(EnrollError::EmptyEmbeddingSet(_)) => {
                    bail!("none of the {} vectors in {} is usable", vectors.len(), file.display())
                }
                Err(e) => return Err(e.into()),
            };
            let log = SqliteAccessLog::open(&db)?;
            if log.get_identity(identity)?.is_some() {
                log.set_photo_count(identity, kept as u32)?;
            }
            println!("Enrolled identity {identity}: {kept} of {} embeddings kept", vectors.len());
            notify_daemon(system).await;
        }
        Commands::Remove { identity } => {
            let mut store = EmbeddingStore::open(SqliteEmbeddings::open(&db)?, dim)?;
            if store.remove(identity)? {
                println!("Removed embeddings for identity {identity}");
                notify_daemon(system).await;
            } else {
                println!("Identity {identity} had no embeddings");
            }
        }
        Commands::Events {
            identity,
            from,
            to,
            limit,
        } => {
            let log = SqliteAccessLog::open(&db)?;
            let entries = log.events(&EventFilter {
                identity,
                from,
                to,
                limit: Some(limit),
            })?;
            print_entries(&entries);
        }
        Commands::Stats => {
            let log = SqliteAccessLog::open(&db)?;
            let stats = log.statistics(Local::now().date_naive())?;
            println!("Active identities: {}", stats.active_identities);
            println!("Events today:      {}", stats.events_today);
            println!("Permitted:         {}", stats.permitted);
            println!("Denied:            {}", stats.denied);
            println!("Unknown:           {}", stats.unknown);
        }
        Commands::OpenEntries { date, closing_time } => {
            let closing_time = closing_time.unwrap_or(config.closing_time);
            let date = date
                .unwrap_or_else(|| turnstile_store::report_date(Local::now().naive_local(), &closing_time));
            let log = SqliteAccessLog::open(&db)?;
            let entries = log.open_entries(date)?;
            println!("Open entries for {date}:");
            print_entries(&entries);
        }
        Commands::Status => match connect(system).await {
            Ok(proxy) => println!("{}", proxy.status().await?),
            Err(e) => println!("turnstiled: not connected ({e:#})"),
        },
        Commands::Submit { file } => {
            let vectors = read_vectors(&file)?;
            let embeddings = vectors
                .into_iter()
                .map(|v| v.into_iter().map(f64::from).collect())
                .collect();
            let proxy = connect(system).await?;
            println!("{}", proxy.submit_frame(embeddings).await?);
        }
    }

    Ok(())
}
