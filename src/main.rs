//! `cellar`: capture installer side effects into layers and replay them.
//!
//! Every command prints JSON on stdout. Logs go to stderr, filtered through
//! `CELLAR_LOG` (default `cellar=info`).

mod error;

use crate::error::{ErrorKind, Result};
use cellar_config::Config;
use cellar_diff::Differ;
use cellar_layers::{Database, Layer, LayerField, Layers, Services, Wine, apply};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "CELLAR_LOG";
const DEFAULT_LOG: &str = "cellar=info,cellar_layers=info,warn";

#[derive(Parser, Debug)]
#[command(name = "cellar", version, about = "Capture, package and replay prefix layers", arg_required_else_help = true)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, short, global = true, env = "CELLAR_CONFIG")]
    config: Option<PathBuf>,
    /// Prefix to operate on; overrides the configuration.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bracket an installation with snapshots.
    #[command(subcommand)]
    Capture(Capture),
    /// Manage the layers of this prefix.
    #[command(subcommand)]
    Layers(LayersCommand),
    /// Manage the shared layer database.
    #[command(subcommand)]
    Db(DbCommand),
    /// Apply every active layer to the prefix.
    Apply,
    /// Print the merged registry patch of every active layer.
    Registry,
}

#[derive(Subcommand, Debug)]
enum Capture {
    /// Take the before snapshot and open a pending layer.
    Begin,
    /// Take the after snapshot and commit the pending layer.
    Commit,
    /// Discard the pending layer.
    Abort,
    /// Whether a capture is in flight.
    Status,
}

#[derive(Subcommand, Debug)]
enum LayersCommand {
    List,
    SetTitle { id: String, title: String },
    Enable { id: String },
    Disable { id: String },
    Sort { id: String, sort: i64 },
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    List,
    /// Copy a layer of this prefix into the database.
    Add { id: String },
    Remove { id: String },
    /// Copy a database entry into this prefix.
    Restore { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Some(prefix) = cli.prefix {
        config.prefix = Some(prefix);
    }
    let services = services(&config)?;

    match cli.command {
        Command::Capture(command) => capture(&services, command).await,
        Command::Layers(command) => layers(&services, command).await,
        Command::Db(command) => database(&services, command).await,
        Command::Apply => {
            let applied = apply::install(&services).await.or_raise(|| ErrorKind::Command("apply"))?;
            print(&json!({ "layers": applied.layers, "files": applied.files, "registry": applied.registry }))
        },
        Command::Registry => {
            let patch = apply::registry(&services).await.or_raise(|| ErrorKind::Command("registry"))?;
            std::io::stdout().write_all(patch.as_bytes()).or_raise(|| ErrorKind::Output)
        },
    }
}

fn services(config: &Config) -> Result<Services> {
    let prefix = config.prefix().or_raise(|| ErrorKind::Config)?;
    let layers_dir = config.layers_dir().or_raise(|| ErrorKind::Config)?;
    let database_dir = config.database_dir().or_raise(|| ErrorKind::Config)?;
    tracing::debug!(
        prefix = %prefix.display(),
        layers = %layers_dir.display(),
        database = %database_dir.display(),
        "Resolved locations"
    );

    let wine = Wine::new(&config.wine.binary, &prefix, config.games_dir.clone(), config.user.clone())
        .or_raise(|| ErrorKind::Setup)?;
    let services = Services::new(Arc::new(wine), &prefix, layers_dir, database_dir)
        .or_raise(|| ErrorKind::Setup)?
        .with_differ(Differ::discover(config.diff.command.clone(), config.diff.builtin))
        .with_compression(config.archive.compression);
    Ok(services)
}

async fn capture(services: &Services, command: Capture) -> Result<()> {
    let layers = Layers::new(services);
    match command {
        Capture::Begin => {
            let layer = layers.create().await.or_raise(|| ErrorKind::Command("capture begin"))?;
            print(&layer.to_object())
        },
        Capture::Commit => {
            let layer = layers.save().await.or_raise(|| ErrorKind::Command("capture commit"))?;
            print(&layer.map(|l| l.to_object()))
        },
        Capture::Abort => {
            let aborted = layers.abort().await.or_raise(|| ErrorKind::Command("capture abort"))?;
            print(&json!({ "aborted": aborted }))
        },
        Capture::Status => {
            let pending = layers.pending().await.or_raise(|| ErrorKind::Command("capture status"))?;
            print(&json!({ "pending": pending.as_ref().map(Layer::to_object) }))
        },
    }
}

async fn layers(services: &Services, command: LayersCommand) -> Result<()> {
    let layers = Layers::new(services);
    let backend = &*services.layers;
    let (id, field) = match command {
        LayersCommand::List => {
            let list = layers.list().await.or_raise(|| ErrorKind::Command("layers list"))?;
            return print(&list.iter().map(Layer::to_object).collect::<Vec<_>>());
        },
        LayersCommand::Remove { id } => {
            let layer = layers.get_by_id(&id).await.or_raise(|| ErrorKind::Command("layers remove"))?;
            layer.remove(backend).await.or_raise(|| ErrorKind::Command("layers remove"))?;
            return print(&layer.to_object());
        },
        LayersCommand::SetTitle { id, title } => (id, LayerField::Title(title)),
        LayersCommand::Enable { id } => (id, LayerField::Active(true)),
        LayersCommand::Disable { id } => (id, LayerField::Active(false)),
        LayersCommand::Sort { id, sort } => (id, LayerField::Sort(sort)),
    };
    let mut layer = layers.get_by_id(&id).await.or_raise(|| ErrorKind::Command("layers update"))?;
    layer.set(backend, field).await.or_raise(|| ErrorKind::Command("layers update"))?;
    print(&layer.to_object())
}

async fn database(services: &Services, command: DbCommand) -> Result<()> {
    let database = Database::new(services);
    match command {
        DbCommand::List => {
            let list = database.list().await.or_raise(|| ErrorKind::Command("db list"))?;
            print(&list.iter().map(Layer::to_object).collect::<Vec<_>>())
        },
        DbCommand::Add { id } => {
            let layer = Layers::new(services).get_by_id(&id).await.or_raise(|| ErrorKind::Command("db add"))?;
            let added = database.add_layer(&layer).await.or_raise(|| ErrorKind::Command("db add"))?;
            print(&json!({ "id": id, "added": added }))
        },
        DbCommand::Remove { id } => {
            let entry = database.get_by_id(&id).await.or_raise(|| ErrorKind::Command("db remove"))?;
            let removed = database.remove_layer(&entry).await.or_raise(|| ErrorKind::Command("db remove"))?;
            print(&json!({ "id": id, "removed": removed }))
        },
        DbCommand::Restore { id } => {
            let entry = database.get_by_id(&id).await.or_raise(|| ErrorKind::Command("db restore"))?;
            let restored = database.restore(&entry).await.or_raise(|| ErrorKind::Command("db restore"))?;
            print(&json!({ "id": id, "restored": restored }))
        },
    }
}

fn print(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).or_raise(|| ErrorKind::Output)?;
    writeln!(stdout).or_raise(|| ErrorKind::Output)
}
