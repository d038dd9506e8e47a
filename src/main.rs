mod app;
mod cache;
mod catalog;
mod config;
mod db;
mod http;
mod notify;
mod offline;
mod push;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "catalog-sw")]
#[command(about = "Offline cache and action sync for the download catalog")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/catalog-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the static cache of the configured version
  Install,
  /// Activate the installed version and delete every other cache
  Activate,
  /// Delete this application's caches from other versions
  Clean,
  /// Answer a request through the cache
  Fetch {
    /// Absolute URL or path on the origin
    target: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Manage the offline action queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Replay queued actions now
  Sync,
  /// Show the newest entries of the activity timeline
  Activity {
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
  /// Add a download to the catalog
  Publish {
    name: String,
    #[arg(long, default_value = "")]
    category: String,
    #[arg(long, default_value = "")]
    url: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    version: Option<String>,
  },
  /// Show caches, cached catalog and pending actions
  Status,
  /// Follow connectivity and sync on reconnection until interrupted
  Watch {
    /// Push subscription JSON to forward
    #[arg(long)]
    subscription: Option<PathBuf>,
  },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// Queue an action for the next sync
  Add {
    /// download, search, upload, update, delete or any other type
    action_type: String,
    message: String,
  },
  /// List queued actions
  List,
  /// Remove every queued action
  Clear,
}

/// Log to stderr and, if a directory is configured, to a daily file.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(directory: Option<&PathBuf>) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_sw=info"));

  let (file_layer, guard) = match directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "catalog-sw.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = init_logging(config.logging.directory.as_ref());

  let app = app::App::new(config)?;

  match args.command {
    Command::Install => app.install().await?,
    Command::Activate => app.activate()?,
    Command::Clean => app.clean()?,
    Command::Fetch { target, navigate } => app.fetch(&target, navigate).await?,
    Command::Queue(QueueCommand::Add {
      action_type,
      message,
    }) => app.queue_add(&action_type, &message)?,
    Command::Queue(QueueCommand::List) => app.queue_list()?,
    Command::Queue(QueueCommand::Clear) => app.queue_clear()?,
    Command::Sync => app.sync().await?,
    Command::Activity { limit } => app.activity(limit).await?,
    Command::Publish {
      name,
      category,
      url,
      description,
      version,
    } => {
      app
        .publish(catalog::Download {
          id: String::new(),
          name,
          category,
          category_id: None,
          description,
          url,
          version,
          size: None,
          downloads: 0,
          image: None,
          date_added: None,
          featured: false,
        })
        .await?
    }
    Command::Status => app.status().await?,
    Command::Watch { subscription } => app.watch(subscription.as_deref()).await?,
  }

  Ok(())
}
