use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use recipe_offline::config::Config;
use recipe_offline::connectivity::ReachabilityProbe;
use recipe_offline::queue::OperationKind;
use recipe_offline::OfflineService;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recipe-offline")]
#[command(about = "Offline cache and sync queue for the recipe marketplace client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/recipe-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log filter used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Command,
}

/// How a one-shot command learns the current link.
#[derive(clap::Args, Debug)]
struct LinkArgs {
  /// Treat the device as online over this link type (e.g. wifi, cellular)
  #[arg(long, conflicts_with = "offline")]
  link: Option<String>,

  /// Treat the device as offline
  #[arg(long)]
  offline: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity policy and pending work
  Status(LinkArgs),
  /// Inspect or modify the data cache
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Inspect or modify the pending operation queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Replay pending operations now
  Sync(LinkArgs),
  /// Track connectivity and sync automatically until interrupted.
  ///
  /// Uses the configured probe, or reads `up <type>` / `down` lines from stdin.
  Watch,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Store a JSON payload
  Put {
    key: String,
    /// JSON payload
    payload: String,
    /// Lifetime in hours (default: cache.default_ttl_hours)
    #[arg(long)]
    ttl_hours: Option<f64>,
  },
  /// Print a payload if present and unexpired
  Get { key: String },
  /// Remove expired entries
  Evict,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// Queue an operation (create, update, delete, fetch)
  Add {
    kind: OperationKind,
    endpoint: String,
    /// JSON body
    #[arg(long)]
    body: Option<String>,
  },
  /// List queued operations, oldest first
  List,
  /// Drop a queued operation by id
  Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&args.log_level)?;

  let service = OfflineService::from_config(&config)?;
  service.init();

  match args.command {
    Command::Status(link) => {
      seed_connectivity(&service, &config, &link).await?;
      let status = serde_json::json!({
        "connectivity": service.monitor().current(),
        "policy": service.policy(),
        "exhausted": service.queue().exhausted(service.synchronizer().max_retries()).len(),
      });
      println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Command::Cache(cmd) => run_cache(&service, &config, cmd)?,
    Command::Queue(cmd) => run_queue(&service, cmd)?,
    Command::Sync(link) => {
      seed_connectivity(&service, &config, &link).await?;
      if service.is_offline() {
        println!("offline; {} operation(s) pending", service.pending_count());
        return Ok(());
      }
      let report = service.sync_now().await;
      println!(
        "attempted {}, succeeded {}, failed {}, exhausted {}, pending {}",
        report.attempted,
        report.succeeded,
        report.failed,
        report.skipped_exhausted,
        service.pending_count()
      );
    }
    Command::Watch => watch(service, &config).await?,
  }

  Ok(())
}

fn init_tracing(default_filter: &str) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("recipe-offline")
    .join("logs");

  let appender = tracing_appender::rolling::daily(log_dir, "recipe-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn build_probe(config: &Config) -> Result<Option<ReachabilityProbe>> {
  let Some(probe) = &config.probe else {
    return Ok(None);
  };

  let url = url::Url::parse(&probe.url).map_err(|e| eyre!("Invalid probe.url: {}", e))?;
  let probe = ReachabilityProbe::new(
    url,
    Duration::from_secs(probe.interval_secs),
    Duration::from_secs(config.api.request_timeout_secs),
    &probe.link_type,
  )?;
  Ok(Some(probe))
}

/// A one-shot process has seen no connectivity events yet; take the link
/// from the flags, else from a single probe, else stay offline.
async fn seed_connectivity(service: &OfflineService, config: &Config, link: &LinkArgs) -> Result<()> {
  if link.offline {
    service.handle_connectivity(false, "none");
  } else if let Some(link_type) = &link.link {
    service.handle_connectivity(true, link_type);
  } else if let Some(probe) = build_probe(config)? {
    probe.report(service.monitor()).await;
  }
  Ok(())
}

fn run_cache(service: &OfflineService, config: &Config, cmd: CacheCommand) -> Result<()> {
  match cmd {
    CacheCommand::Put {
      key,
      payload,
      ttl_hours,
    } => {
      let payload: Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      let ttl = ttl_hours.unwrap_or(config.cache.default_ttl_hours);
      service.cache().put(&key, payload, ttl)?;
    }
    CacheCommand::Get { key } => match service.cache().get(&key) {
      Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
      None => return Err(eyre!("No live cache entry for {}", key)),
    },
    CacheCommand::Evict => {
      let removed = service.cache().evict_expired()?;
      println!("removed {} expired entr{}", removed, if removed == 1 { "y" } else { "ies" });
    }
  }
  Ok(())
}

fn run_queue(service: &OfflineService, cmd: QueueCommand) -> Result<()> {
  match cmd {
    QueueCommand::Add {
      kind,
      endpoint,
      body,
    } => {
      let body = body
        .map(|b| serde_json::from_str::<Value>(&b))
        .transpose()
        .map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
      let op = service.queue().enqueue(kind, &endpoint, body)?;
      println!("{}", op.id);
    }
    QueueCommand::List => {
      println!("{}", serde_json::to_string_pretty(&service.queue().list())?);
    }
    QueueCommand::Remove { id } => service.queue().remove(&id)?,
  }
  Ok(())
}

async fn watch(service: OfflineService, config: &Config) -> Result<()> {
  let service = Arc::new(service);
  let cancel = CancellationToken::new();
  service.start();

  let event_task = match build_probe(config)? {
    Some(probe) => tokio::spawn(probe.run(service.monitor().clone(), cancel.clone())),
    None => {
      info!("No probe configured, reading connectivity events from stdin");
      let service = service.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { read_stdin_events(&service, cancel).await })
    }
  };

  let subscription_log = service.monitor().subscribe(|state| {
    eprintln!(
      "connected={} link={:?} ({})",
      state.connected, state.link_class, state.raw_type
    );
  });

  tokio::signal::ctrl_c().await?;
  info!("Interrupted, shutting down");

  cancel.cancel();
  let _ = event_task.await;
  subscription_log.unsubscribe();
  service.shutdown().await;
  Ok(())
}

/// Lines look like `up wifi`, `up cellular` or `down`.
async fn read_stdin_events(service: &OfflineService, cancel: CancellationToken) {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    let line = tokio::select! {
      _ = cancel.cancelled() => break,
      line = lines.next_line() => line,
    };

    let Ok(Some(line)) = line else {
      break;
    };
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
      (Some("up"), Some(link_type)) => {
        service.handle_connectivity(true, link_type);
      }
      (Some("up"), None) => {
        service.handle_connectivity(true, "unknown");
      }
      (Some("down"), _) => {
        service.handle_connectivity(false, "none");
      }
      (None, _) => {}
      (Some(other), _) => eprintln!("unrecognized event: {}", other),
    }
  }
}
