use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

use societyshare::config::Config;
use societyshare::market::{Market, Namespace};

#[derive(Parser, Debug)]
#[command(name = "societyshare")]
#[command(about = "Rental lifecycle and cache maintenance for SocietyShare")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/societyshare/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Complete expired rentals and warn renters whose rentals end soon
  Reconcile {
    /// Run one pass and exit instead of checking every interval
    #[arg(long)]
    once: bool,
  },
  /// Print a user's trust score
  TrustScore { user_id: String },
  /// List items marked rented with no active rental
  Audit,
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Drop cached entries
  Clear {
    /// Only this namespace (home_items, listings, bookings, offers,
    /// notifications, profile, society_name)
    #[arg(long)]
    namespace: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let market = Market::open(&config)?;

  match args.command {
    Command::Reconcile { once: true } => {
      let report = market.reconciler.expire_pass().await?;
      let warned = market.reconciler.expiring_soon_pass().await?;
      println!(
        "Completed {} expired rental(s), {} already completed, {} failed; warned {} renter(s)",
        report.completed.len(),
        report.skipped,
        report.failed,
        warned
      );
    }
    Command::Reconcile { once: false } => {
      let handle = market.reconciler.clone().start();
      println!(
        "Checking rentals every {}s, press Ctrl-C to stop",
        config.reconciler.interval().as_secs()
      );
      tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
      handle.stop().await;
    }
    Command::TrustScore { user_id } => {
      println!("{}", market.trust.calculate(&user_id).await);
    }
    Command::Audit => {
      let orphaned = market.reconciler.audit_orphaned_items().await?;
      if orphaned.is_empty() {
        println!("No orphaned items");
      }
      for item in orphaned {
        println!("{}\t{}\t{}", item.id, item.society_id, item.title);
      }
    }
    Command::Cache {
      command: CacheCommand::Clear { namespace },
    } => match namespace {
      Some(name) => {
        let namespace =
          Namespace::parse(&name).ok_or_else(|| eyre!("Unknown cache namespace: {}", name))?;
        market.cache.invalidate_prefix(&namespace);
        println!("Cleared {}", namespace.as_str());
      }
      None => {
        market.cache.clear();
        println!("Cleared cache");
      }
    },
  }

  Ok(())
}

/// Log to a daily file in the data directory, and to stderr with `--verbose`.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  use tracing_subscriber::{fmt, prelude::*, EnvFilter};

  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("societyshare")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "societyshare.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let file_layer = fmt::layer()
    .with_writer(non_blocking)
    .with_ansi(false)
    .with_target(false);
  let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .init();

  Ok(guard)
}
