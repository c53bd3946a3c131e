//! Implementation of the seeding run.
//!
//! Loads the BOM directory, waits for the service to come up, authenticates,
//! then converges the project count and prints a summary.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use dtseed_lib::bootstrap;
use dtseed_lib::client::{DependencyTrackClient, InventoryService};
use dtseed_lib::consts::{
  DEFAULT_ADMIN_USER, DEFAULT_DELAY, DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT, DEFAULT_WAIT_TIMEOUT,
};
use dtseed_lib::manifest::{self, ManifestSet};
use dtseed_lib::readiness::ReadinessProbe;
use dtseed_lib::reconcile::{self, ReconcileOptions, ReconcileReport, WaitOptions};

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct SeedArgs {
  /// Base URL of the Dependency-Track API server
  #[arg(long, env = "DTSEED_URL")]
  pub url: String,

  /// Admin password, set on first launch
  #[arg(long = "pass", env = "DTSEED_PASSWORD", hide_env_values = true)]
  pub password: String,

  /// Admin user name
  #[arg(long, env = "DTSEED_USER", default_value = DEFAULT_ADMIN_USER)]
  pub user: String,

  /// Number of projects the instance should hold
  #[arg(long, env = "DTSEED_COUNT", default_value_t = 10)]
  pub count: usize,

  /// Directory containing *.cdx.json BOMs
  #[arg(long, env = "DTSEED_BOMS")]
  pub boms: PathBuf,

  /// Maximum number of uploads in flight
  #[arg(long, env = "DTSEED_CONCURRENCY", default_value_t = NonZeroU32::MIN)]
  pub concurrency: NonZeroU32,

  /// Keep going when an upload fails
  #[arg(long, env = "DTSEED_SKIP_FAILED")]
  pub skip_failed: bool,

  /// Wait for every uploaded BOM to finish processing
  #[arg(long, env = "DTSEED_WAIT")]
  pub wait: bool,

  /// Period between processing status queries
  #[arg(
    long,
    env = "DTSEED_POLL_INTERVAL",
    default_value_t = humantime::Duration::from(DEFAULT_POLL_INTERVAL),
    value_parser = non_zero_duration
  )]
  pub poll_interval: humantime::Duration,

  /// Deadline for all processing waits, counted from the first upload
  #[arg(long, env = "DTSEED_WAIT_TIMEOUT", default_value_t = humantime::Duration::from(DEFAULT_WAIT_TIMEOUT))]
  pub wait_timeout: humantime::Duration,

  /// Pause after each upload
  #[arg(long, env = "DTSEED_DELAY", default_value_t = humantime::Duration::from(DEFAULT_DELAY))]
  pub delay: humantime::Duration,

  /// How long to wait for the service to come up
  #[arg(long, env = "DTSEED_READY_TIMEOUT", default_value_t = humantime::Duration::from(DEFAULT_READY_TIMEOUT))]
  pub ready_timeout: humantime::Duration,
}

fn non_zero_duration(value: &str) -> Result<humantime::Duration, String> {
  let duration: humantime::Duration = value.parse().map_err(|e: humantime::DurationError| e.to_string())?;
  if duration.is_zero() {
    return Err("must be greater than zero".to_string());
  }
  Ok(duration)
}

impl SeedArgs {
  fn reconcile_options(&self) -> ReconcileOptions {
    ReconcileOptions {
      target: self.count,
      concurrency: self.concurrency,
      skip_failed: self.skip_failed,
      delay: *self.delay,
      wait: self.wait.then(|| WaitOptions {
        poll_interval: *self.poll_interval,
        timeout: *self.wait_timeout,
      }),
    }
  }
}

pub fn cmd_seed(args: &SeedArgs, format: OutputFormat) -> Result<()> {
  let manifests = manifest::load_all(&args.boms).context("Failed to load BOMs")?;
  info!(count = manifests.len(), dir = %args.boms.display(), "loaded boms");

  let client = DependencyTrackClient::new(&args.url).context("Invalid service URL")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(seed(client, &manifests, args))?;

  output::print_report(&report, format)
}

async fn seed(client: DependencyTrackClient, manifests: &ManifestSet, args: &SeedArgs) -> Result<ReconcileReport> {
  let probe = ReadinessProbe::new(client.authority()?);
  info!(addr = probe.addr(), timeout = %args.ready_timeout, "waiting for service");
  probe
    .wait_until_ready(&client, *args.ready_timeout)
    .await
    .context("Service did not become ready")?;

  let client = bootstrap::authenticate(&client, &args.user, &args.password)
    .await
    .context("Authentication failed")?;
  let service: Arc<dyn InventoryService> = Arc::new(client);

  reconcile::reconcile(service, manifests, &args.reconcile_options())
    .await
    .context("Seeding failed")
}
