//! Bounded BOM upload dispatch.
//!
//! Each unit of work decodes its manifest, derives a project identity and
//! submits an auto-create upload. Concurrency is bounded by an admission gate
//! (a semaphore of `concurrency` permits): the issuing loop acquires a permit
//! before spawning a unit, the unit releases it when done, and acquiring every
//! permit once more afterwards acts as the all-done barrier.
//!
//! Completion waits for accepted uploads run on a separate [`TaskTracker`] and
//! never hold a gate permit, since polling outlives the submission by far.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::{BomUpload, ClientError, InventoryService, UploadToken};
use crate::manifest::{ManifestError, ManifestSet, ProjectIdentity};
use crate::poll::{self, PollError};

/// Errors that abort the whole dispatch. Unit numbers are 1-based.
#[derive(Debug, Error)]
pub enum DispatchError {
  /// A manifest could not be decoded. Always fatal.
  #[error("unit {unit}: {source}")]
  Manifest {
    unit: usize,
    #[source]
    source: ManifestError,
  },

  /// An upload was rejected and failures are not being skipped.
  #[error("failed to upload project {project} ({unit}/{total}): {source}")]
  Submission {
    unit: usize,
    total: usize,
    project: String,
    #[source]
    source: ClientError,
  },

  #[error("admission gate closed unexpectedly")]
  GateClosed,
}

/// Completion tracking settings shared by every unit of one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Tracking {
  pub poll_interval: Duration,
  /// Single deadline for every tracked wait of the run.
  pub deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
  /// Maximum simultaneously in-flight units.
  pub concurrency: NonZeroU32,
  /// Record failed uploads and keep going instead of aborting.
  pub skip_failed: bool,
  /// Pause after each unit except the last, while still holding its permit.
  pub delay: Duration,
  /// Wait for accepted uploads to finish processing.
  pub tracking: Option<Tracking>,
}

impl Default for DispatchOptions {
  fn default() -> Self {
    Self {
      concurrency: NonZeroU32::MIN,
      skip_failed: false,
      delay: Duration::ZERO,
      tracking: None,
    }
  }
}

/// Result of submitting one unit.
#[derive(Debug)]
pub enum SubmissionOutcome {
  Accepted(UploadToken),
  Failed(ClientError),
}

impl SubmissionOutcome {
  pub fn token(&self) -> Option<&UploadToken> {
    match self {
      SubmissionOutcome::Accepted(token) => Some(token),
      SubmissionOutcome::Failed(_) => None,
    }
  }
}

#[derive(Debug)]
pub struct UnitOutcome {
  /// 0-based unit index.
  pub unit: usize,
  pub project: ProjectIdentity,
  pub outcome: SubmissionOutcome,
}

/// Result of one tracked wait.
#[derive(Debug)]
pub struct TrackedCompletion {
  pub unit: usize,
  pub token: UploadToken,
  pub elapsed: Duration,
  pub result: Result<poll::Completion, PollError>,
}

/// Tallies of tracked waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CompletionSummary {
  pub processed: usize,
  pub timed_out: usize,
  pub failed: usize,
}

impl CompletionSummary {
  fn record(&mut self, result: &Result<poll::Completion, PollError>) {
    match result {
      Ok(_) => self.processed += 1,
      Err(e) if e.is_timeout() => self.timed_out += 1,
      Err(_) => self.failed += 1,
    }
  }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
  pub attempted: usize,
  pub failed: usize,
  /// Per-unit outcomes in unit order.
  pub outcomes: Vec<UnitOutcome>,
  /// Tracked waits in completion order; empty without tracking.
  pub completions: Vec<TrackedCompletion>,
  /// Time until every submission returned.
  pub elapsed: Duration,
  /// Time until every tracked wait finished, when tracking was requested.
  pub elapsed_with_completion: Option<Duration>,
}

impl DispatchReport {
  pub fn completion_summary(&self) -> CompletionSummary {
    let mut summary = CompletionSummary::default();
    for completion in &self.completions {
      summary.record(&completion.result);
    }
    summary
  }
}

enum Event {
  Submitted(UnitOutcome),
  Fatal(DispatchError),
  Tracked(TrackedCompletion),
}

#[derive(Default)]
struct Counters {
  attempted: AtomicUsize,
  failed: AtomicUsize,
  tracked: AtomicUsize,
}

/// State shared by the issuing loop and every unit task.
struct Shared {
  service: Arc<dyn InventoryService>,
  manifests: ManifestSet,
  total: usize,
  options: DispatchOptions,
  counters: Counters,
  tracker: TaskTracker,
  abort: CancellationToken,
  events: mpsc::UnboundedSender<Event>,
}

/// Upload `units` BOMs with at most `options.concurrency` in flight.
///
/// Units are issued in ascending order and may complete in any order. When a
/// unit fails fatally no further units are issued; units already in flight
/// run to completion and tracked waits are abandoned.
pub async fn dispatch(
  service: Arc<dyn InventoryService>,
  manifests: &ManifestSet,
  units: usize,
  options: &DispatchOptions,
) -> Result<DispatchReport, DispatchError> {
  let start = Instant::now();
  let capacity = options.concurrency.get();
  let gate = Arc::new(Semaphore::new(capacity as usize));
  let (events, mut inbox) = mpsc::unbounded_channel();

  let shared = Arc::new(Shared {
    service,
    manifests: manifests.clone(),
    total: units,
    options: options.clone(),
    counters: Counters::default(),
    tracker: TaskTracker::new(),
    abort: CancellationToken::new(),
    events,
  });

  info!(units, concurrency = capacity, "dispatching uploads");

  for unit in 0..units {
    let permit = tokio::select! {
      biased;
      _ = shared.abort.cancelled() => break,
      permit = gate.clone().acquire_owned() => permit.map_err(|_| DispatchError::GateClosed)?,
    };

    let shared = shared.clone();
    tokio::spawn(async move {
      let event = match run_unit(&shared, unit).await {
        Ok(outcome) => Event::Submitted(outcome),
        Err(e) => {
          error!(
            unit = unit + 1,
            total = shared.total,
            elapsed = ?start.elapsed(),
            error = %e,
            "aborting dispatch"
          );
          shared.abort.cancel();
          Event::Fatal(e)
        }
      };
      let _ = shared.events.send(event);
      drop(permit);
    });
  }

  // Every permit back in the gate means every unit task has finished.
  let _drained = gate
    .acquire_many(capacity)
    .await
    .map_err(|_| DispatchError::GateClosed)?;
  let elapsed = start.elapsed();
  shared.tracker.close();

  let mut report = DispatchReport {
    elapsed,
    ..Default::default()
  };
  let mut fatal = None;
  drain_events(&mut inbox, &mut report, &mut fatal);

  if let Some(e) = fatal {
    // Sibling tracked waits observe the abort and exit.
    shared.tracker.wait().await;
    return Err(e);
  }

  if options.tracking.is_some() {
    shared.tracker.wait().await;
    drain_events(&mut inbox, &mut report, &mut fatal);
    let tracked = shared.counters.tracked.load(Ordering::SeqCst);
    if report.completions.len() < tracked {
      error!(
        tracked,
        reported = report.completions.len(),
        "tracked waits ended without reporting a result"
      );
    }
    let total = start.elapsed();
    report.elapsed_with_completion = Some(total);
    info!(elapsed = ?total, "all done");
  }

  report.attempted = shared.counters.attempted.load(Ordering::SeqCst);
  report.failed = shared.counters.failed.load(Ordering::SeqCst);
  report.outcomes.sort_by_key(|o| o.unit);

  info!(
    attempted = report.attempted,
    failed = report.failed,
    elapsed = ?report.elapsed,
    "dispatch complete"
  );

  Ok(report)
}

fn drain_events(
  inbox: &mut mpsc::UnboundedReceiver<Event>,
  report: &mut DispatchReport,
  fatal: &mut Option<DispatchError>,
) {
  while let Ok(event) = inbox.try_recv() {
    match event {
      Event::Submitted(outcome) => report.outcomes.push(outcome),
      Event::Tracked(completion) => report.completions.push(completion),
      Event::Fatal(e) => {
        if fatal.is_none() {
          *fatal = Some(e);
        }
      }
    }
  }
}

async fn run_unit(shared: &Arc<Shared>, unit: usize) -> Result<UnitOutcome, DispatchError> {
  let total = shared.total;
  let manifest = shared.manifests.select(unit);
  debug!(unit, path = %manifest.path().display(), "reading bom");

  let hints = manifest
    .decode()
    .map_err(|source| DispatchError::Manifest { unit: unit + 1, source })?;
  let project = ProjectIdentity::derive(&hints);

  info!(unit = unit + 1, total, project = %project, "creating project");
  let attempted = shared.counters.attempted.fetch_add(1, Ordering::SeqCst) + 1;

  let upload = BomUpload {
    project_name: &project.name,
    project_version: &project.version,
    bom: manifest.body(),
    auto_create: true,
  };

  let outcome = match shared.service.upload_bom(upload).await {
    Ok(token) => {
      if let Some(tracking) = shared.options.tracking {
        track(shared, unit, token.clone(), tracking);
      }
      SubmissionOutcome::Accepted(token)
    }
    Err(source) if shared.options.skip_failed => {
      let failed = shared.counters.failed.fetch_add(1, Ordering::SeqCst) + 1;
      warn!(
        unit = unit + 1,
        total,
        project = %project,
        error = %source,
        "skipping failed upload ({failed}/{attempted} failed)"
      );
      SubmissionOutcome::Failed(source)
    }
    Err(source) => {
      return Err(DispatchError::Submission {
        unit: unit + 1,
        total,
        project: project.to_string(),
        source,
      });
    }
  };

  let delay = shared.options.delay;
  if !delay.is_zero() && unit + 1 < total {
    tokio::time::sleep(delay).await;
  }

  Ok(UnitOutcome {
    unit,
    project,
    outcome,
  })
}

/// Start a tracked wait for `token` outside the admission gate.
fn track(shared: &Arc<Shared>, unit: usize, token: UploadToken, tracking: Tracking) {
  let shared = shared.clone();
  shared.counters.tracked.fetch_add(1, Ordering::SeqCst);
  let tracker = shared.tracker.clone();
  tracker.spawn(async move {
    let start = Instant::now();
    let result = tokio::select! {
      _ = shared.abort.cancelled() => return,
      result = poll::await_completion(
        shared.service.as_ref(),
        &token,
        tracking.poll_interval,
        tracking.deadline,
      ) => result,
    };
    let elapsed = start.elapsed();

    match &result {
      Ok(_) => info!(token = %token, elapsed = ?elapsed, "token processed"),
      Err(e) => warn!(token = %token, elapsed = ?elapsed, error = %e, "waiting for token failed"),
    }

    let _ = shared.events.send(Event::Tracked(TrackedCompletion {
      unit,
      token,
      elapsed,
      result,
    }));
  });
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use proptest::prelude::*;
  use tracing_test::traced_test;

  use super::*;
  use crate::manifest::Manifest;
  use crate::testutil::FakeService;

  const BOM_A: &[u8] = br#"{"metadata":{"component":{"group":"acme","name":"a","version":"1.0"}}}"#;
  const BOM_B: &[u8] = br#"{"metadata":{"component":{"name":"b"}}}"#;

  fn manifests(bodies: &[&[u8]]) -> ManifestSet {
    let manifests = bodies
      .iter()
      .enumerate()
      .map(|(i, body)| Manifest::new(format!("{i}.cdx.json"), body.to_vec()))
      .collect();
    ManifestSet::new(manifests, Path::new(".")).unwrap()
  }

  fn options(concurrency: u32) -> DispatchOptions {
    DispatchOptions {
      concurrency: NonZeroU32::new(concurrency).unwrap(),
      ..Default::default()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn zero_units_is_a_no_op() {
    let service = Arc::new(FakeService::new());

    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 0, &options(4))
      .await
      .unwrap();

    assert_eq!(report.attempted, 0);
    assert!(report.outcomes.is_empty());
    assert_eq!(service.upload_calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn uploads_every_unit_with_auto_create() {
    let service = Arc::new(FakeService::new());

    let report = dispatch(service.clone(), &manifests(&[BOM_A, BOM_B]), 3, &options(1))
      .await
      .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.failed, 0);
    let units: Vec<_> = report.outcomes.iter().map(|o| o.unit).collect();
    assert_eq!(units, vec![0, 1, 2]);
    assert!(report.outcomes.iter().all(|o| o.outcome.token().is_some()));

    // Sequential issue with the offset selection: b, a, b.
    let uploads = service.uploads();
    let names: Vec<_> = uploads.iter().map(|u| u.project_name.as_str()).collect();
    assert_eq!(names, vec!["b", "acme_a", "b"]);
    assert!(uploads.iter().all(|u| u.auto_create));
    assert_eq!(uploads[0].bom, BOM_B);
    assert!(uploads[1].project_version.starts_with("1.0_"));
  }

  #[tokio::test(start_paused = true)]
  async fn concurrency_never_exceeds_the_gate() {
    for (concurrency, units) in [(1, 5), (3, 10), (4, 4), (8, 3)] {
      let service = Arc::new(FakeService::new().with_upload_latency(Duration::from_millis(50)));

      let report = dispatch(service.clone(), &manifests(&[BOM_A]), units, &options(concurrency))
        .await
        .unwrap();

      assert_eq!(report.attempted, units);
      assert_eq!(service.upload_calls(), units);
      assert!(service.peak_in_flight() <= concurrency as usize);
      assert_eq!(service.peak_in_flight(), units.min(concurrency as usize));
    }
  }

  #[tokio::test(start_paused = true)]
  async fn skip_failed_records_and_continues() {
    let service = Arc::new(FakeService::new().with_failing_uploads([1, 3]));
    let opts = DispatchOptions {
      skip_failed: true,
      ..options(2)
    };

    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 6, &opts).await.unwrap();

    assert_eq!(report.attempted, 6);
    assert_eq!(report.failed, 2);
    assert_eq!(report.outcomes.len(), 6);
    let failed = report
      .outcomes
      .iter()
      .filter(|o| matches!(o.outcome, SubmissionOutcome::Failed(_)))
      .count();
    assert_eq!(failed, 2);
    assert_eq!(service.uploads().len(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn failure_without_skip_aborts() {
    let service = Arc::new(
      FakeService::new()
        .with_upload_latency(Duration::from_millis(10))
        .with_failing_uploads([2]),
    );

    let err = dispatch(service.clone(), &manifests(&[BOM_A]), 10, &options(1))
      .await
      .unwrap_err();

    assert!(matches!(err, DispatchError::Submission { unit: 3, total: 10, .. }));
    assert_eq!(service.upload_calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  #[traced_test]
  async fn abort_is_logged_with_elapsed_time() {
    let service = Arc::new(
      FakeService::new()
        .with_upload_latency(Duration::from_millis(10))
        .with_failing_uploads([0]),
    );

    dispatch(service.clone(), &manifests(&[BOM_A]), 2, &options(1))
      .await
      .unwrap_err();

    assert!(logs_contain("aborting dispatch"));
    assert!(logs_contain("elapsed="));
  }

  #[tokio::test(start_paused = true)]
  async fn failure_without_skip_stops_issuing_beyond_in_flight() {
    let service = Arc::new(
      FakeService::new()
        .with_upload_latency(Duration::from_millis(10))
        .with_failing_uploads([0]),
    );

    let err = dispatch(service.clone(), &manifests(&[BOM_A]), 20, &options(3))
      .await
      .unwrap_err();

    assert!(matches!(err, DispatchError::Submission { .. }));
    // Siblings finishing in the same instant may free permits before the abort
    // is observed, but issuing never runs on to the remaining units.
    assert!(service.upload_calls() <= 5);
  }

  #[tokio::test(start_paused = true)]
  async fn malformed_manifest_is_fatal_even_when_skipping() {
    let service = Arc::new(FakeService::new());
    let opts = DispatchOptions {
      skip_failed: true,
      ..options(1)
    };

    // Unit 0 selects the second manifest, which is broken.
    let err = dispatch(service.clone(), &manifests(&[BOM_A, b"not json"]), 5, &opts)
      .await
      .unwrap_err();

    assert!(matches!(err, DispatchError::Manifest { unit: 1, .. }));
    assert_eq!(service.upload_calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn delay_throttles_between_units() {
    let service = Arc::new(FakeService::new());
    let opts = DispatchOptions {
      delay: Duration::from_secs(2),
      ..options(1)
    };

    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 3, &opts).await.unwrap();

    // No pause after the last unit.
    assert_eq!(report.elapsed, Duration::from_secs(4));
  }

  #[tokio::test(start_paused = true)]
  async fn tracking_waits_for_every_accepted_upload() {
    let service = Arc::new(
      FakeService::new()
        .with_processing_ticks(2)
        .with_failing_uploads([1]),
    );
    let opts = DispatchOptions {
      skip_failed: true,
      tracking: Some(Tracking {
        poll_interval: Duration::from_secs(1),
        deadline: Instant::now() + Duration::from_secs(60),
      }),
      ..options(2)
    };

    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 4, &opts).await.unwrap();

    // One tracked wait per accepted upload, none for the failed one.
    assert_eq!(report.completions.len(), 3);
    assert_eq!(
      report.completion_summary(),
      CompletionSummary {
        processed: 3,
        timed_out: 0,
        failed: 0,
      }
    );
    assert_eq!(service.total_status_calls(), 9);
    let total = report.elapsed_with_completion.unwrap();
    assert!(total >= report.elapsed + Duration::from_secs(3));
  }

  fn tracked(concurrency: u32, timeout: Duration) -> DispatchOptions {
    DispatchOptions {
      tracking: Some(Tracking {
        poll_interval: Duration::from_secs(1),
        deadline: Instant::now() + timeout,
      }),
      ..options(concurrency)
    }
  }

  #[tokio::test(start_paused = true)]
  async fn tracking_reports_timeouts_and_poll_errors() {
    let service = Arc::new(FakeService::new().with_processing_ticks(usize::MAX));
    let opts = tracked(2, Duration::from_secs(5));
    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 2, &opts).await.unwrap();
    assert_eq!(report.completion_summary().timed_out, 2);
    assert_eq!(report.elapsed_with_completion, Some(Duration::from_secs(5)));

    let service = Arc::new(FakeService::new().with_failing_status());
    let opts = tracked(2, Duration::from_secs(5));
    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 2, &opts).await.unwrap();
    assert_eq!(report.completion_summary().failed, 2);
    assert_eq!(report.attempted, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn tracked_waits_do_not_hold_gate_permits() {
    // With one permit, submissions would serialize behind the 30s polls if
    // tracked waits held the gate.
    let service = Arc::new(FakeService::new().with_processing_ticks(29));
    let opts = tracked(1, Duration::from_secs(600));

    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 5, &opts).await.unwrap();

    assert!(report.elapsed < Duration::from_secs(1));
    assert_eq!(report.elapsed_with_completion, Some(Duration::from_secs(30)));
    assert_eq!(report.completion_summary().processed, 5);
  }

  #[tokio::test(start_paused = true)]
  async fn zero_poll_interval_fails_every_tracked_wait() {
    let service = Arc::new(FakeService::new());
    let opts = DispatchOptions {
      tracking: Some(Tracking {
        poll_interval: Duration::ZERO,
        deadline: Instant::now() + Duration::from_secs(60),
      }),
      ..options(2)
    };

    let report = dispatch(service.clone(), &manifests(&[BOM_A]), 3, &opts).await.unwrap();

    assert_eq!(report.completions.len(), 3);
    assert_eq!(
      report.completion_summary(),
      CompletionSummary {
        processed: 0,
        timed_out: 0,
        failed: 3,
      }
    );
    assert!(
      report
        .completions
        .iter()
        .all(|c| matches!(c.result, Err(PollError::ZeroInterval { .. })))
    );
    assert_eq!(service.total_status_calls(), 0);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn gate_bounds_peak_in_flight(concurrency in 1u32..8, units in 0usize..24) {
      let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
      let service = Arc::new(FakeService::new().with_upload_latency(Duration::from_millis(5)));

      let report = rt
        .block_on(dispatch(service.clone(), &manifests(&[BOM_A, BOM_B]), units, &options(concurrency)))
        .unwrap();

      prop_assert_eq!(report.attempted, units);
      prop_assert_eq!(service.upload_calls(), units);
      prop_assert!(service.peak_in_flight() <= concurrency as usize);
    }
  }
}
