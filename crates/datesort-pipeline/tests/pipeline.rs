use std::fs;
use std::sync::Arc;
use std::time::Duration;

use datesort_config::DatesortConfig;
use datesort_events::EventBus;
use datesort_fsops::{DiskSpaceGuard, SpaceProbe};
use datesort_pipeline::{Pipeline, PipelineError, PipelineReport, PipelineResult, ShutdownHandle};
use datesort_telemetry::Metrics;
use datesort_test_support::fixtures::{TempLayout, count_files, wait_until};
use datesort_test_support::probes::{FixedSpaceProbe, SlowSpaceProbe};
use tokio::task::JoinHandle;

type TestResult<T> = anyhow::Result<T>;

const HOUR: Duration = Duration::from_secs(3_600);
const PATIENCE: Duration = Duration::from_secs(10);

struct Running {
    shutdown: ShutdownHandle,
    metrics: Metrics,
    events: EventBus,
    task: JoinHandle<PipelineResult<PipelineReport>>,
}

impl Running {
    async fn stop(self) -> TestResult<PipelineReport> {
        self.shutdown.request_shutdown();
        Ok(tokio::time::timeout(PATIENCE, self.task).await???)
    }
}

fn config(layout: &TempLayout) -> TestResult<DatesortConfig> {
    let mut config = DatesortConfig::with_paths(
        &layout.source,
        &layout.destination,
        &layout.quarantine,
    )?;
    config.poll_interval = Duration::from_millis(25);
    config.max_workers = 2;
    config.max_retries = 3;
    config.retry_base_delay = Duration::from_millis(5);
    config.retry_max_delay = Duration::from_millis(20);
    config.shutdown_grace = Duration::from_secs(2);
    config.fatal_listing_failures = 2;
    Ok(config)
}

fn start(config: DatesortConfig, probe: Arc<dyn SpaceProbe>) -> TestResult<Running> {
    let metrics = Metrics::new(Duration::from_secs(60))?;
    let events = EventBus::with_capacity(256);
    let pipeline = Pipeline::new(
        config,
        DiskSpaceGuard::new(probe),
        metrics.clone(),
        events.clone(),
    )?;
    let shutdown = pipeline.shutdown_handle();
    Ok(Running {
        shutdown,
        metrics,
        events,
        task: tokio::spawn(pipeline.run()),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dated_file_lands_in_its_partition() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.write_aged_source("2025-03-01_report.csv", b"q1", HOUR)?;
    let running = start(config(&layout)?, FixedSpaceProbe::roomy())?;

    let target = layout.dated("2025/03/01", "2025-03-01_report.csv");
    wait_until(PATIENCE, "file moved", || {
        let target = target.clone();
        async move { target.is_file() }
    })
    .await?;

    let metrics = running.metrics.clone();
    let events = running.events.clone();
    let report = running.stop().await?;
    assert_eq!(report.dropped_at_shutdown, 0);
    assert_eq!(fs::read(&target)?, b"q1");
    assert_eq!(count_files(&layout.source), 0);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.success_total, 1);
    assert_eq!(snapshot.failure_total, 0);
    assert!(
        events
            .recent(256)
            .iter()
            .any(|envelope| envelope.event.kind() == "file_moved")
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unplaceable_file_ends_in_quarantine() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.block_destination()?;
    layout.write_aged_source("2025-03-01_report.csv", b"data", HOUR)?;
    let running = start(config(&layout)?, FixedSpaceProbe::roomy())?;

    let quarantined = layout.quarantine.join("2025-03-01_report.csv");
    wait_until(PATIENCE, "file quarantined", || {
        let quarantined = quarantined.clone();
        async move { quarantined.is_file() }
    })
    .await?;

    let metrics = running.metrics.clone();
    running.stop().await?;
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.quarantined_total, 1);
    assert_eq!(snapshot.retries_scheduled_total, 2);
    assert_eq!(snapshot.success_total, 0);
    assert_eq!(count_files(&layout.source), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_name_arriving_twice_keeps_both_copies() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let running = start(config(&layout)?, FixedSpaceProbe::roomy())?;
    let destination = layout.destination.clone();

    layout.write_aged_source("2025-03-01_report.csv", b"first", HOUR)?;
    wait_until(PATIENCE, "first copy placed", || {
        let destination = destination.clone();
        async move { count_files(&destination) == 1 }
    })
    .await?;

    layout.write_aged_source("2025-03-01_report.csv", b"second", HOUR)?;
    wait_until(PATIENCE, "second copy placed", || {
        let destination = destination.clone();
        async move { count_files(&destination) == 2 }
    })
    .await?;

    running.stop().await?;
    let mut contents: Vec<Vec<u8>> = fs::read_dir(layout.destination.join("2025/03/01"))?
        .map(|entry| Ok(fs::read(entry?.path())?))
        .collect::<TestResult<_>>()?;
    contents.sort();
    assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn low_disk_space_pauses_until_space_returns() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let source = layout.write_aged_source("2025-03-01_report.csv", b"data", HOUR)?;
    let probe = FixedSpaceProbe::nearly_full();
    let running = start(config(&layout)?, probe.clone())?;

    let metrics = running.metrics.clone();
    wait_until(PATIENCE, "two skipped cycles", || {
        let metrics = metrics.clone();
        async move { metrics.snapshot().admission_skips_total >= 2 }
    })
    .await?;
    assert!(source.is_file());
    assert_eq!(metrics.snapshot().processed_total, 0);

    probe.set_free_bytes(900);
    let target = layout.dated("2025/03/01", "2025-03-01_report.csv");
    wait_until(PATIENCE, "file moved after space returned", || {
        let target = target.clone();
        async move { target.is_file() }
    })
    .await?;

    running.stop().await?;
    assert_eq!(metrics.snapshot().success_total, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_file_waits_for_a_stable_listing() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let mut config = config(&layout)?;
    config.poll_interval = Duration::from_millis(300);
    let running = start(config, FixedSpaceProbe::roomy())?;

    let metrics = running.metrics.clone();
    wait_until(PATIENCE, "first cycle", || {
        let events = running.events.clone();
        async move { events.last_event_id().is_some() }
    })
    .await?;
    let source = layout.write_source("2025-03-01_report.csv", b"data")?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(source.is_file());
    assert_eq!(metrics.snapshot().processed_total, 0);

    let target = layout.dated("2025/03/01", "2025-03-01_report.csv");
    wait_until(PATIENCE, "stable file moved", || {
        let target = target.clone();
        async move { target.is_file() }
    })
    .await?;
    running.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_source_is_fatal() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let config = config(&layout)?;
    fs::remove_dir_all(&layout.source)?;
    let running = start(config, FixedSpaceProbe::roomy())?;

    let result = tokio::time::timeout(PATIENCE, running.task).await??;
    let Err(err) = result else {
        anyhow::bail!("pipeline should stop when the source disappears");
    };
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        PipelineError::SourceUnavailable { failures: 2, .. }
    ));
    assert!(
        running
            .events
            .recent(256)
            .iter()
            .any(|envelope| envelope.event.kind() == "poller_fatal")
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_before_first_cycle_is_clean() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.write_aged_source("2025-03-01_report.csv", b"data", HOUR)?;
    let pipeline = Pipeline::new(
        config(&layout)?,
        DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
        Metrics::new(Duration::from_secs(60))?,
        EventBus::with_capacity(16),
    )?;
    pipeline.shutdown_handle().request_shutdown();

    let report = tokio::time::timeout(PATIENCE, pipeline.run()).await??;
    assert_eq!(report.dropped_at_shutdown, 0);
    assert_eq!(count_files(&layout.source), 1);
    assert_eq!(count_files(&layout.destination), 0);
    Ok(())
}

#[test]
fn zero_poll_interval_is_rejected_at_construction() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let mut config = config(&layout)?;
    config.poll_interval = Duration::ZERO;
    let result = Pipeline::new(
        config,
        DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
        Metrics::new(Duration::from_secs(60))?,
        EventBus::with_capacity(16),
    );
    assert!(matches!(result, Err(PipelineError::Config { .. })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_grace_period_drops_queued_items() -> TestResult<()> {
    let layout = TempLayout::new()?;
    for day in 1..=6 {
        layout.write_aged_source(&format!("2025-04-0{day}.log"), b"entry", HOUR)?;
    }
    let mut config = config(&layout)?;
    config.max_workers = 1;
    config.shutdown_grace = Duration::from_millis(50);
    let running = start(config, SlowSpaceProbe::roomy(Duration::from_millis(150)))?;

    let destination = layout.destination.clone();
    wait_until(PATIENCE, "first file moved", || {
        let destination = destination.clone();
        async move { count_files(&destination) >= 1 }
    })
    .await?;
    let metrics = running.metrics.clone();
    let report = running.stop().await?;

    let left_in_source = count_files(&layout.source);
    let moved = count_files(&layout.destination);
    assert!(left_in_source >= 1, "grace period should cut the drain short");
    assert_eq!(moved + left_in_source, 6);
    assert_eq!(report.dropped_at_shutdown, u64::try_from(left_in_source)?);
    assert_eq!(metrics.snapshot().dropped_at_shutdown_total, report.dropped_at_shutdown);
    assert_eq!(metrics.snapshot().queue_depth, 0);
    Ok(())
}
