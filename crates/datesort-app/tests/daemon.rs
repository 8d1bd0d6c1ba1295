use std::fs;
use std::net::{SocketAddr, TcpListener as StdListener};
use std::time::Duration;

use datesort_app::{AppError, run_with};
use datesort_config::DatesortConfig;
use datesort_fsops::DiskSpaceGuard;
use datesort_pipeline::PipelineError;
use datesort_test_support::fixtures::{TempLayout, wait_until};
use datesort_test_support::probes::FixedSpaceProbe;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

type TestResult<T> = anyhow::Result<T>;

const PATIENCE: Duration = Duration::from_secs(10);

fn config(layout: &TempLayout) -> TestResult<DatesortConfig> {
    let mut config =
        DatesortConfig::with_paths(&layout.source, &layout.destination, &layout.quarantine)?;
    config.poll_interval = Duration::from_millis(25);
    config.retry_base_delay = Duration::from_millis(5);
    config.retry_max_delay = Duration::from_millis(20);
    config.shutdown_grace = Duration::from_secs(2);
    config.fatal_listing_failures = 2;
    Ok(config)
}

fn free_local_addr() -> TestResult<SocketAddr> {
    let listener = StdListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

async fn get(addr: SocketAddr, path: &str) -> TestResult<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_moves_files_and_stops_on_request() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.write_aged_source("2024_12_31-ledger.txt", b"ledger", Duration::from_secs(3_600))?;
    let target = layout.dated("2024/12/31", "2024_12_31-ledger.txt");

    let watched = target.clone();
    let report = run_with(
        config(&layout)?,
        DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
        move |shutdown| {
            tokio::spawn(async move {
                let _ = wait_until(PATIENCE, "file moved", || {
                    let watched = watched.clone();
                    async move { watched.is_file() }
                })
                .await;
                shutdown.request_shutdown();
            })
        },
    )
    .await?;

    assert_eq!(report.dropped_at_shutdown, 0);
    assert_eq!(fs::read(&target)?, b"ledger");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_listener_serves_while_running() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let addr = free_local_addr()?;
    let mut config = config(&layout)?;
    config.metrics_addr = Some(addr);

    let (responses_tx, responses_rx) = oneshot::channel();
    run_with(
        config,
        DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
        move |shutdown| {
            tokio::spawn(async move {
                let mut health = None;
                for _ in 0..100 {
                    if let Ok(response) = get(addr, "/health").await {
                        health = Some(response);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                let metrics = get(addr, "/metrics").await.ok();
                let _ = responses_tx.send((health, metrics));
                shutdown.request_shutdown();
            })
        },
    )
    .await?;

    let (health, metrics) = responses_rx.await?;
    let health = health.ok_or_else(|| anyhow::anyhow!("health endpoint never answered"))?;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("ok"));
    let metrics = metrics.ok_or_else(|| anyhow::anyhow!("metrics endpoint failed"))?;
    assert!(metrics.contains("datesort_files_processed_total"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn occupied_metrics_port_fails_before_processing() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.write_aged_source("2024_12_31-ledger.txt", b"ledger", Duration::from_secs(3_600))?;
    let held = StdListener::bind("127.0.0.1:0")?;
    let mut config = config(&layout)?;
    config.metrics_addr = Some(held.local_addr()?);

    let result = tokio::time::timeout(
        PATIENCE,
        run_with(
            config,
            DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
            |_shutdown| tokio::spawn(std::future::pending::<()>()),
        ),
    )
    .await?;

    assert!(matches!(
        result,
        Err(AppError::MetricsServer {
            operation: "metrics_server.bind",
            ..
        })
    ));
    assert!(layout.source.join("2024_12_31-ledger.txt").is_file());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_source_exits_with_fatal_error() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let config = config(&layout)?;
    fs::remove_dir_all(&layout.source)?;

    let result = tokio::time::timeout(
        PATIENCE,
        run_with(
            config,
            DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
            |_shutdown| tokio::spawn(std::future::pending::<()>()),
        ),
    )
    .await?;

    let Err(AppError::Pipeline { source, .. }) = result else {
        anyhow::bail!("expected a pipeline failure");
    };
    assert!(source.is_fatal());
    assert!(matches!(source, PipelineError::SourceUnavailable { .. }));
    Ok(())
}
