use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Datelike, Local};
use datesort_fsops::{
    DiskSpaceGuard, FileMover, FsOpsError, MoveRequest, MoverSettings, ProcessingOutcome,
    RetryPolicy,
};
use datesort_test_support::fixtures::{TempLayout, count_files, set_mtime};
use datesort_test_support::probes::{FailingSpaceProbe, FixedSpaceProbe};

type TestResult<T> = anyhow::Result<T>;

fn mover(layout: &TempLayout, guard: DiskSpaceGuard) -> TestResult<FileMover> {
    Ok(FileMover::new(
        MoverSettings {
            destination_root: layout.destination.clone(),
            quarantine_root: layout.quarantine.clone(),
            min_free_ratio: 0.10,
            retry: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20)),
        },
        guard,
    )?)
}

fn request(source: &std::path::Path, attempt: u32, worker_id: usize) -> MoveRequest<'_> {
    MoveRequest {
        source,
        attempt,
        unclassified_cycles: 0,
        worker_id,
    }
}

#[test]
fn undated_file_is_filed_by_mtime() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let mover = mover(&layout, DiskSpaceGuard::new(FixedSpaceProbe::roomy()))?;
    let source = layout.write_source("notes.txt", b"n")?;
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    set_mtime(&source, mtime)?;

    let placed = mover.attempt_move(&source, 0)?;
    let local: DateTime<Local> = mtime.into();
    let expected = layout.destination.join(format!(
        "{:04}/{:02}/{:02}/notes.txt",
        local.year(),
        local.month(),
        local.day()
    ));
    assert_eq!(placed, expected);
    Ok(())
}

#[test]
fn reorganizing_twice_never_overwrites() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let mover = mover(&layout, DiskSpaceGuard::new(FixedSpaceProbe::roomy()))?;

    let first = layout.write_source("2025-03-01_report.csv", b"v1")?;
    let first_placed = mover.attempt_move(&first, 0)?;

    let second = layout.write_source("2025-03-01_report.csv", b"v2")?;
    let second_placed = mover.attempt_move(&second, 0)?;

    assert_ne!(first_placed, second_placed);
    assert_eq!(fs::read(&first_placed)?, b"v1");
    assert_eq!(fs::read(&second_placed)?, b"v2");
    assert_eq!(count_files(&layout.destination), 2);
    assert_eq!(count_files(&layout.source), 0);
    Ok(())
}

#[test]
fn concurrent_workers_claim_distinct_names() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let mover = Arc::new(mover(
        &layout,
        DiskSpaceGuard::new(FixedSpaceProbe::roomy()),
    )?);

    let mut sources = Vec::new();
    for worker in 0..8 {
        let dir = layout.source.join(format!("w{worker}"));
        fs::create_dir_all(&dir)?;
        let path = dir.join("2025-03-01.log");
        fs::write(&path, format!("worker {worker}"))?;
        sources.push(path);
    }

    let handles: Vec<_> = sources
        .into_iter()
        .enumerate()
        .map(|(worker, source)| {
            let mover = Arc::clone(&mover);
            thread::spawn(move || mover.attempt_move(&source, worker))
        })
        .collect();

    let mut placed = HashSet::new();
    for handle in handles {
        let path = handle
            .join()
            .map_err(|_| anyhow::anyhow!("mover thread panicked"))??;
        placed.insert(path);
    }

    assert_eq!(placed.len(), 8);
    let contents: HashSet<_> = placed
        .iter()
        .map(fs::read_to_string)
        .collect::<Result<_, _>>()?;
    assert_eq!(contents.len(), 8);
    Ok(())
}

#[test]
fn blocked_destination_fails_until_quarantine() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.block_destination()?;
    let mover = mover(&layout, DiskSpaceGuard::new(FixedSpaceProbe::roomy()))?;
    let source = layout.write_source("2025-03-01_report.csv", b"data")?;

    for attempt in 0..2 {
        let outcome = mover.process(request(&source, attempt, 0));
        assert!(
            matches!(
                outcome,
                ProcessingOutcome::RetriableFailure {
                    error: FsOpsError::Io { .. },
                    ..
                }
            ),
            "attempt {attempt} gave {}",
            outcome.label()
        );
    }

    let outcome = mover.process(request(&source, 2, 0));
    assert!(matches!(outcome, ProcessingOutcome::Quarantined { .. }));
    assert!(layout.quarantine.join("2025-03-01_report.csv").is_file());
    assert!(!source.exists());
    Ok(())
}

#[test]
fn quarantine_failure_is_reported_and_file_stays() -> TestResult<()> {
    let layout = TempLayout::new()?;
    layout.block_destination()?;
    layout.block_quarantine()?;
    let mover = mover(&layout, DiskSpaceGuard::new(FixedSpaceProbe::roomy()))?;
    let source = layout.write_source("2025-03-01_report.csv", b"data")?;

    let outcome = mover.process(request(&source, 2, 0));
    assert!(matches!(outcome, ProcessingOutcome::QuarantineFailed { .. }));
    assert!(source.is_file());
    Ok(())
}

#[test]
fn failing_probe_is_treated_as_no_space() -> TestResult<()> {
    let layout = TempLayout::new()?;
    let mover = mover(
        &layout,
        DiskSpaceGuard::new(Arc::new(FailingSpaceProbe)),
    )?;
    let source = layout.write_source("2025-03-01_report.csv", b"data")?;
    assert!(matches!(
        mover.attempt_move(&source, 0),
        Err(FsOpsError::InsufficientSpace {
            free_ratio: None,
            ..
        })
    ));
    assert!(source.is_file());
    Ok(())
}
