//! Ingest pipeline integration tests
//!
//! Exercise batch idempotence, cross-batch row dedupe, the error budget,
//! and the audit trail against a real PostgreSQL instance.

mod common;

use anyhow::Result;
use serial_test::serial;
use std::time::Duration;

use caseflow_engine::audit::{recent_events, AuditSink};
use caseflow_engine::config::IngestConfig;
use caseflow_engine::ingest::{ImportStatus, IngestPipeline};
use caseflow_engine::queue::JobQueue;

use common::{init_tracing, test_queue, TestPostgres};

const HEADER: &str = "case_number,claimant,respondent,filed_date,county";

/// Build a CSV with `total` rows, the first `malformed` of which are missing
/// their claimant.
fn case_csv(total: usize, malformed: usize) -> String {
    let mut csv = format!("{}\n", HEADER);
    for i in 0..total {
        if i < malformed {
            csv.push_str(&format!(
                "CV-2026-{:04},,Respondent {},2026-03-15,Travis\n",
                i, i
            ));
        } else {
            csv.push_str(&format!(
                "CV-2026-{:04},Claimant {},Respondent {},2026-03-15,Travis\n",
                i, i, i
            ));
        }
    }
    csv
}

fn pipeline(pool: &sqlx::PgPool, queue: JobQueue) -> IngestPipeline {
    IngestPipeline::new(
        pool.clone(),
        queue,
        AuditSink::noop(),
        IngestConfig {
            error_budget_pct: 10.0,
        },
    )
}

async fn record_count(pool: &sqlx::PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM case_records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[tokio::test]
#[serial]
async fn test_import_commits_rows_and_enqueues_followup() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    let result = pipeline
        .import_file(case_csv(10, 0).as_bytes(), "cases.csv")
        .await?;

    assert_eq!(result.status, ImportStatus::Completed);
    assert_eq!(result.expected, 10);
    assert_eq!(result.inserted, 10);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.discrepancies, 0);
    assert!(!result.duplicate);
    assert_eq!(record_count(pg.pool()).await?, 10);

    // The follow-up job was enqueued with the committing transaction.
    let (jobs,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE job_type = 'process_batch'")
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(jobs, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_reimporting_identical_bytes_is_idempotent() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    let csv = case_csv(10, 0);
    let first = pipeline.import_file(csv.as_bytes(), "cases.csv").await?;
    let second = pipeline.import_file(csv.as_bytes(), "cases-again.csv").await?;

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.batch_id, first.batch_id);
    assert_eq!(second.inserted, 0);
    assert_eq!(record_count(pg.pool()).await?, 10);

    // Still exactly one import run and one follow-up job.
    let (runs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM import_runs")
        .fetch_one(pg.pool())
        .await?;
    assert_eq!(runs, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_row_dedupe_absorbs_logical_duplicates_across_batches() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    let first = pipeline
        .import_file(case_csv(5, 0).as_bytes(), "cases.csv")
        .await?;
    assert_eq!(first.inserted, 5);

    // Same logical rows, different bytes: shuffled columns, shouting case,
    // extra whitespace. The content-derived keys must collapse them.
    let mut reordered = String::from("claimant,respondent,case_number,filed_date\n");
    for i in 0..5 {
        reordered.push_str(&format!(
            "CLAIMANT   {},respondent {},CV-2026-{:04},2026-03-15\n",
            i, i, i
        ));
    }

    let second = pipeline
        .import_file(reordered.as_bytes(), "cases-reexport.csv")
        .await?;

    assert!(!second.duplicate, "different bytes are a new batch");
    assert_eq!(second.status, ImportStatus::Completed);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(record_count(pg.pool()).await?, 5);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_error_budget_tolerates_minor_failures() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    // 5 of 100 malformed against a 10% budget: the batch completes.
    let result = pipeline
        .import_file(case_csv(100, 5).as_bytes(), "cases.csv")
        .await?;

    assert_eq!(result.status, ImportStatus::Completed);
    assert_eq!(result.expected, 100);
    assert_eq!(result.inserted, 95);
    assert_eq!(result.discrepancies, 5);
    assert_eq!(record_count(pg.pool()).await?, 95);

    let (open_validation,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM discrepancies WHERE error_type = 'validation' AND status = 'open'",
    )
    .fetch_one(pg.pool())
    .await?;
    assert_eq!(open_validation, 5);

    // Re-importing the same file changes nothing.
    let again = pipeline
        .import_file(case_csv(100, 5).as_bytes(), "cases.csv")
        .await?;
    assert!(again.duplicate);
    assert_eq!(again.inserted, 0);
    assert_eq!(record_count(pg.pool()).await?, 95);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_error_budget_breach_rolls_back_whole_batch() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    // 20 of 100 malformed against a 10% budget: nothing commits.
    let result = pipeline
        .import_file(case_csv(100, 20).as_bytes(), "cases.csv")
        .await?;

    assert_eq!(result.status, ImportStatus::Failed);
    assert_eq!(result.expected, 100);
    assert_eq!(result.inserted, 0);
    assert_eq!(result.discrepancies, 100);
    assert_eq!(record_count(pg.pool()).await?, 0);

    // Every source row is preserved for retry investigation.
    let (validation,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM discrepancies WHERE error_type = 'validation'")
            .fetch_one(pg.pool())
            .await?;
    let (aborted,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM discrepancies WHERE error_type = 'batch_aborted'")
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(validation, 20);
    assert_eq!(aborted, 80);

    // No follow-up job for a failed batch.
    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
        .fetch_one(pg.pool())
        .await?;
    assert_eq!(jobs, 0);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_missing_required_column_fails_batch() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    let csv = "case_number,claimant,filed_date\nCV-2026-001,Acme,2026-03-15\n";
    let result = pipeline.import_file(csv.as_bytes(), "bad.csv").await?;

    assert_eq!(result.status, ImportStatus::Failed);
    assert_eq!(record_count(pg.pool()).await?, 0);

    let run = pipeline.get_run(result.batch_id).await?.expect("run exists");
    assert!(run.error_detail.expect("detail").contains("respondent"));

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_duplicate_rows_within_one_file_are_absorbed() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let pipeline = pipeline(pg.pool(), test_queue(pg.pool()));

    let csv = format!(
        "{}\nCV-2026-001,Acme Corp,Beta LLC,2026-03-15,Travis\n\
         CV-2026-001,acme corp,BETA LLC,2026-03-15,Harris\n",
        HEADER
    );
    let result = pipeline.import_file(csv.as_bytes(), "dup.csv").await?;

    assert_eq!(result.inserted, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(record_count(pg.pool()).await?, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_import_emits_lifecycle_audit_events() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let (audit, _audit_task) = AuditSink::start(pg.pool().clone());

    let pipeline = IngestPipeline::new(
        pg.pool().clone(),
        test_queue(pg.pool()),
        audit,
        IngestConfig {
            error_budget_pct: 10.0,
        },
    );

    let result = pipeline
        .import_file(case_csv(3, 0).as_bytes(), "cases.csv")
        .await?;

    // The sink writes asynchronously; poll briefly for the trail to land.
    let mut events = Vec::new();
    for _ in 0..50 {
        events = recent_events(pg.pool(), result.batch_id, None).await?;
        if events.len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert!(names.contains(&"started"), "events: {:?}", names);
    assert!(names.contains(&"validated"), "events: {:?}", names);
    assert!(names.contains(&"committed"), "events: {:?}", names);
    assert!(events.iter().all(|e| e.domain == "ingest"));

    Ok(())
}
