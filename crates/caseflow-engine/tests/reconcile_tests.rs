//! Reconciliation integration tests
//!
//! Exercise batch verification, the drift sweep, and the dead-letter
//! retry/dismiss workflows against a real PostgreSQL instance.

mod common;

use anyhow::Result;
use serial_test::serial;

use caseflow_engine::audit::AuditSink;
use caseflow_engine::config::{IngestConfig, ReconcileConfig};
use caseflow_engine::ingest::IngestPipeline;
use caseflow_engine::reconcile::{
    DiscrepancyFilter, DiscrepancyStatus, ReconcileEngine, RetryOutcome,
    ERROR_TYPE_ROW_COUNT_MISMATCH,
};

use common::{init_tracing, test_queue, TestPostgres};

const HEADER: &str = "case_number,claimant,respondent,filed_date";

fn engine(pool: &sqlx::PgPool) -> ReconcileEngine {
    ReconcileEngine::new(
        pool.clone(),
        AuditSink::noop(),
        ReconcileConfig {
            sweep_interval_secs: 1,
        },
    )
}

fn pipeline(pool: &sqlx::PgPool) -> IngestPipeline {
    IngestPipeline::new(
        pool.clone(),
        test_queue(pool),
        AuditSink::noop(),
        IngestConfig {
            error_budget_pct: 10.0,
        },
    )
}

fn valid_csv(total: usize) -> String {
    let mut csv = format!("{}\n", HEADER);
    for i in 0..total {
        csv.push_str(&format!(
            "CV-2026-{:04},Claimant {},Respondent {},2026-03-15\n",
            i, i, i
        ));
    }
    csv
}

#[tokio::test]
#[serial]
async fn test_verify_batch_scores_committed_rows() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let batch = pipeline(pg.pool())
        .import_file(valid_csv(10).as_bytes(), "cases.csv")
        .await?;

    let engine = engine(pg.pool());

    let intact = engine.verify_batch(batch.batch_id).await?;
    assert_eq!(intact.expected, 10);
    assert_eq!(intact.actual, 10);
    assert_eq!(intact.integrity_score, 1.0);

    // Lose two rows behind the pipeline's back.
    sqlx::query(
        "DELETE FROM case_records WHERE id IN
         (SELECT id FROM case_records WHERE batch_id = $1 LIMIT 2)",
    )
    .bind(batch.batch_id)
    .execute(pg.pool())
    .await?;

    let degraded = engine.verify_batch(batch.batch_id).await?;
    assert_eq!(degraded.actual, 8);
    assert_eq!(degraded.integrity_score, 0.8);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_sweep_opens_one_drift_discrepancy_per_batch() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let batch = pipeline(pg.pool())
        .import_file(valid_csv(10).as_bytes(), "cases.csv")
        .await?;
    let engine = engine(pg.pool());

    // An intact batch produces no discrepancies.
    assert!(engine.audit_completed_batches().await?.is_empty());

    sqlx::query(
        "DELETE FROM case_records WHERE id IN
         (SELECT id FROM case_records WHERE batch_id = $1 LIMIT 2)",
    )
    .bind(batch.batch_id)
    .execute(pg.pool())
    .await?;

    let degraded = engine.audit_completed_batches().await?;
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].batch_id, batch.batch_id);
    assert_eq!(degraded[0].integrity_score, 0.8);

    // Repeated sweeps do not multiply the record.
    engine.audit_completed_batches().await?;
    let drift = engine
        .list_discrepancies(DiscrepancyFilter {
            error_type: Some(ERROR_TYPE_ROW_COUNT_MISMATCH.to_string()),
            ..DiscrepancyFilter::default()
        })
        .await?;
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].status(), DiscrepancyStatus::Open);
    assert!(drift[0].detail.as_deref().unwrap_or("").contains("2 of 10"));

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_sweep_accounts_for_validation_discrepancies() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;

    // 1 invalid row of 10 sits exactly on the budget: batch completes with
    // 9 stored rows and 1 validation discrepancy. That is fully accounted
    // for, so the sweep stays quiet.
    let mut csv = valid_csv(9);
    csv.push_str("CV-2026-BAD,,Respondent X,2026-03-15\n");
    pipeline(pg.pool())
        .import_file(csv.as_bytes(), "cases.csv")
        .await?;

    let engine = engine(pg.pool());
    assert!(engine.audit_completed_batches().await?.is_empty());

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_retry_resolves_after_operator_fixes_raw_row() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;

    let mut csv = valid_csv(9);
    csv.push_str("CV-2026-BAD,,Respondent X,2026-03-15\n");
    let batch = pipeline(pg.pool())
        .import_file(csv.as_bytes(), "cases.csv")
        .await?;
    assert_eq!(batch.inserted, 9);
    assert_eq!(batch.discrepancies, 1);

    let engine = engine(pg.pool());
    let open = engine
        .list_discrepancies(DiscrepancyFilter {
            status: Some(DiscrepancyStatus::Open),
            ..DiscrepancyFilter::default()
        })
        .await?;
    assert_eq!(open.len(), 1);
    let discrepancy = &open[0];

    // The source data is still broken; the retry fails and the record
    // stays open with the fresh error.
    let outcome = engine.retry(discrepancy.id).await?;
    assert!(matches!(outcome, RetryOutcome::StillFailing(ref e) if e.contains("claimant")));
    let still_open = engine
        .get_discrepancy(discrepancy.id)
        .await?
        .expect("discrepancy exists");
    assert_eq!(still_open.status(), DiscrepancyStatus::Open);

    // Operator fixes the retained raw row, then retries.
    let mut raw = discrepancy.raw_row.clone().expect("raw row retained");
    raw["claimant"] = serde_json::Value::String("Recovered Claimant".to_string());
    sqlx::query("UPDATE discrepancies SET raw_row = $2 WHERE id = $1")
        .bind(discrepancy.id)
        .bind(&raw)
        .execute(pg.pool())
        .await?;

    let outcome = engine.retry(discrepancy.id).await?;
    assert_eq!(outcome, RetryOutcome::Resolved);

    let resolved = engine
        .get_discrepancy(discrepancy.id)
        .await?
        .expect("discrepancy exists");
    assert_eq!(resolved.status(), DiscrepancyStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    // The row is committed and the run counters reflect the remediation.
    let (records,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM case_records WHERE batch_id = $1")
            .bind(batch.batch_id)
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(records, 10);

    let (inserted,): (i32,) =
        sqlx::query_as("SELECT row_count_inserted FROM import_runs WHERE id = $1")
            .bind(batch.batch_id)
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(inserted, 10);

    // The batch now verifies clean.
    let verification = engine.verify_batch(batch.batch_id).await?;
    assert_eq!(verification.integrity_score, 1.0);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_dismiss_is_terminal_and_audited_decision() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;

    let mut csv = valid_csv(9);
    csv.push_str("CV-2026-BAD,,Respondent X,2026-03-15\n");
    pipeline(pg.pool())
        .import_file(csv.as_bytes(), "cases.csv")
        .await?;

    let engine = engine(pg.pool());
    let open = engine
        .list_discrepancies(DiscrepancyFilter::default())
        .await?;
    let discrepancy_id = open[0].id;

    engine
        .dismiss(discrepancy_id, "known-bad vendor export")
        .await?;

    let dismissed = engine
        .get_discrepancy(discrepancy_id)
        .await?
        .expect("discrepancy exists");
    assert_eq!(dismissed.status(), DiscrepancyStatus::Dismissed);
    assert_eq!(
        dismissed.dismiss_reason.as_deref(),
        Some("known-bad vendor export")
    );

    // Terminal means terminal: no retry, no second dismissal.
    assert!(engine.retry(discrepancy_id).await.is_err());
    assert!(engine.dismiss(discrepancy_id, "again").await.is_err());

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_list_discrepancies_filters() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;

    let mut csv = valid_csv(8);
    csv.push_str("CV-2026-BAD1,,Respondent X,2026-03-15\n");
    csv.push_str("CV-2026-BAD2,Claimant Y,Respondent Y,not-a-date\n");
    let batch = pipeline(pg.pool())
        .import_file(csv.as_bytes(), "cases.csv")
        .await?;

    let engine = engine(pg.pool());

    let all = engine
        .list_discrepancies(DiscrepancyFilter::default())
        .await?;
    assert_eq!(all.len(), 2);

    let by_batch = engine
        .list_discrepancies(DiscrepancyFilter {
            batch_id: Some(batch.batch_id),
            status: Some(DiscrepancyStatus::Open),
            ..DiscrepancyFilter::default()
        })
        .await?;
    assert_eq!(by_batch.len(), 2);

    engine.dismiss(all[0].id, "vendor noise").await?;
    let open_only = engine
        .list_discrepancies(DiscrepancyFilter {
            status: Some(DiscrepancyStatus::Open),
            ..DiscrepancyFilter::default()
        })
        .await?;
    assert_eq!(open_only.len(), 1);

    Ok(())
}
