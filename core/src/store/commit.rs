use crate::{
    artifacts::{RunArtifacts, RunManifest},
    error::{EngineError, EngineResult},
};
use rusqlite::{params, Transaction};

// ── Run ────────────────────────────────────────────────────────

pub(super) fn insert_run(tx: &Transaction<'_>, m: &RunManifest) -> EngineResult<()> {
    tx.execute(
        "INSERT INTO run (
            run_id, engine_version, snapshot_date, calibration_end, bucket_count,
            blob_schema_version, feature_schema_version, committed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            m.run_id,
            m.engine_version,
            m.snapshot.to_string(),
            m.calibration_end.to_string(),
            m.bucket_count as i64,
            m.blob_schema_version,
            m.feature_schema_version,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

// ── Customer tables ────────────────────────────────────────────

pub(super) fn insert_rfm(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO rfm (
            run_id, customer_id, recency, frequency, monetary,
            r_score, f_score, m_score, segment
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for r in a.rfm.records() {
        stmt.execute(params![
            a.run_id(),
            r.customer_id,
            r.recency,
            r.frequency,
            r.monetary,
            r.r_score,
            r.f_score,
            r.m_score,
            r.segment.label(),
        ])?;
    }
    Ok(())
}

pub(super) fn insert_customer_value(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO customer_value (
            run_id, customer_id, recency, frequency, monetary, segment,
            clv_6m, clv_12m, expected_purchases_12m, prob_alive,
            expected_value, monetary_fallback
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?;
    for row in a.customers.rows() {
        let value = a.clv.get(row.customer_id).ok_or_else(|| {
            EngineError::SchemaMismatch(format!(
                "customer {} has no CLV record to persist",
                row.customer_id
            ))
        })?;
        stmt.execute(params![
            a.run_id(),
            row.customer_id,
            row.recency,
            row.frequency,
            row.monetary,
            row.segment.label(),
            row.clv_6m,
            row.clv_12m,
            value.expected_purchases_12m,
            value.prob_alive,
            value.expected_value,
            value.monetary_fallback,
        ])?;
    }
    Ok(())
}

pub(super) fn insert_eligible(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt =
        tx.prepare("INSERT INTO eligible_customer (run_id, customer_id) VALUES (?1, ?2)")?;
    for row in a.eligible.rows() {
        stmt.execute(params![a.run_id(), row.customer_id])?;
    }
    Ok(())
}

// ── Targeting ──────────────────────────────────────────────────

pub(super) fn insert_uplift_ranked(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO uplift_ranked (
            run_id, rank, customer_id, p_treat, p_ctrl,
            percent, incremental_resp, random_baseline
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for e in a.ranked.entries() {
        stmt.execute(params![
            a.run_id(),
            e.rank as i64,
            e.customer_id,
            e.p_treat,
            e.p_ctrl,
            e.percent,
            e.incremental_resp,
            e.random_baseline,
        ])?;
    }
    Ok(())
}

pub(super) fn insert_targets(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO target_list (run_id, position, customer_id, p_treat, p_ctrl)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, t) in a.targets.iter().enumerate() {
        stmt.execute(params![
            a.run_id(),
            position as i64 + 1,
            t.customer_id,
            t.p_treat,
            t.p_ctrl,
        ])?;
    }
    Ok(())
}

// ── Models and events ──────────────────────────────────────────

pub(super) fn insert_model_blobs(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO model_blob (run_id, model, schema_version, blob_json)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for blob in a.model_blobs()? {
        stmt.execute(params![a.run_id(), blob.model, blob.schema_version, blob.to_json()?])?;
    }
    Ok(())
}

pub(super) fn insert_events(tx: &Transaction<'_>, a: &RunArtifacts) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO event_log (run_id, seq, stage, event_type, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in a.event_log()? {
        stmt.execute(params![
            entry.run_id,
            entry.seq as i64,
            entry.stage,
            entry.event_type,
            entry.payload,
        ])?;
    }
    Ok(())
}
