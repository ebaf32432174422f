use super::ArtifactStore;
use crate::{
    customer_table::CustomerRow,
    error::{EngineError, EngineResult},
    event::EventLogEntry,
    model_blob::ModelBlob,
    rfm_aggregator::Segment,
    types::{CustomerId, Days},
};
use rusqlite::{params, OptionalExtension};

/// Per-run artifact tables, for row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactTable {
    Rfm,
    CustomerValue,
    UpliftRanked,
    EligibleCustomer,
    TargetList,
    ModelBlob,
    EventLog,
}

impl ArtifactTable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rfm              => "rfm",
            Self::CustomerValue    => "customer_value",
            Self::UpliftRanked     => "uplift_ranked",
            Self::EligibleCustomer => "eligible_customer",
            Self::TargetList       => "target_list",
            Self::ModelBlob        => "model_blob",
            Self::EventLog         => "event_log",
        }
    }
}

/// An uplift row as read back, with the stored `uplift` column.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUplift {
    pub customer_id: CustomerId,
    pub uplift:      f64,
    pub p_treat:     f64,
    pub p_ctrl:      f64,
}

impl ArtifactStore {
    // ── Runs ───────────────────────────────────────────────────

    pub fn run_ids(&self) -> EngineResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT run_id FROM run ORDER BY committed_at, run_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn row_count(&self, table: ArtifactTable, run_id: &str) -> EngineResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE run_id = ?1", table.name());
        let count: i64 = self.conn.query_row(&sql, params![run_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ── Artifacts ──────────────────────────────────────────────

    pub fn load_model_blob(&self, run_id: &str, model: &str) -> EngineResult<Option<ModelBlob>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT blob_json FROM model_blob WHERE run_id = ?1 AND model = ?2",
                params![run_id, model],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| ModelBlob::from_json(&j)).transpose()
    }

    /// Target customer ids in list order.
    pub fn target_ids(&self, run_id: &str) -> EngineResult<Vec<CustomerId>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id FROM target_list WHERE run_id = ?1 ORDER BY position ASC",
        )?;
        let ids = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<Result<Vec<CustomerId>, _>>()?;
        Ok(ids)
    }

    /// Ranked uplift rows in rank order.
    pub fn ranked_uplift(&self, run_id: &str) -> EngineResult<Vec<StoredUplift>> {
        self.uplift_rows(
            "SELECT customer_id, uplift, p_treat, p_ctrl
             FROM uplift_ranked WHERE run_id = ?1 ORDER BY rank ASC",
            run_id,
        )
    }

    /// Target list rows in list order.
    pub fn targets(&self, run_id: &str) -> EngineResult<Vec<StoredUplift>> {
        self.uplift_rows(
            "SELECT customer_id, uplift, p_treat, p_ctrl
             FROM target_list WHERE run_id = ?1 ORDER BY position ASC",
            run_id,
        )
    }

    fn uplift_rows(&self, sql: &str, run_id: &str) -> EngineResult<Vec<StoredUplift>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(StoredUplift {
                    customer_id: row.get(0)?,
                    uplift:      row.get(1)?,
                    p_treat:     row.get(2)?,
                    p_ctrl:      row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The eligible set with the final customer table's schema, by customer_id.
    pub fn eligible_rows(&self, run_id: &str) -> EngineResult<Vec<CustomerRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, recency, frequency, monetary, segment, clv_6m, clv_12m
             FROM eligible_customer_row WHERE run_id = ?1
             ORDER BY customer_id ASC",
        )?;
        let raw = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, CustomerId>(0)?,
                    row.get::<_, Days>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(customer_id, recency, frequency, monetary, label, clv_6m, clv_12m)| {
                let segment = Segment::from_label(&label).ok_or_else(|| {
                    EngineError::SchemaMismatch(format!(
                        "customer {customer_id}: unknown stored segment '{label}'"
                    ))
                })?;
                Ok(CustomerRow { customer_id, recency, frequency, monetary, segment, clv_6m, clv_12m })
            })
            .collect()
    }

    pub fn events_for_run(&self, run_id: &str) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY seq ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    seq:        row.get::<_, i64>(2)? as u64,
                    stage:      row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
