//! The final per-customer table: RFM fields joined with CLV.

use crate::{
    clv_forecaster::ClvTable,
    error::{EngineError, EngineResult},
    rfm_aggregator::{RfmTable, Segment},
    types::{CustomerId, Days},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerRow {
    pub customer_id: CustomerId,
    pub recency:     Days,
    pub frequency:   u32,
    pub monetary:    f64,
    pub segment:     Segment,
    pub clv_6m:      Option<f64>,
    pub clv_12m:     Option<f64>,
}

/// Sorted by customer_id.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTable {
    rows: Vec<CustomerRow>,
}

impl CustomerTable {
    /// Join on customer_id. Every RFM customer must have a CLV record.
    pub fn merge(rfm: &RfmTable, clv: &ClvTable) -> EngineResult<Self> {
        let rows = rfm
            .records()
            .iter()
            .map(|r| {
                let value = clv.get(r.customer_id).ok_or_else(|| {
                    EngineError::SchemaMismatch(format!(
                        "customer {} has an RFM record but no CLV record",
                        r.customer_id
                    ))
                })?;
                Ok(CustomerRow {
                    customer_id: r.customer_id,
                    recency:     r.recency,
                    frequency:   r.frequency,
                    monetary:    r.monetary,
                    segment:     r.segment,
                    clv_6m:      value.clv_6m,
                    clv_12m:     value.clv_12m,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[CustomerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, customer_id: CustomerId) -> Option<&CustomerRow> {
        self.rows
            .binary_search_by_key(&customer_id, |r| r.customer_id)
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Rows whose ids pass `keep`, same schema and order.
    pub fn filter(&self, mut keep: impl FnMut(&CustomerRow) -> bool) -> Self {
        Self { rows: self.rows.iter().filter(|r| keep(r)).cloned().collect() }
    }
}
