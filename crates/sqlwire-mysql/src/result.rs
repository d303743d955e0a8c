//! Values handed back to callers when a command completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlwire_core::{ColumnInfo, Row, Value};

use crate::protocol::OkPacket;
use crate::types::ColumnDef;

/// A statement prepared on the server.
#[derive(Debug, Clone)]
pub struct PrepareResult {
    /// Server-assigned statement ID
    pub statement_id: u32,
    /// Statement text, attached to server errors
    pub sql: String,
    pub params_num: u16,
    pub columns_num: u16,
    pub warning_count: u16,
    /// Whether executing the statement produces rows
    pub has_result_set: bool,
    /// Parameter definitions (types are usually placeholders)
    pub params: Vec<ColumnDef>,
    /// Result column definitions
    pub columns: Vec<ColumnDef>,
}

impl PrepareResult {
    /// Get the number of parameters expected.
    #[must_use]
    pub fn param_count(&self) -> usize {
        usize::from(self.params_num)
    }

    /// Get the number of result columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        usize::from(self.columns_num)
    }
}

/// Outcome of a statement that returned no rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkSummary {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl From<OkPacket> for OkSummary {
    fn from(ok: OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            status_flags: ok.status_flags,
            warnings: ok.warnings,
            info: ok.info,
        }
    }
}

/// Rows of a binary result set together with their column definitions.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in result order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Rows addressable by column name. All rows share one `ColumnInfo`.
    pub fn named_rows(&self) -> Vec<Row> {
        let info = Arc::new(ColumnInfo::new(self.column_names()));
        self.rows
            .iter()
            .map(|values| Row::with_columns(Arc::clone(&info), values.clone()))
            .collect()
    }

    /// Rows flattened to `name -> value` maps.
    pub fn to_maps(&self) -> Vec<BTreeMap<String, Value>> {
        self.named_rows().iter().map(Row::to_map).collect()
    }
}

/// Result of `COM_STMT_EXECUTE`.
#[derive(Debug, Clone)]
pub enum ExecuteResult {
    /// The statement produced a result set
    Rows(ResultSet),
    /// The statement produced an OK packet
    Ok(OkSummary),
}

impl ExecuteResult {
    /// The result set, if the statement produced one.
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            ExecuteResult::Rows(rs) => Some(rs),
            ExecuteResult::Ok(_) => None,
        }
    }

    /// The OK summary, if the statement produced no rows.
    pub fn ok(&self) -> Option<&OkSummary> {
        match self {
            ExecuteResult::Rows(_) => None,
            ExecuteResult::Ok(ok) => Some(ok),
        }
    }

    /// Consume into the result set, treating an OK as an empty one.
    pub fn into_result_set(self) -> ResultSet {
        match self {
            ExecuteResult::Rows(rs) => rs,
            ExecuteResult::Ok(_) => ResultSet::default(),
        }
    }
}
