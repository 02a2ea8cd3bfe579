use serde::{Deserialize, Serialize};

use crate::types::{RowId, value::Value};

/// A salvaged table row: the rowid plus its decoded column values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub row_id: RowId,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(row_id: RowId, values: Vec<Value>) -> Self {
        Self { row_id, values }
    }

    pub fn get_value(&self, column_index: usize) -> Option<&Value> {
        self.values.get(column_index)
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn size(&self) -> usize {
        8 + self.values.iter().map(Value::size).sum::<usize>()
    }
}
