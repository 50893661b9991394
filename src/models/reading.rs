//! Reading and row models.
//!
//! A `Reading` is what one fetch produced; a `Row` is what gets written.

use serde::{Deserialize, Serialize};

/// A single cell. `None` is a blank cell.
pub type Cell = Option<String>;

/// Ordered cells of one table row, one slot per column.
pub type Row = Vec<Cell>;

/// Flattened object body produced by one successful fetch, e.g.
/// `"dateutc":1723481700000,"tempf":72.5`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayload(pub String);

impl RawPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for RawPayload {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Ordered `(sensor name, value)` pairs parsed from one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub fields: Vec<(String, String)>,
}

impl Reading {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn push(&mut self, name: String, value: String) {
        self.fields.push((name, value));
    }
}

/// Builds a blank row of `width` cells.
pub fn blank_row(width: usize) -> Row {
    vec![None; width]
}
