//! Sensor descriptor model.
//!
//! One entry of the sensor catalog: which column a provider-assigned sensor
//! name lands in and the label written into the header row.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SensorDescriptor {
    pub name: String,
    /// Zero-based column ordinal, derived from the catalog's letter code.
    pub column: usize,
    pub description: String,
}

impl SensorDescriptor {
    pub fn new(name: impl Into<String>, column: usize, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column,
            description: description.into(),
        }
    }
}
