//! Sensor catalog: maps provider sensor names to table columns.
//!
//! Loaded once at startup from a line-oriented file of
//! `name, columnCode, description` triples, e.g.
//!
//! ```text
//! tempf, C, Outdoor Temperature (F)
//! humidity, D, Outdoor Humidity (%)
//! ```
//!
//! The catalog is immutable after loading and shared behind an `Arc`.

mod column;

pub use column::{column_letters, column_ordinal, MAX_COLUMNS};

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::models::{blank_row, Row, SensorDescriptor};

#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: HashMap<String, SensorDescriptor>,
    /// Column -> sensor whose description heads it. The last entry loaded
    /// for a column wins.
    header_owners: BTreeMap<usize, String>,
}

impl SensorCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read sensor catalog {}", path.display()))?;
        let catalog = Self::parse(&contents);
        info!(
            "Loaded {} sensors from {} (row width {})",
            catalog.len(),
            path.display(),
            catalog.width()
        );
        Ok(catalog)
    }

    /// Parses catalog text. Malformed lines are skipped with a warning;
    /// duplicate names and shared columns keep the later line.
    pub fn parse(contents: &str) -> Self {
        let mut catalog = Self::default();

        for (index, raw_line) in contents.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.splitn(3, ',').collect();
            if parts.len() < 3 {
                warn!("Skipping catalog line {line_no}: expected 'name, column, description', got '{line}'");
                continue;
            }

            let name = parts[0].trim();
            if name.is_empty() {
                warn!("Skipping catalog line {line_no}: empty sensor name");
                continue;
            }

            let column = match column_ordinal(parts[1]) {
                Ok(column) => column,
                Err(err) => {
                    warn!("Skipping catalog line {line_no} ({name}): {err}");
                    continue;
                }
            };

            catalog.insert(
                SensorDescriptor::new(name, column, parts[2].trim()),
                &format!("catalog line {line_no}"),
            );
        }

        catalog
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = SensorDescriptor>) -> Self {
        let mut catalog = Self::default();
        for (index, descriptor) in descriptors.into_iter().enumerate() {
            catalog.insert(descriptor, &format!("descriptor {}", index + 1));
        }
        catalog
    }

    fn insert(&mut self, descriptor: SensorDescriptor, origin: &str) {
        let name = descriptor.name.clone();
        let column = descriptor.column;
        if column >= MAX_COLUMNS {
            warn!("Skipping {origin} ({name}): column {column} is past the last sheet column");
            return;
        }

        if let Some(previous) = self.sensors.insert(name.clone(), descriptor) {
            warn!(
                "Duplicate sensor '{name}' on {origin}; replacing column {} ('{}')",
                column_letters(previous.column),
                previous.description
            );
            if self.header_owners.get(&previous.column) == Some(&name) {
                self.header_owners.remove(&previous.column);
            }
        }

        if let Some(other) = self.header_owners.insert(column, name.clone()) {
            if other != name {
                warn!(
                    "Sensor '{name}' on {origin} shares column {} with '{other}'; the header shows '{name}'",
                    column_letters(column)
                );
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SensorDescriptor> {
        self.sensors.get(name)
    }

    pub fn column_of(&self, name: &str) -> Option<usize> {
        self.sensors.get(name).map(|descriptor| descriptor.column)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Row width: highest known ordinal + 1.
    pub fn width(&self) -> usize {
        self.sensors
            .values()
            .map(|descriptor| descriptor.column + 1)
            .max()
            .unwrap_or(0)
    }

    /// Header row with every description at its sensor's column.
    pub fn header_row(&self) -> Row {
        let mut row = blank_row(self.width());
        for (column, name) in &self.header_owners {
            if let Some(descriptor) = self.sensors.get(name) {
                row[*column] = Some(descriptor.description.clone());
            }
        }
        row
    }
}
