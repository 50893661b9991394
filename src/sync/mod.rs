//! Sync engine: turns one raw payload into a row of the current year's table.
//!
//! Per persist:
//! 1. bail out early on an empty payload (the fetch came back with nothing),
//! 2. make sure the period's destination exists, writing the header row when
//!    it was just created or when row 1 turns out to be empty,
//! 3. count the used rows to find the next free row,
//! 4. map payload fields onto catalog columns and write the row there.

mod parse;

pub use parse::parse_reading;

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Datelike, Local, TimeZone};

use crate::{
    catalog::SensorCatalog,
    models::{blank_row, RawPayload, Reading, Row},
    store::{EnsureOutcome, RangeSpec, TabularBackend, TabularStore},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Period label for `now`: the calendar year.
pub fn period_label<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    now.year().to_string()
}

/// A row built from one reading, plus the payload fields that had no column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRow {
    pub row: Row,
    pub written: usize,
    pub unknown: Vec<String>,
}

/// Places every known field at its sensor's column. Unknown sensor names are
/// collected, not fatal.
pub fn map_reading(reading: &Reading, catalog: &SensorCatalog) -> MappedRow {
    let mut row = blank_row(catalog.width());
    let mut written = 0;
    let mut unknown = Vec::new();

    for (name, value) in &reading.fields {
        match catalog.column_of(name) {
            Some(column) => {
                if row[column].replace(value.clone()).is_none() {
                    written += 1;
                }
            }
            None => unknown.push(name.clone()),
        }
    }

    MappedRow {
        row,
        written,
        unknown,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub period: String,
    /// 1-based row number the reading landed on. `None` when no payload
    /// field had a column, so nothing was written.
    pub row_number: Option<usize>,
    pub fields_written: usize,
    pub fields_skipped: usize,
    pub created_destination: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("payload is empty; nothing to persist")]
    EmptyPayload,
    #[error("destination for period {0} is unavailable")]
    Unavailable(String),
    #[error("header row for period {0} could not be written")]
    HeaderWrite(String),
    #[error("rows of period {0} could not be read")]
    ReadFailed(String),
    #[error("row {row} of period {period} could not be written")]
    WriteFailed { period: String, row: usize },
}

pub struct SyncEngine<B> {
    catalog: Arc<SensorCatalog>,
    store: TabularStore<B>,
    /// Periods whose header row was confirmed during this process run.
    headed_periods: HashSet<String>,
}

impl<B: TabularBackend> SyncEngine<B> {
    pub fn new(catalog: Arc<SensorCatalog>, store: TabularStore<B>) -> Self {
        Self {
            catalog,
            store,
            headed_periods: HashSet::new(),
        }
    }

    pub fn store(&self) -> &TabularStore<B> {
        &self.store
    }

    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    pub async fn persist(&mut self, payload: &RawPayload) -> Result<PersistReport, PersistError> {
        self.persist_at(payload, Local::now()).await
    }

    pub async fn persist_at<Tz: TimeZone>(
        &mut self,
        payload: &RawPayload,
        now: DateTime<Tz>,
    ) -> Result<PersistReport, PersistError> {
        if payload.is_empty() {
            log_error!("Payload is empty; skipping write this cycle");
            return Err(PersistError::EmptyPayload);
        }

        let reading = parse_reading(payload);
        let mapped = map_reading(&reading, &self.catalog);
        for name in &mapped.unknown {
            log_warn!("Sensor '{name}' is not in the catalog; field skipped");
        }
        let period = period_label(&now);
        if mapped.written == 0 {
            log_warn!(
                "None of the {} payload fields map to a catalog column; nothing to write",
                reading.len()
            );
            return Ok(PersistReport {
                period,
                row_number: None,
                fields_written: 0,
                fields_skipped: mapped.unknown.len(),
                created_destination: false,
            });
        }

        let outcome = self.store.ensure_exists(&period).await;
        let created = match outcome {
            EnsureOutcome::Unavailable => return Err(PersistError::Unavailable(period)),
            EnsureOutcome::Created => true,
            EnsureOutcome::Existing => false,
        };
        self.ensure_header(&period, created).await?;

        let used = self
            .store
            .read_range(&period, &RangeSpec::columns(0, self.catalog.width().saturating_sub(1)))
            .await
            .ok_or_else(|| PersistError::ReadFailed(period.clone()))?;
        // Row 1 is the header, so data never goes above row 2.
        let next_index = used.len().max(1);

        let target = RangeSpec::cell(next_index, 0);
        if !self
            .store
            .write_range(&period, &target, std::slice::from_ref(&mapped.row))
            .await
        {
            return Err(PersistError::WriteFailed {
                period,
                row: next_index + 1,
            });
        }

        log_info!(
            "Persisted reading to {} ({} fields, {} skipped)",
            target.qualified(&period),
            mapped.written,
            mapped.unknown.len()
        );

        Ok(PersistReport {
            period,
            row_number: Some(next_index + 1),
            fields_written: mapped.written,
            fields_skipped: mapped.unknown.len(),
            created_destination: created,
        })
    }

    /// Writes the header into a freshly created destination, or into an
    /// existing one whose row 1 is empty (creation succeeded but the header
    /// write never happened). Checked once per period per run.
    async fn ensure_header(&mut self, period: &str, created: bool) -> Result<(), PersistError> {
        if !created && self.headed_periods.contains(period) {
            return Ok(());
        }

        let needs_header = if created {
            true
        } else {
            let first_row = self
                .store
                .read_range(period, &RangeSpec::rows(0, 0))
                .await
                .ok_or_else(|| PersistError::ReadFailed(period.to_string()))?;
            let has_header = first_row
                .first()
                .is_some_and(|row| row.iter().any(Option::is_some));
            if !has_header {
                log_warn!("Destination {period} exists without a header row; writing it now");
            }
            !has_header
        };

        if needs_header && !self.store.write_header(period, self.catalog.header_row()).await {
            return Err(PersistError::HeaderWrite(period.to_string()));
        }

        self.headed_periods.insert(period.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::SensorDescriptor,
        store::{BackendOp, MemoryBackend},
    };
    use chrono::Utc;

    fn cells(values: &[Option<&str>]) -> Row {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    fn wind_and_temp() -> Arc<SensorCatalog> {
        Arc::new(SensorCatalog::from_descriptors([
            SensorDescriptor::new("WS1", 0, "Wind"),
            SensorDescriptor::new("OT1", 2, "Outdoor Temp"),
        ]))
    }

    fn at_year(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn period_is_the_calendar_year() {
        assert_eq!(period_label(&at_year(2026)), "2026");
    }

    #[test]
    fn mapping_places_values_by_column() {
        let reading = parse_reading(&r#""WS1":"5","OT1":"72""#.into());
        let mapped = map_reading(&reading, &wind_and_temp());

        assert_eq!(mapped.row, cells(&[Some("5"), None, Some("72")]));
        assert_eq!(mapped.written, 2);
        assert!(mapped.unknown.is_empty());
    }

    #[test]
    fn unknown_sensors_are_left_out_of_the_row() {
        let reading = parse_reading(&r#""WS1":"5","XX9":"1","OT1":"72""#.into());
        let mapped = map_reading(&reading, &wind_and_temp());

        assert_eq!(mapped.row, cells(&[Some("5"), None, Some("72")]));
        assert_eq!(mapped.unknown, vec!["XX9".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_never_touches_the_store() {
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(MemoryBackend::new()));

        let err = engine.persist_at(&"".into(), at_year(2026)).await.unwrap_err();
        assert_eq!(err, PersistError::EmptyPayload);
        let backend = engine.store().backend();
        assert_eq!(backend.calls(BackendOp::List), 0);
        assert_eq!(backend.calls(BackendOp::Create), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_write_creates_destination_with_header() {
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(MemoryBackend::new()));

        let report = engine
            .persist_at(&r#""WS1":"5","OT1":"72""#.into(), at_year(2026))
            .await
            .unwrap();

        assert!(report.created_destination);
        assert_eq!(report.row_number, Some(2));
        assert_eq!(
            engine.store().backend().rows("2026"),
            vec![
                cells(&[Some("Wind"), None, Some("Outdoor Temp")]),
                cells(&[Some("5"), None, Some("72")]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn headerless_destination_gets_its_header_before_data() {
        let backend = MemoryBackend::new();
        backend.insert_destination("2026");
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(backend));

        let report = engine
            .persist_at(&r#""OT1":"70""#.into(), at_year(2026))
            .await
            .unwrap();

        assert!(!report.created_destination);
        assert_eq!(report.row_number, Some(2));
        let backend = engine.store().backend();
        assert_eq!(backend.calls(BackendOp::Create), 0);
        assert_eq!(
            backend.rows("2026"),
            vec![
                cells(&[Some("Wind"), None, Some("Outdoor Temp")]),
                cells(&[None, None, Some("70")]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn header_is_checked_once_per_period() {
        let backend = MemoryBackend::new();
        backend.insert_cell("2026", 0, 0, "Wind");
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(backend));

        engine.persist_at(&r#""WS1":"1""#.into(), at_year(2026)).await.unwrap();
        engine.persist_at(&r#""WS1":"2""#.into(), at_year(2026)).await.unwrap();

        let backend = engine.store().backend();
        // One header probe plus one row count per persist.
        assert_eq!(backend.calls(BackendOp::Get), 3);
        assert_eq!(backend.calls(BackendOp::Update), 2);
        assert_eq!(backend.rows("2026")[0], cells(&[Some("Wind")]));
    }

    #[tokio::test(start_paused = true)]
    async fn only_unknown_fields_succeeds_without_writing() {
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(MemoryBackend::new()));

        let report = engine
            .persist_at(&r#""XX9":"1","XX8":"2""#.into(), at_year(2026))
            .await
            .unwrap();
        assert_eq!(report.row_number, None);
        assert_eq!(report.fields_written, 0);
        assert_eq!(report.fields_skipped, 2);
        assert_eq!(engine.store().backend().destination_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_catalog_column_does_not_break_persist() {
        let catalog = Arc::new(SensorCatalog::parse(
            "T1, ZZZZZZZZZZZZZ, Temp\nT2, B, Humidity\n",
        ));
        let mut engine = SyncEngine::new(catalog, TabularStore::new(MemoryBackend::new()));

        let report = engine
            .persist_at(&r#""T1":"68.5","T2":"40""#.into(), at_year(2026))
            .await
            .unwrap();

        assert_eq!(report.row_number, Some(2));
        assert_eq!(report.fields_written, 1);
        assert_eq!(report.fields_skipped, 1);
        assert_eq!(
            engine.store().backend().rows("2026"),
            vec![cells(&[None, Some("Humidity")]), cells(&[None, Some("40")])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_backend_abandons_the_cycle() {
        let backend = MemoryBackend::new();
        backend.fail_next(BackendOp::List, 4);
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(backend));

        let err = engine
            .persist_at(&r#""WS1":"5""#.into(), at_year(2026))
            .await
            .unwrap_err();
        assert_eq!(err, PersistError::Unavailable("2026".to_string()));
        assert_eq!(engine.store().backend().calls(BackendOp::Update), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_header_write_is_retried_next_cycle() {
        let backend = MemoryBackend::new();
        backend.fail_next(BackendOp::Update, 4);
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(backend));

        let err = engine
            .persist_at(&r#""WS1":"5""#.into(), at_year(2026))
            .await
            .unwrap_err();
        assert_eq!(err, PersistError::HeaderWrite("2026".to_string()));

        let report = engine
            .persist_at(&r#""WS1":"6""#.into(), at_year(2026))
            .await
            .unwrap();
        assert_eq!(report.row_number, Some(2));
        assert_eq!(engine.store().backend().calls(BackendOp::Create), 1);
        assert_eq!(
            engine.store().backend().rows("2026"),
            vec![
                cells(&[Some("Wind"), None, Some("Outdoor Temp")]),
                cells(&[Some("6")]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn new_year_starts_a_new_destination() {
        let mut engine = SyncEngine::new(wind_and_temp(), TabularStore::new(MemoryBackend::new()));

        engine.persist_at(&r#""WS1":"1""#.into(), at_year(2025)).await.unwrap();
        let report = engine.persist_at(&r#""WS1":"2""#.into(), at_year(2026)).await.unwrap();

        assert!(report.created_destination);
        assert_eq!(report.row_number, Some(2));
        assert_eq!(engine.store().backend().destination_count(), 2);
    }
}
