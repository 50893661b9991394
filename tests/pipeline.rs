use std::{
    collections::VecDeque,
    fs,
    sync::{Arc, Mutex},
};

use chrono::{Local, TimeDelta};
use weather_sync_lib::{
    catalog::SensorCatalog,
    fetch::{FetchError, ReadingSource, ResilientFetcher},
    scheduler::Scheduler,
    store::{BackendOp, MemoryBackend, RangeSpec, SqliteBackend, TabularBackend, TabularStore},
    sync::{period_label, PersistError, SyncEngine},
};

struct CannedStation {
    bodies: Mutex<VecDeque<Result<String, FetchError>>>,
}

impl CannedStation {
    fn new(bodies: Vec<Result<String, FetchError>>) -> Self {
        Self {
            bodies: Mutex::new(bodies.into()),
        }
    }
}

impl ReadingSource for CannedStation {
    async fn fetch_body(&self) -> Result<String, FetchError> {
        self.bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("station offline".into())))
    }
}

fn cell(value: &str) -> Vec<Option<String>> {
    vec![Some(value.to_string())]
}

fn temp_catalog(dir: &tempfile::TempDir) -> Arc<SensorCatalog> {
    let path = dir.path().join("sensors.csv");
    fs::write(&path, "# name, column, description\nT1, A, Temp\n").unwrap();
    Arc::new(SensorCatalog::load(&path).unwrap())
}

#[tokio::test(start_paused = true)]
async fn two_cycles_create_once_and_append() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let station = CannedStation::new(vec![
        Ok(r#"[{"T1":"68.5"}]"#.into()),
        Ok(r#"[{"T1":"70.1"}]"#.into()),
    ]);
    let mut scheduler = Scheduler::new(
        ResilientFetcher::new(station),
        SyncEngine::new(temp_catalog(&dir), TabularStore::new(Arc::clone(&backend))),
        TimeDelta::minutes(5),
    );
    let year = period_label(&Local::now());

    let first = scheduler.run_cycle().await.unwrap();
    assert!(first.created_destination);
    assert_eq!(first.row_number, Some(2));
    assert_eq!(backend.rows(&year), vec![cell("Temp"), cell("68.5")]);

    let second = scheduler.run_cycle().await.unwrap();
    assert!(!second.created_destination);
    assert_eq!(second.row_number, Some(3));
    assert_eq!(
        backend.rows(&year),
        vec![cell("Temp"), cell("68.5"), cell("70.1")]
    );
    assert_eq!(backend.calls(BackendOp::Create), 1);
    assert_eq!(backend.calls(BackendOp::Freeze), 1);
    assert_eq!(backend.frozen_rows(&year), Some(1));
}

#[tokio::test(start_paused = true)]
async fn outage_cycle_writes_nothing_and_next_cycle_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let mut bodies: Vec<Result<String, FetchError>> =
        (0..4).map(|_| Err(FetchError::Status(503))).collect();
    bodies.push(Ok(r#"[{"T1":"69.0","XX9":"ignored"}]"#.into()));
    let mut scheduler = Scheduler::new(
        ResilientFetcher::new(CannedStation::new(bodies)),
        SyncEngine::new(temp_catalog(&dir), TabularStore::new(Arc::clone(&backend))),
        TimeDelta::minutes(5),
    );

    let err = scheduler.run_cycle().await.unwrap_err();
    assert_eq!(err, PersistError::EmptyPayload);
    assert_eq!(backend.destination_count(), 0);

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.row_number, Some(2));
    assert_eq!(report.fields_skipped, 1);
}

#[tokio::test]
async fn sqlite_backed_pipeline_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("weather.sqlite3");
    let catalog = temp_catalog(&dir);
    let year = period_label(&Local::now());

    {
        let backend = SqliteBackend::open(db_path.clone()).unwrap();
        let mut engine = SyncEngine::new(Arc::clone(&catalog), TabularStore::new(backend));
        engine.persist(&r#""T1":"68.5""#.into()).await.unwrap();
    }

    let backend = SqliteBackend::open(db_path).unwrap();
    let mut engine = SyncEngine::new(catalog, TabularStore::new(backend.clone()));
    let report = engine.persist(&r#""T1":"70.1""#.into()).await.unwrap();
    assert!(!report.created_destination);
    assert_eq!(report.row_number, Some(3));

    let rows = backend
        .get_values(&year, &RangeSpec::columns(0, 0))
        .await
        .unwrap();
    assert_eq!(rows, vec![cell("Temp"), cell("68.5"), cell("70.1")]);
}
