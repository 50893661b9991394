use std::{
    convert::TryFrom,
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tokio::sync::oneshot;

use super::{
    assemble_grid, missing_destination, Destination, RangeSpec, TabularBackend,
};
use crate::models::Row;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_usize(value: i64, field: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// `user_version` stamped on files holding the sheets/cells layout.
const SCHEMA_VERSION: i32 = 1;

/// Lays down the sheet and cell tables on a fresh file. A file stamped by a
/// newer build is refused rather than written with an older layout.
fn prepare_schema(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read store schema version")?;

    match version {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let tx = conn
                .transaction()
                .context("failed to open schema transaction")?;
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))
                .context("failed to create sheet and cell tables")?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("failed to stamp store schema version")?;
            tx.commit().context("failed to commit store schema")?;
            info!("Created store schema version {SCHEMA_VERSION}");
            Ok(())
        }
        other => bail!(
            "store file has schema version {other}; this build only reads version {SCHEMA_VERSION}"
        ),
    }
}

fn sheet_id(conn: &Connection, title: &str) -> Result<i64> {
    conn.query_row(
        "SELECT id FROM sheets WHERE title = ?1",
        params![title],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| missing_destination(title))
}

/// Local tabular backend: one SQLite file holding every period's sheet.
///
/// The connection lives on a dedicated thread; calls are shipped to it over a
/// channel and answered through a oneshot.
#[derive(Clone)]
pub struct SqliteBackend {
    inner: Arc<DatabaseInner>,
}

impl SqliteBackend {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("weather-sync-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result = prepare_schema(&mut conn);
                let schema_ready = init_result.is_ok();
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }
                if !schema_ready {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Tabular store opened at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }
}

impl TabularBackend for SqliteBackend {
    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, title, frozen_rows FROM sheets ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(Destination {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    frozen_rows: row.get(2)?,
                })
            })?;

            let mut destinations = Vec::new();
            for destination in rows {
                destinations.push(destination?);
            }
            Ok(destinations)
        })
        .await
    }

    async fn create_destination(&self, title: &str) -> Result<Destination> {
        let title = title.to_string();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO sheets (title, frozen_rows, created_at) VALUES (?1, 0, ?2)",
                params![title, Utc::now().to_rfc3339()],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    bail!("destination '{title}' already exists");
                }
                Err(err) => return Err(err).context("failed to insert sheet"),
            }

            Ok(Destination {
                id: conn.last_insert_rowid(),
                title,
                frozen_rows: 0,
            })
        })
        .await
    }

    async fn freeze_rows(&self, destination_id: i64, rows: u32) -> Result<()> {
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sheets SET frozen_rows = ?1 WHERE id = ?2",
                    params![rows, destination_id],
                )
                .context("failed to update frozen rows")?;
            if changed == 0 {
                bail!("no destination with id {destination_id}");
            }
            Ok(())
        })
        .await
    }

    async fn get_values(&self, title: &str, range: &RangeSpec) -> Result<Vec<Row>> {
        let title = title.to_string();
        let range = *range;
        self.execute(move |conn| {
            let id = sheet_id(conn, &title)?;
            let mut stmt = conn.prepare(
                "SELECT row_idx, col_idx, value
                 FROM cells
                 WHERE sheet_id = ?1
                   AND row_idx >= ?2 AND (?3 IS NULL OR row_idx <= ?3)
                   AND col_idx >= ?4 AND (?5 IS NULL OR col_idx <= ?5)
                 ORDER BY row_idx ASC, col_idx ASC",
            )?;

            let last_row = range.last_row.map(to_i64).transpose()?;
            let last_col = range.last_col.map(to_i64).transpose()?;
            let mut rows = stmt.query(params![
                id,
                to_i64(range.first_row)?,
                last_row,
                to_i64(range.first_col)?,
                last_col,
            ])?;

            let mut cells = Vec::new();
            while let Some(row) = rows.next()? {
                cells.push((
                    to_usize(row.get(0)?, "row_idx")?,
                    to_usize(row.get(1)?, "col_idx")?,
                    row.get::<_, String>(2)?,
                ));
            }

            Ok(assemble_grid(&range, cells))
        })
        .await
    }

    async fn update_values(&self, title: &str, range: &RangeSpec, rows: &[Row]) -> Result<()> {
        let title = title.to_string();
        let range = *range;
        let rows = rows.to_vec();
        self.execute(move |conn| {
            let id = sheet_id(conn, &title)?;
            let now = Utc::now().to_rfc3339();
            let tx = conn
                .transaction()
                .context("failed to open write transaction")?;

            for (r, row) in rows.iter().enumerate() {
                let row_idx = to_i64(range.first_row + r)?;
                for (c, cell) in row.iter().enumerate() {
                    let col_idx = to_i64(range.first_col + c)?;
                    match cell {
                        Some(value) => {
                            tx.execute(
                                "INSERT INTO cells (sheet_id, row_idx, col_idx, value, updated_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5)
                                 ON CONFLICT(sheet_id, row_idx, col_idx)
                                 DO UPDATE SET value = excluded.value,
                                               updated_at = excluded.updated_at",
                                params![id, row_idx, col_idx, value, now],
                            )?;
                        }
                        None => {
                            tx.execute(
                                "DELETE FROM cells
                                 WHERE sheet_id = ?1 AND row_idx = ?2 AND col_idx = ?3",
                                params![id, row_idx, col_idx],
                            )?;
                        }
                    }
                }
            }

            tx.commit().context("failed to commit cell writes")?;
            Ok(())
        })
        .await
    }
}
