//! Tabular destination store.
//!
//! [`TabularBackend`] is the raw capability set of a spreadsheet-like service
//! (list, create, freeze, get, update). [`TabularStore`] layers the
//! idempotent ensure/read/write primitives on top, each call wrapped in the
//! bounded backend retry policy. Exhausted retries come back as
//! [`EnsureOutcome::Unavailable`], `None` or `false`; nothing here aborts the
//! process.

mod memory;
mod range;
mod sqlite;

pub use memory::{BackendOp, MemoryBackend};
pub use range::{assemble_grid, RangeSpec};
pub use sqlite::SqliteBackend;

use std::{future::Future, sync::Arc};

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    models::Row,
    retry::{retry, RetryPolicy},
};

/// A destination table (one per period).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: i64,
    pub title: String,
    pub frozen_rows: u32,
}

pub trait TabularBackend {
    fn list_destinations(&self) -> impl Future<Output = Result<Vec<Destination>>>;

    /// Fails if a destination with `title` already exists.
    fn create_destination(&self, title: &str) -> impl Future<Output = Result<Destination>>;

    fn freeze_rows(&self, destination_id: i64, rows: u32) -> impl Future<Output = Result<()>>;

    /// Values inside `range`, trimmed to the used area (see [`assemble_grid`]).
    fn get_values(&self, title: &str, range: &RangeSpec) -> impl Future<Output = Result<Vec<Row>>>;

    /// Writes `rows` anchored at the range's top-left cell. `None` cells are
    /// cleared.
    fn update_values(
        &self,
        title: &str,
        range: &RangeSpec,
        rows: &[Row],
    ) -> impl Future<Output = Result<()>>;
}

impl<T: TabularBackend> TabularBackend for Arc<T> {
    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        self.as_ref().list_destinations().await
    }

    async fn create_destination(&self, title: &str) -> Result<Destination> {
        self.as_ref().create_destination(title).await
    }

    async fn freeze_rows(&self, destination_id: i64, rows: u32) -> Result<()> {
        self.as_ref().freeze_rows(destination_id, rows).await
    }

    async fn get_values(&self, title: &str, range: &RangeSpec) -> Result<Vec<Row>> {
        self.as_ref().get_values(title, range).await
    }

    async fn update_values(&self, title: &str, range: &RangeSpec, rows: &[Row]) -> Result<()> {
        self.as_ref().update_values(title, range, rows).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Destination was already present; nothing was changed.
    Existing,
    /// Destination was created during this call.
    Created,
    /// Backend could not be reached or creation failed after retries.
    Unavailable,
}

pub struct TabularStore<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: TabularBackend> TabularStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_policy(backend, RetryPolicy::backend())
    }

    pub fn with_policy(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn find(&self, label: &str) -> Result<Option<Destination>> {
        let destinations = self.backend.list_destinations().await?;
        Ok(destinations.into_iter().find(|d| d.title == label))
    }

    /// Makes sure a destination named `label` exists, creating it and
    /// freezing its header row if not. An existing destination is never
    /// recreated, whatever state its header is in.
    pub async fn ensure_exists(&self, label: &str) -> EnsureOutcome {
        let existing = match retry(&self.policy, "list destinations", |_| self.find(label)).await {
            Ok(existing) => existing,
            Err(err) => {
                error!("Unable to list destinations; period {label} unusable this cycle: {err}");
                return EnsureOutcome::Unavailable;
            }
        };
        if existing.is_some() {
            return EnsureOutcome::Existing;
        }

        info!("Creating destination for period {label}");
        // A retried create first checks whether an earlier attempt landed.
        let created = retry(&self.policy, "create destination", |attempt| async move {
            if attempt > 1 {
                if let Some(found) = self.find(label).await? {
                    return Ok(found);
                }
            }
            self.backend.create_destination(label).await
        })
        .await;
        let created = match created {
            Ok(created) => created,
            Err(err) => {
                error!("Unable to create destination {label}: {err}");
                return EnsureOutcome::Unavailable;
            }
        };
        info!("Destination {label} created (id {})", created.id);

        match retry(&self.policy, "freeze header row", |_| {
            self.backend.freeze_rows(created.id, 1)
        })
        .await
        {
            Ok(()) => info!("Froze header row of {label}"),
            Err(err) => warn!("Destination {label} left without a frozen header row: {err}"),
        }

        EnsureOutcome::Created
    }

    /// Reads `range` from `label`. `None` means the read failed after retries
    /// and callers should not act on the destination this cycle.
    pub async fn read_range(&self, label: &str, range: &RangeSpec) -> Option<Vec<Row>> {
        let operation = format!("read {}", range.qualified(label));
        match retry(&self.policy, &operation, |_| self.backend.get_values(label, range)).await {
            Ok(rows) => Some(rows),
            Err(err) => {
                error!("Read from {label} abandoned: {err}");
                None
            }
        }
    }

    /// Positional write of `rows` at `range`. Every retry targets the same
    /// range, so a write that landed before its acknowledgement was lost is
    /// simply rewritten in place.
    pub async fn write_range(&self, label: &str, range: &RangeSpec, rows: &[Row]) -> bool {
        let operation = format!("write {}", range.qualified(label));
        match retry(&self.policy, &operation, |_| {
            self.backend.update_values(label, range, rows)
        })
        .await
        {
            Ok(()) => {
                info!("Wrote {} row(s) to {}", rows.len(), range.qualified(label));
                true
            }
            Err(err) => {
                error!("Write to {label} abandoned: {err}");
                false
            }
        }
    }

    /// Writes `header` into row 1 of `label`.
    pub async fn write_header(&self, label: &str, header: Row) -> bool {
        if header.is_empty() {
            warn!("Header for {label} is empty; catalog has no sensors");
        }
        self.write_range(label, &RangeSpec::cell(0, 0), &[header])
            .await
    }
}

/// Error for a write or read aimed at a destination that does not exist.
pub(crate) fn missing_destination(title: &str) -> anyhow::Error {
    anyhow!("destination '{title}' does not exist")
}
