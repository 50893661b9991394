use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Result};

use super::{assemble_grid, missing_destination, Destination, RangeSpec, TabularBackend};
use crate::models::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    List,
    Create,
    Freeze,
    Get,
    Update,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    remaining: u32,
    /// Apply the operation before failing, like a lost acknowledgement.
    after_apply: bool,
}

#[derive(Default)]
struct MemoryState {
    destinations: Vec<Destination>,
    next_id: i64,
    /// `(destination id, row, col) -> value`
    cells: BTreeMap<(i64, usize, usize), String>,
    calls: HashMap<BackendOp, u32>,
    faults: HashMap<BackendOp, Fault>,
}

/// In-process backend with call counters and scripted failures.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Makes the next `times` calls of `op` fail without side effects.
    pub fn fail_next(&self, op: BackendOp, times: u32) {
        self.lock().faults.insert(
            op,
            Fault {
                remaining: times,
                after_apply: false,
            },
        );
    }

    /// Makes the next `times` calls of `op` take effect and then report failure.
    pub fn fail_next_after_apply(&self, op: BackendOp, times: u32) {
        self.lock().faults.insert(
            op,
            Fault {
                remaining: times,
                after_apply: true,
            },
        );
    }

    pub fn calls(&self, op: BackendOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Adds a destination directly, bypassing counters and faults. Used to
    /// model state left behind by an earlier run.
    pub fn insert_destination(&self, title: &str) -> Destination {
        let mut state = self.lock();
        if let Some(existing) = state.destinations.iter().find(|d| d.title == title) {
            return existing.clone();
        }
        push_destination(&mut state, title)
    }

    /// Writes a cell directly, bypassing counters and faults.
    pub fn insert_cell(&self, title: &str, row: usize, col: usize, value: &str) {
        let id = self.insert_destination(title).id;
        self.lock().cells.insert((id, row, col), value.to_string());
    }

    pub fn destination_count(&self) -> usize {
        self.lock().destinations.len()
    }

    pub fn frozen_rows(&self, title: &str) -> Option<u32> {
        self.lock()
            .destinations
            .iter()
            .find(|d| d.title == title)
            .map(|d| d.frozen_rows)
    }

    /// Every used row of `title`, for assertions.
    pub fn rows(&self, title: &str) -> Vec<Row> {
        let state = self.lock();
        let Some(id) = id_of(&state, title) else {
            return Vec::new();
        };
        let cells = state
            .cells
            .iter()
            .filter(|((sheet, _, _), _)| *sheet == id)
            .map(|((_, row, col), value)| (*row, *col, value.clone()));
        assemble_grid(
            &RangeSpec {
                first_row: 0,
                first_col: 0,
                last_row: None,
                last_col: None,
            },
            cells,
        )
    }

    /// Counts the call and decides whether it fails. Returns `Some(after_apply)`
    /// when a fault fires.
    fn enter(&self, op: BackendOp) -> Option<bool> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        let fault = state.faults.get_mut(&op)?;
        if fault.remaining == 0 {
            return None;
        }
        fault.remaining -= 1;
        Some(fault.after_apply)
    }

    fn run<T>(&self, op: BackendOp, apply: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        match self.enter(op) {
            None => apply(&mut self.lock()),
            Some(false) => Err(anyhow!("injected {op:?} failure")),
            Some(true) => {
                apply(&mut self.lock())?;
                Err(anyhow!("injected {op:?} failure after apply"))
            }
        }
    }
}

fn id_of(state: &MemoryState, title: &str) -> Option<i64> {
    state
        .destinations
        .iter()
        .find(|d| d.title == title)
        .map(|d| d.id)
}

fn push_destination(state: &mut MemoryState, title: &str) -> Destination {
    state.next_id += 1;
    let destination = Destination {
        id: state.next_id,
        title: title.to_string(),
        frozen_rows: 0,
    };
    state.destinations.push(destination.clone());
    destination
}

impl TabularBackend for MemoryBackend {
    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        self.run(BackendOp::List, |state| Ok(state.destinations.clone()))
    }

    async fn create_destination(&self, title: &str) -> Result<Destination> {
        self.run(BackendOp::Create, |state| {
            if id_of(state, title).is_some() {
                bail!("destination '{title}' already exists");
            }
            Ok(push_destination(state, title))
        })
    }

    async fn freeze_rows(&self, destination_id: i64, rows: u32) -> Result<()> {
        self.run(BackendOp::Freeze, |state| {
            let destination = state
                .destinations
                .iter_mut()
                .find(|d| d.id == destination_id)
                .ok_or_else(|| anyhow!("no destination with id {destination_id}"))?;
            destination.frozen_rows = rows;
            Ok(())
        })
    }

    async fn get_values(&self, title: &str, range: &RangeSpec) -> Result<Vec<Row>> {
        self.run(BackendOp::Get, |state| {
            let id = id_of(state, title).ok_or_else(|| missing_destination(title))?;
            let cells = state
                .cells
                .iter()
                .filter(|((sheet, _, _), _)| *sheet == id)
                .map(|((_, row, col), value)| (*row, *col, value.clone()));
            Ok(assemble_grid(range, cells))
        })
    }

    async fn update_values(&self, title: &str, range: &RangeSpec, rows: &[Row]) -> Result<()> {
        self.run(BackendOp::Update, |state| {
            let id = id_of(state, title).ok_or_else(|| missing_destination(title))?;
            for (r, row) in rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    let key = (id, range.first_row + r, range.first_col + c);
                    match cell {
                        Some(value) => {
                            state.cells.insert(key, value.clone());
                        }
                        None => {
                            state.cells.remove(&key);
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
