//! Wall-clock aligned poll loop: wait for the next slot, fetch, persist.

mod cadence;

pub use cadence::{next_run_after, DEFAULT_CADENCE_MINUTES};

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    fetch::{ReadingSource, ResilientFetcher},
    models::RawPayload,
    store::TabularBackend,
    sync::{PersistError, PersistReport, SyncEngine},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

pub struct Scheduler<S, B> {
    fetcher: ResilientFetcher<S>,
    engine: SyncEngine<B>,
    cadence: TimeDelta,
}

impl<S: ReadingSource, B: TabularBackend> Scheduler<S, B> {
    pub fn new(fetcher: ResilientFetcher<S>, engine: SyncEngine<B>, cadence: TimeDelta) -> Self {
        Self {
            fetcher,
            engine,
            cadence,
        }
    }

    pub fn engine(&self) -> &SyncEngine<B> {
        &self.engine
    }

    /// One fetch + persist. A failed fetch is handed to the engine as an
    /// empty payload so the cycle ends through the same short-circuit.
    pub async fn run_cycle(&mut self) -> Result<PersistReport, PersistError> {
        let started = Instant::now();
        let payload = match self.fetcher.fetch().await {
            Ok(payload) => payload,
            Err(err) => {
                log_error!("No reading this cycle: {err}");
                RawPayload::default()
            }
        };

        let result = self.engine.persist(&payload).await;
        match &result {
            Ok(report) => match report.row_number {
                Some(row) => log_info!(
                    "Cycle finished in {}ms: row {row} of {}",
                    started.elapsed().as_millis(),
                    report.period
                ),
                None => log_info!(
                    "Cycle finished in {}ms with nothing to write",
                    started.elapsed().as_millis()
                ),
            },
            Err(err) => log_error!(
                "Cycle abandoned after {}ms: {err}",
                started.elapsed().as_millis()
            ),
        }
        result
    }

    /// Runs cycles on the cadence until `cancel_token` fires. Cancellation is
    /// only observed while waiting; a cycle in progress runs to completion.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        log_info!("Scheduler started with a {}-minute cadence", self.cadence.num_minutes());
        loop {
            let now = Utc::now();
            let next_run = next_run_after(now, self.cadence)?;
            let wait = (next_run - now).to_std().unwrap_or_default();
            log_info!("Next poll at {next_run} (in {}s)", wait.as_secs());

            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    log_info!("Scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    // Failures are already logged; the next slot is computed afresh.
                    let _ = self.run_cycle().await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::SensorCatalog,
        fetch::FetchError,
        models::SensorDescriptor,
        store::{BackendOp, MemoryBackend, TabularStore},
        sync::period_label,
    };
    use chrono::Local;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    /// Replays bodies in order and cancels `token` once the script runs dry.
    struct ScriptedStation {
        bodies: Mutex<VecDeque<Result<String, FetchError>>>,
        token: CancellationToken,
    }

    impl ReadingSource for ScriptedStation {
        async fn fetch_body(&self) -> Result<String, FetchError> {
            let mut bodies = self.bodies.lock().unwrap();
            let next = bodies
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("station offline".into())));
            if bodies.is_empty() {
                self.token.cancel();
            }
            next
        }
    }

    fn scheduler(
        bodies: Vec<Result<String, FetchError>>,
        token: &CancellationToken,
    ) -> Scheduler<ScriptedStation, MemoryBackend> {
        let station = ScriptedStation {
            bodies: Mutex::new(bodies.into()),
            token: token.clone(),
        };
        let catalog = Arc::new(SensorCatalog::from_descriptors([SensorDescriptor::new(
            "T1", 0, "Temp",
        )]));
        Scheduler::new(
            ResilientFetcher::new(station),
            SyncEngine::new(catalog, TabularStore::new(MemoryBackend::new())),
            TimeDelta::minutes(5),
        )
    }

    fn value(v: &str) -> Vec<Option<String>> {
        vec![Some(v.to_string())]
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_skips_the_write() {
        let token = CancellationToken::new();
        let failures = (0..4)
            .map(|_| Err(FetchError::Status(503)))
            .collect::<Vec<_>>();
        let mut scheduler = scheduler(failures, &token);

        let err = scheduler.run_cycle().await.unwrap_err();
        assert_eq!(err, PersistError::EmptyPayload);
        assert_eq!(scheduler.engine().store().backend().calls(BackendOp::List), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_slot_runs_nothing() {
        let token = CancellationToken::new();
        let scheduler = scheduler(vec![Ok(r#"[{"T1":"1"}]"#.into())], &token);
        token.cancel();

        scheduler.run(token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn runs_cycles_until_cancelled() {
        let token = CancellationToken::new();
        let backend = Arc::new(MemoryBackend::new());
        let station = ScriptedStation {
            bodies: Mutex::new(
                vec![
                    Ok(r#"[{"T1":"68.5"}]"#.to_string()),
                    Ok(r#"[{"T1":"70.1"}]"#.to_string()),
                ]
                .into(),
            ),
            token: token.clone(),
        };
        let catalog = Arc::new(SensorCatalog::from_descriptors([SensorDescriptor::new(
            "T1", 0, "Temp",
        )]));
        let scheduler = Scheduler::new(
            ResilientFetcher::new(station),
            SyncEngine::new(catalog, TabularStore::new(Arc::clone(&backend))),
            TimeDelta::minutes(5),
        );

        scheduler.run(token).await.unwrap();

        assert_eq!(
            backend.rows(&period_label(&Local::now())),
            vec![value("Temp"), value("68.5"), value("70.1")]
        );
        assert_eq!(backend.calls(BackendOp::Create), 1);
    }
}
