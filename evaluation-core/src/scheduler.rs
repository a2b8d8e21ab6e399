//! Recurring evaluation jobs, at most one per audit scope.
//!
//! Each job owns a ticker task. Tickers never run evaluations themselves:
//! they push into a bounded queue that a single dispatcher task drains,
//! spawning one evaluation per tick. A full queue drops the tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EvaluationError, Result};
use crate::types::{AuditScope, Catalog};

/// Everything a tick needs to evaluate one audit scope.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub scope: AuditScope,
    pub catalog: Catalog,
    pub interval: Duration,
}

/// Executes one tick of a job.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: &EvaluationJob) -> Result<()>;
}

struct Tick {
    job: Arc<EvaluationJob>,
    cancel: CancellationToken,
}

struct JobHandle {
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
}

pub struct Scheduler {
    runner: Arc<dyn JobRunner>,
    jobs: Mutex<HashMap<String, JobHandle>>,
    queue: mpsc::Sender<Tick>,
    /// Taken by the dispatcher when the first job is scheduled.
    pending_receiver: Mutex<Option<mpsc::Receiver<Tick>>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn JobRunner>, queue_capacity: usize) -> Self {
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            runner,
            jobs: Mutex::new(HashMap::new()),
            queue,
            pending_receiver: Mutex::new(Some(receiver)),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn is_scheduled(&self, audit_scope_id: &str) -> bool {
        self.jobs.lock().await.contains_key(audit_scope_id)
    }

    pub async fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a recurring job keyed by its audit scope id. The first tick
    /// fires immediately.
    pub async fn schedule(&self, job: EvaluationJob) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(EvaluationError::FailedPrecondition(
                "scheduler is shut down".into(),
            ));
        }
        if job.interval.is_zero() {
            return Err(EvaluationError::InvalidArgument(
                "interval must be positive".into(),
            ));
        }

        let audit_scope_id = job.scope.id.clone();
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&audit_scope_id) {
            return Err(EvaluationError::AlreadyExists(format!(
                "evaluation for audit scope '{audit_scope_id}' is already running"
            )));
        }

        self.start_dispatcher().await;

        let cancel = self.shutdown.child_token();
        let ticker = tokio::spawn(tick_loop(
            Arc::new(job),
            self.queue.clone(),
            cancel.clone(),
        ));
        jobs.insert(audit_scope_id.clone(), JobHandle { cancel, ticker });

        info!(audit_scope_id = %audit_scope_id, "evaluation job scheduled");
        Ok(())
    }

    /// Remove a job. Ticks already queued for it are discarded; an evaluation
    /// already running is left to finish.
    pub async fn unschedule(&self, audit_scope_id: &str) -> Result<()> {
        let handle = self.jobs.lock().await.remove(audit_scope_id).ok_or_else(|| {
            EvaluationError::FailedPrecondition(format!(
                "no evaluation running for audit scope '{audit_scope_id}'"
            ))
        })?;
        handle.cancel.cancel();

        info!(audit_scope_id, "evaluation job stopped");
        Ok(())
    }

    /// Stop all tickers and the dispatcher. In-flight evaluations are bounded
    /// by their own timeout and are not awaited.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let jobs: Vec<(String, JobHandle)> = self.jobs.lock().await.drain().collect();
        for (_, handle) in &jobs {
            handle.cancel.cancel();
        }
        for (audit_scope_id, handle) in jobs {
            if let Err(e) = handle.ticker.await {
                warn!(audit_scope_id = %audit_scope_id, error = %e, "ticker task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    async fn start_dispatcher(&self) {
        let Some(receiver) = self.pending_receiver.lock().await.take() else {
            return;
        };
        tokio::spawn(dispatch_loop(
            self.runner.clone(),
            receiver,
            self.shutdown.clone(),
        ));
        debug!("evaluation dispatcher started");
    }
}

async fn tick_loop(job: Arc<EvaluationJob>, queue: mpsc::Sender<Tick>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let tick = Tick { job: job.clone(), cancel: cancel.clone() };
                match queue.try_send(tick) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(audit_scope_id = %job.scope.id, "dispatch queue full, dropping tick");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    debug!(audit_scope_id = %job.scope.id, "ticker stopped");
}

async fn dispatch_loop(
    runner: Arc<dyn JobRunner>,
    mut receiver: mpsc::Receiver<Tick>,
    shutdown: CancellationToken,
) {
    loop {
        let tick = tokio::select! {
            _ = shutdown.cancelled() => break,
            tick = receiver.recv() => match tick {
                Some(tick) => tick,
                None => break,
            },
        };

        if tick.cancel.is_cancelled() {
            continue;
        }

        let runner = runner.clone();
        tokio::spawn(async move {
            let job = tick.job;
            if let Err(e) = runner.run(&job).await {
                error!(
                    audit_scope_id = %job.scope.id,
                    catalog_id = %job.catalog.id,
                    error = %e,
                    "evaluation failed, retrying on next tick"
                );
            }
        });
    }
    debug!("evaluation dispatcher stopped");
}
