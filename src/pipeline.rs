//! Layer-ordered scheduling of job runs.
//!
//! Jobs are grouped by [`Layer`]; a layer starts only after every job of the
//! previous one has finished. Inside a layer jobs run as concurrent tasks,
//! bounded by a semaphore. A failed job does not stop the round: its table is
//! left empty and the failure is reported in the [`PipelineOutcome`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info};

use crate::error::JobError;
use crate::layers::{JobContext, JobKind, Layer};
use crate::runner::JobReport;

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub job: &'static str,
    pub table: &'static str,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PipelineOutcome {
    pub reports: Vec<JobReport>,
    pub failures: Vec<JobFailure>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Groups jobs by layer in dependency order, dropping duplicates.
pub fn plan(jobs: &[JobKind]) -> Vec<(Layer, Vec<JobKind>)> {
    let mut layers: BTreeMap<Layer, Vec<JobKind>> = BTreeMap::new();
    for &job in jobs {
        let bucket = layers.entry(job.layer()).or_default();
        if !bucket.contains(&job) {
            bucket.push(job);
        }
    }
    layers.into_iter().collect()
}

/// Executes a plan with `run` producing each job's future.
pub async fn run_planned<F, Fut>(
    plan: Vec<(Layer, Vec<JobKind>)>,
    concurrency: usize,
    run: F,
) -> Result<PipelineOutcome>
where
    F: Fn(JobKind) -> Fut,
    Fut: Future<Output = Result<JobReport, JobError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut outcome = PipelineOutcome::default();

    for (layer, jobs) in plan {
        info!(%layer, jobs = jobs.len(), "Layer started");
        let mut tasks = Vec::with_capacity(jobs.len());

        for job in jobs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("job semaphore closed")?;
            let span = tracing::info_span!("pipeline_job", job = job.name(), %layer);
            let fut = run(job);
            let task = tokio::spawn(
                async move {
                    let _permit = permit;
                    fut.await
                }
                .instrument(span),
            );
            tasks.push((job, task));
        }

        for (job, task) in tasks {
            let failure = match task.await {
                Ok(Ok(report)) => {
                    outcome.reports.push(report);
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", anyhow::Error::from(e)),
                Err(e) => format!("job task aborted: {e}"),
            };
            error!(job = job.name(), table = job.table().name, error = %failure, "Job failed");
            outcome.failures.push(JobFailure {
                job: job.name(),
                table: job.table().name,
                error: failure,
            });
        }
    }

    Ok(outcome)
}

/// Runs one round of the selected jobs against `ctx`.
pub async fn run_pipeline(
    ctx: &JobContext,
    jobs: &[JobKind],
    concurrency: usize,
) -> Result<PipelineOutcome> {
    let started = Instant::now();
    let outcome = run_planned(plan(jobs), concurrency, |job| {
        let ctx = ctx.clone();
        async move { job.run(&ctx).await }
    })
    .await?;

    info!(
        succeeded = outcome.reports.len(),
        failed = outcome.failures.len(),
        rows = outcome.reports.iter().map(|r| r.rows).sum::<usize>(),
        elapsed_ms = started.elapsed().as_millis(),
        "Pipeline round finished"
    );
    Ok(outcome)
}
