//! The polling worker loop.
//!
//! Claims the oldest runnable job, runs it through the pipeline, and
//! sleeps when the queue is empty. Stopping is cooperative: a stop signal
//! ends the loop at the next idle poll, and a job interrupted mid-run is
//! left in the running state for a later worker to reclaim.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use spindle_graph::JobStore;

use crate::pipeline::SearchPipeline;

pub struct SearchWorker {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<SearchPipeline>,
    poll_interval: Duration,
}

impl SearchWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<SearchPipeline>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            pipeline,
            poll_interval,
        }
    }

    /// Claim and process at most one job. Returns whether one was found.
    pub async fn run_once(&self) -> Result<bool> {
        match self.jobs.claim_next_job().await? {
            Some(job) => {
                self.pipeline.process(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Spawn the polling loop. The returned handle stops it.
    pub fn start(self: Arc<Self>) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            tracing::info!(poll_secs = self.poll_interval.as_secs(), "Worker started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                match self.run_once().await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "Worker iteration failed");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = stop_rx.changed() => {}
                }
            }
            tracing::info!("Worker stopped");
        });
        WorkerHandle { stop_tx, join }
    }
}

pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}
