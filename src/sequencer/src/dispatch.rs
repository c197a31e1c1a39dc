//! Drain dispatcher: finds buckets with work, drains them on a bounded pool
//! of workers and reaps the empty ones.

use crate::bucket::{self, Bucket};
use crate::drain::{DrainReport, DrainingEngine};
use crate::lease::BucketLeases;
use crate::reaper::Reaper;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};

pub struct DrainDispatcher {
    destination: PathBuf,
    interval: Duration,
    reserved: Vec<String>,
    engine: Arc<DrainingEngine>,
    leases: BucketLeases,
    workers: Arc<Semaphore>,
    reaper: Reaper,
    tasks: JoinSet<DrainReport>,
}

impl DrainDispatcher {
    pub fn new(
        destination: impl Into<PathBuf>,
        interval: Duration,
        reserved: Vec<String>,
        workers: usize,
        engine: DrainingEngine,
    ) -> Self {
        let destination = destination.into();
        let leases = BucketLeases::new();
        let reaper = Reaper::new(&destination, reserved.clone()).with_leases(leases.clone());
        Self {
            destination,
            interval,
            reserved,
            engine: Arc::new(engine),
            leases,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            reaper,
            tasks: JoinSet::new(),
        }
    }

    /// Leases held by running drains
    pub fn leases(&self) -> &BucketLeases {
        &self.leases
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    /// Start a drain for every bucket that has queued items, is not halted and
    /// is not already being drained. Returns the number of drains started.
    pub async fn dispatch_round(&mut self) -> io::Result<usize> {
        let buckets = bucket::list_buckets(&self.destination, &self.reserved).await?;
        let mut started = 0;
        for bucket in buckets {
            let Some(lease) = self.leases.try_acquire(bucket.path()) else {
                continue;
            };
            if !has_work(&bucket).await {
                continue;
            }

            let engine = Arc::clone(&self.engine);
            let workers = Arc::clone(&self.workers);
            self.tasks.spawn(async move {
                let _lease = lease;
                // The semaphore is never closed
                let _permit = workers.acquire_owned().await.ok();
                engine.drain(&bucket).await
            });
            started += 1;
        }
        if started > 0 {
            tracing::debug!(destination = %self.destination.display(), started, "Dispatched drains");
        }
        Ok(started)
    }

    /// Reports of drains that have finished since the last call
    pub fn collect_finished(&mut self) -> Vec<DrainReport> {
        let mut reports = Vec::new();
        while let Some(joined) = self.tasks.try_join_next() {
            record(&mut reports, joined);
        }
        reports
    }

    /// Wait for every running drain to finish
    pub async fn settle(&mut self) -> Vec<DrainReport> {
        let mut reports = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            record(&mut reports, joined);
        }
        reports
    }

    /// One full pass: dispatch drains, then reap whatever is empty and idle
    pub async fn tick(&mut self) {
        self.collect_finished();
        if let Err(e) = self.dispatch_round().await {
            tracing::error!(destination = %self.destination.display(), error = %e, "Error dispatching drains");
        }
        match self.reaper.reap().await {
            Ok(report) if !report.deleted.is_empty() => {
                tracing::debug!(deleted = report.deleted.len(), kept = report.kept, "Reaped empty buckets")
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(destination = %self.destination.display(), error = %e, "Error reaping buckets")
            }
        }
    }

    /// Dispatch until shutdown, then wait for running drains. `started` fires
    /// once the first round has been dispatched.
    pub async fn run(mut self, started: oneshot::Sender<()>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(destination = %self.destination.display(), interval = ?self.interval, "Started drain dispatcher");
        let mut started = Some(started);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            self.tick().await;
            if let Some(started) = started.take() {
                // The admission side may already be gone
                let _ = started.send(());
            }
        }

        tracing::info!(running = self.tasks.len(), "Waiting for running drains");
        self.settle().await;
        tracing::info!(destination = %self.destination.display(), "Drain dispatcher stopped");
    }
}

async fn has_work(bucket: &Bucket) -> bool {
    match bucket.is_halted().await {
        Ok(true) => return false,
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(bucket = %bucket.path().display(), error = %e, "Unable to check halt flag");
            return false;
        }
    }
    match bucket.items().await {
        Ok(items) => !items.is_empty(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(bucket = %bucket.path().display(), error = %e, "Unable to list bucket");
            false
        }
    }
}

fn record(reports: &mut Vec<DrainReport>, joined: Result<DrainReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => reports.push(report),
        Err(e) => tracing::error!(error = %e, "Drain task failed"),
    }
}
