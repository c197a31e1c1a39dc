//! Polls the staging area and admits whatever lands there.

use crate::admit::{Admission, BucketingEngine};
use crate::ordering::{EntryKind, list_sorted};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval};

/// How long a stranded item is left alone before admission is tried again
pub const STRANDED_RETRY: Duration = Duration::from_secs(300);

/// Single admission loop over the staging directory.
///
/// Only one of these may run against a destination root; admissions are
/// processed one at a time so that a key never ends up with two buckets.
pub struct AdmissionInbox {
    inbox: PathBuf,
    interval: Duration,
    engine: BucketingEngine,
    stranded_retry: Duration,
    stranded: HashMap<PathBuf, Instant>,
}

impl AdmissionInbox {
    pub fn new(inbox: impl Into<PathBuf>, interval: Duration, engine: BucketingEngine) -> Self {
        Self {
            inbox: inbox.into(),
            interval,
            engine,
            stranded_retry: STRANDED_RETRY,
            stranded: HashMap::new(),
        }
    }

    /// Back-off before a stranded item is admitted again
    pub fn with_stranded_retry(mut self, retry: Duration) -> Self {
        self.stranded_retry = retry;
        self
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// Admit every staged item, oldest first. Hidden files are left alone so
    /// that producers can write under a temporary dot-name and rename.
    ///
    /// An item that could be neither routed nor quarantined is skipped until
    /// the stranded back-off has passed.
    pub async fn poll_once(&mut self) -> io::Result<Vec<Admission>> {
        let staged = match list_sorted(&self.inbox, EntryKind::File, |name| !name.starts_with('.'))
            .await
        {
            Ok(staged) => staged,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let listed: HashSet<&PathBuf> = staged.iter().collect();
        self.stranded.retain(|item, _| listed.contains(item));

        let now = Instant::now();
        let due: Vec<&PathBuf> = staged
            .iter()
            .filter(|item| match self.stranded.get(*item) {
                Some(since) => now.duration_since(*since) >= self.stranded_retry,
                None => true,
            })
            .collect();
        if !due.is_empty() {
            tracing::debug!(inbox = %self.inbox.display(), count = due.len(), skipped = staged.len() - due.len(), "Admitting staged items");
        }

        let mut admissions = Vec::with_capacity(due.len());
        for item in due {
            let admission = self.engine.admit(item).await;
            if matches!(admission, Admission::Stranded { .. }) {
                if self.stranded.insert(item.clone(), now).is_none() {
                    tracing::warn!(item = %item.display(), retry = ?self.stranded_retry, "Item stranded in staging, backing off");
                }
            } else {
                self.stranded.remove(item);
            }
            admissions.push(admission);
        }
        Ok(admissions)
    }

    /// Poll until shutdown. Admission starts only after `start` fires, so that
    /// buckets left over from a previous run get a drain before new items
    /// are queued behind them.
    pub async fn run(mut self, start: oneshot::Receiver<()>, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = start => {}
            _ = shutdown.changed() => {
                tracing::info!(inbox = %self.inbox.display(), "Admission stopped before it started");
                return;
            }
        }
        tracing::info!(inbox = %self.inbox.display(), interval = ?self.interval, "Started admission");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = self.poll_once().await {
                tracing::error!(inbox = %self.inbox.display(), error = %e, "Error polling inbox");
            }
        }
        tracing::info!(inbox = %self.inbox.display(), "Admission stopped");
    }
}
