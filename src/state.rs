use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::fetch::FeedFetcher;
use crate::scheduler::Scheduler;
use crate::storage::Storage;
use crate::worker::Worker;

/// Handles shared by the HTTP server and the scheduler.
#[derive(Clone)]
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: Arc<Config>,
}

impl State {
    pub async fn new(cfg: Config) -> Result<Self> {
        let storage = Arc::new(Storage::new(&cfg.db_path).await?);

        Ok(Self::with_storage(cfg, storage))
    }

    pub fn with_storage(cfg: Config, storage: Arc<Storage>) -> Self {
        State {
            storage,
            cfg: Arc::new(cfg),
        }
    }

    pub fn scheduler(&self) -> Result<Scheduler> {
        let fetcher = FeedFetcher::new(
            self.cfg.fetch_timeout.into(),
            self.cfg.cache_dir.clone(),
        )?;
        let worker = Worker::new(self.storage.clone(), fetcher);

        Ok(Scheduler::new(
            self.storage.clone(),
            worker,
            self.cfg.concurrency,
            self.cfg.fetch_interval.into(),
        ))
    }
}
