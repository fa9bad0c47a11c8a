use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, info_span, Instrument};

use crate::storage::entities::Feed;
use crate::storage::Storage;
use crate::worker::Worker;

/// Polls the stalest feeds on a fixed cadence.
///
/// Each cycle selects at most `concurrency` feeds, runs one worker per feed, and waits for all
/// of them before the next cycle can start. Cycles never overlap.
pub struct Scheduler {
    storage: Arc<Storage>,
    worker: Worker,
    concurrency: NonZeroU32,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        storage: Arc<Storage>,
        worker: Worker,
        concurrency: NonZeroU32,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            worker,
            concurrency,
            interval,
        }
    }

    /// Runs cycles until the task is dropped.
    pub async fn run(self) {
        async move {
            info!(
                "Polling up to {} feeds every {}s",
                self.concurrency,
                self.interval.as_secs_f64()
            );

            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            for cycle in 1u64.. {
                ticker.tick().await;

                self.run_cycle()
                    .instrument(info_span!("cycle", %cycle))
                    .await;
            }
        }
        .instrument(info_span!("scheduler"))
        .await
    }

    /// Selects due feeds, processes them concurrently, and returns once every worker is done.
    ///
    /// Returns the number of feeds dispatched.
    pub async fn run_cycle(&self) -> usize {
        let feeds = match self.select_due_feeds().await {
            Ok(feeds) => feeds,

            Err(e) => {
                error!("Could not select feeds to fetch: {e:#}");
                return 0;
            }
        };

        let dispatched = feeds.len();
        debug!("Dispatching {dispatched} feeds");

        let mut workers = JoinSet::new();

        for feed in feeds {
            let worker = self.worker.clone();
            let span = info_span!("feed", name = %feed.name, id = %feed.id);

            workers.spawn(
                async move {
                    worker.process_feed(feed).await;
                }
                .instrument(span),
            );
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("A feed worker terminated abnormally: {e}");
            }
        }

        dispatched
    }

    async fn select_due_feeds(&self) -> Result<Vec<Feed>> {
        let mut tx = self.storage.begin().await?;
        let feeds = tx.select_feeds_due_for_fetch(self.concurrency.get()).await?;
        tx.commit().await?;

        Ok(feeds)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use ::time::OffsetDateTime;
    use axum::http::StatusCode;

    use super::*;
    use crate::fetch::FeedFetcher;
    use crate::testing::{self, FeedServer, Route};

    struct Fixture {
        server: FeedServer,
        storage: Arc<Storage>,
        user: crate::storage::entities::User,
    }

    impl Fixture {
        async fn new() -> Self {
            let server = FeedServer::start().await;
            let storage = Arc::new(Storage::in_memory().await.unwrap());
            let user = testing::user(&storage).await;

            Self {
                server,
                storage,
                user,
            }
        }

        async fn feed(&self, path: &str) -> Feed {
            testing::feed(&self.storage, &self.user, &self.server.url(path)).await
        }

        fn scheduler(&self, concurrency: u32, timeout: Duration) -> Scheduler {
            let worker = Worker::new(
                self.storage.clone(),
                FeedFetcher::new(timeout, None).unwrap(),
            );

            Scheduler::new(
                self.storage.clone(),
                worker,
                NonZeroU32::new(concurrency).unwrap(),
                Duration::from_secs(60),
            )
        }
    }

    #[tokio::test]
    async fn first_cycle_ingests_a_never_fetched_feed() {
        let f = Fixture::new().await;
        f.server.set("/rss", Route::Document(testing::three_item_document()));
        let feed = f.feed("/rss").await;
        let scheduler = f.scheduler(10, Duration::from_secs(10));
        let cycle_start = OffsetDateTime::now_utc();

        assert_eq!(scheduler.run_cycle().await, 1);

        assert_eq!(testing::post_urls(&f.storage, feed.id).await.len(), 3);
        let feed = testing::reload_feed(&f.storage, feed.id).await;
        assert!(feed.last_fetched_at.unwrap() >= cycle_start);
    }

    #[tokio::test]
    async fn second_cycle_adds_no_duplicates() {
        let f = Fixture::new().await;
        f.server.set("/rss", Route::Document(testing::three_item_document()));
        let feed = f.feed("/rss").await;
        let scheduler = f.scheduler(10, Duration::from_secs(10));

        scheduler.run_cycle().await;
        let first_fetch = testing::reload_feed(&f.storage, feed.id)
            .await
            .last_fetched_at
            .unwrap();
        scheduler.run_cycle().await;
        let second_fetch = testing::reload_feed(&f.storage, feed.id)
            .await
            .last_fetched_at
            .unwrap();

        assert_eq!(testing::post_urls(&f.storage, feed.id).await.len(), 3);
        assert!(second_fetch > first_fetch);
    }

    #[tokio::test]
    async fn timed_out_fetch_adds_nothing_but_marks_the_feed() {
        let f = Fixture::new().await;
        f.server.set(
            "/rss",
            Route::Delayed(Duration::from_secs(5), testing::three_item_document()),
        );
        let feed = f.feed("/rss").await;
        let scheduler = f.scheduler(10, Duration::from_millis(200));
        let cycle_start = OffsetDateTime::now_utc();

        assert_eq!(scheduler.run_cycle().await, 1);

        assert!(testing::post_urls(&f.storage, feed.id).await.is_empty());
        let feed = testing::reload_feed(&f.storage, feed.id).await;
        assert!(feed.last_fetched_at.unwrap() >= cycle_start);
    }

    #[tokio::test]
    async fn concurrency_bounds_each_cycle() {
        let f = Fixture::new().await;
        f.server.set("/a", Route::Document(testing::three_item_document()));
        f.server.set("/b", Route::Document(testing::three_item_document()));
        let a = f.feed("/a").await;
        let b = f.feed("/b").await;
        let scheduler = f.scheduler(1, Duration::from_secs(10));

        assert_eq!(scheduler.run_cycle().await, 1);
        assert!(testing::reload_feed(&f.storage, a.id)
            .await
            .last_fetched_at
            .is_some());
        assert!(testing::reload_feed(&f.storage, b.id)
            .await
            .last_fetched_at
            .is_none());

        assert_eq!(scheduler.run_cycle().await, 1);
        assert!(testing::reload_feed(&f.storage, b.id)
            .await
            .last_fetched_at
            .is_some());
        assert_eq!(testing::post_urls(&f.storage, b.id).await.len(), 3);
    }

    #[tokio::test]
    async fn failing_feeds_do_not_affect_their_siblings() {
        let f = Fixture::new().await;
        f.server.set("/ok", Route::Document(testing::three_item_document()));
        f.server.set("/broken", Route::Status(StatusCode::BAD_GATEWAY));
        let ok = f.feed("/ok").await;
        let broken = f.feed("/broken").await;
        let scheduler = f.scheduler(10, Duration::from_secs(10));

        assert_eq!(scheduler.run_cycle().await, 2);

        assert_eq!(testing::post_urls(&f.storage, ok.id).await.len(), 3);
        assert!(testing::post_urls(&f.storage, broken.id).await.is_empty());
        assert!(testing::reload_feed(&f.storage, broken.id)
            .await
            .last_fetched_at
            .is_some());
    }

    #[tokio::test]
    async fn feeds_of_one_cycle_are_fetched_in_parallel() {
        let f = Fixture::new().await;
        let delay = Duration::from_millis(600);
        f.server.set("/a", Route::Delayed(delay, testing::three_item_document()));
        f.server.set("/b", Route::Delayed(delay, testing::three_item_document()));
        let a = f.feed("/a").await;
        let b = f.feed("/b").await;
        let scheduler = f.scheduler(2, Duration::from_secs(10));

        let started = Instant::now();
        assert_eq!(scheduler.run_cycle().await, 2);
        let elapsed = started.elapsed();

        assert!(elapsed >= delay, "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
        assert_eq!(testing::post_urls(&f.storage, a.id).await.len(), 3);
        assert_eq!(testing::post_urls(&f.storage, b.id).await.len(), 3);
    }

    #[tokio::test]
    async fn select_failure_dispatches_nothing() {
        let f = Fixture::new().await;
        f.server.set("/rss", Route::Document(testing::three_item_document()));
        f.feed("/rss").await;
        f.storage.execute_raw("DROP TABLE feeds").await.unwrap();
        let scheduler = f.scheduler(10, Duration::from_secs(10));

        assert_eq!(scheduler.run_cycle().await, 0);
        assert_eq!(f.server.hits("/rss"), 0);
    }

    #[tokio::test]
    async fn empty_feed_set_completes_trivially() {
        let f = Fixture::new().await;
        let scheduler = f.scheduler(10, Duration::from_secs(10));

        assert_eq!(scheduler.run_cycle().await, 0);
    }

    #[tokio::test]
    async fn run_keeps_cycling_on_the_interval() {
        let f = Fixture::new().await;
        let feed = f.feed("/missing").await;
        let mut scheduler = f.scheduler(10, Duration::from_secs(10));
        scheduler.interval = Duration::from_millis(200);

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = testing::reload_feed(&f.storage, feed.id).await.last_fetched_at;
        assert!(first.is_some());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = testing::reload_feed(&f.storage, feed.id).await.last_fetched_at;
        assert!(second > first);
        assert!(!task.is_finished());

        task.abort();
    }
}
