use std::sync::Arc;

use anyhow::Result;
use time::OffsetDateTime;
use tracing::{debug, error, info, trace, warn};

use crate::fetch::{FeedFetcher, ParsedFeed};
use crate::normalize::normalize;
use crate::storage::entities::{Feed, InsertOutcome};
use crate::storage::Storage;

/// What happened to the items of one feed during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    /// Items present in the fetched document.
    pub observed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Items dropped by the normalizer or rejected by the store.
    pub skipped: usize,
}

/// Ingests one feed per call.
#[derive(Clone)]
pub struct Worker {
    storage: Arc<Storage>,
    fetcher: FeedFetcher,
}

impl Worker {
    pub fn new(storage: Arc<Storage>, fetcher: FeedFetcher) -> Self {
        Self { storage, fetcher }
    }

    /// Marks the feed as fetched, then fetches it and stores its new items.
    ///
    /// Failures end this feed's cycle and are logged here. Returns `None` if the feed was not
    /// fetched at all.
    pub async fn process_feed(&self, feed: Feed) -> Option<FeedReport> {
        if let Err(e) = self.mark_fetched(&feed).await {
            error!("Could not mark the feed `{}` as fetched: {e:#}", feed.name);
            return None;
        }

        let parsed = match self.fetcher.fetch(&feed.url).await {
            Ok(parsed) => parsed,

            Err(e) => {
                error!("Could not fetch the feed `{}`: {e:#}", feed.name);
                return None;
            }
        };

        debug!(
            channel.title = %parsed.channel.title,
            channel.link = %parsed.channel.link,
            channel.description = %parsed.channel.description,
            channel.language = %parsed.channel.language,
            "Fetched the feed document"
        );
        let report = self.store_items(&feed, parsed).await;

        info!(
            "Feed `{}` collected, {} posts found",
            feed.name, report.observed
        );
        debug!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Finished ingesting the feed"
        );

        Some(report)
    }

    async fn mark_fetched(&self, feed: &Feed) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        tx.mark_feed_fetched(feed.id, OffsetDateTime::now_utc()).await?;
        tx.commit().await
    }

    async fn store_items(&self, feed: &Feed, parsed: ParsedFeed) -> FeedReport {
        let mut report = FeedReport {
            observed: parsed.items.len(),
            ..Default::default()
        };

        for item in parsed.items {
            let link = item.link.clone();

            let post = match normalize(item, feed.id) {
                Ok(post) => post,

                Err(e) => {
                    warn!(%link, "Skipping an item: {e:#}");
                    report.skipped += 1;
                    continue;
                }
            };

            let outcome = async {
                let mut tx = self.storage.begin().await?;
                let outcome = tx.insert_post(&post).await?;
                tx.commit().await?;

                anyhow::Ok(outcome)
            }
            .await;

            match outcome {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,

                Ok(InsertOutcome::Duplicate) => {
                    trace!(%link, "Post already known");
                    report.duplicates += 1;
                }

                Err(e) => {
                    error!(%link, "Could not store a post: {e:#}");
                    report.skipped += 1;
                }
            }
        }

        report
    }
}
