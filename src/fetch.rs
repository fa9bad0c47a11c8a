use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use http_cache_reqwest::{CACacheManager, Cache, HttpCache};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use rss::Channel;
use tracing::{debug, instrument};

const USER_AGENT: &str = concat!("rssagg/", env!("CARGO_PKG_VERSION"));

/// An RSS `<item>` as it appears in the document.
///
/// Missing elements are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub channel: ChannelInfo,
    pub items: Vec<RawItem>,
}

impl From<Channel> for ParsedFeed {
    fn from(channel: Channel) -> Self {
        let items = channel
            .items()
            .iter()
            .map(|item| RawItem {
                title: item.title().unwrap_or_default().into(),
                link: item.link().unwrap_or_default().into(),
                description: item.description().unwrap_or_default().into(),
                pub_date: item.pub_date().unwrap_or_default().into(),
            })
            .collect();

        ParsedFeed {
            channel: ChannelInfo {
                title: channel.title().into(),
                link: channel.link().into(),
                description: channel.description().into(),
                language: channel.language().unwrap_or_default().into(),
            },
            items,
        }
    }
}

pub fn parse(body: &[u8]) -> Result<ParsedFeed> {
    Channel::read_from(body)
        .map(ParsedFeed::from)
        .context("could not parse the RSS document")
}

/// Retrieves RSS documents over HTTP.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct FeedFetcher {
    http_client: ClientWithMiddleware,
}

impl FeedFetcher {
    pub fn new(timeout: Duration, cache_dir: Option<PathBuf>) -> Result<Self> {
        let builder = ClientBuilder::new(
            reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(timeout)
                .build()
                .context("could not create an HTTP client")?,
        );

        let builder = if let Some(path) = cache_dir {
            debug!("Using an HTTP cache at {}", path.display());
            builder.with(Cache(HttpCache {
                mode: Default::default(),
                manager: CACacheManager { path },
                options: Default::default(),
            }))
        } else {
            builder
        };

        Ok(Self {
            http_client: builder.build(),
        })
    }

    /// Issues a single GET request and parses the response as an RSS channel.
    #[instrument(level = "DEBUG", skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(Into::into)
            .and_then(|r| r.error_for_status().context("server returned an error"))
            .with_context(|| anyhow!("could not fetch `{url}`"))?;
        let body = response
            .bytes()
            .await
            .with_context(|| anyhow!("could not read the response when fetching `{url}`"))?;
        debug!(len = body.len(), "Received the feed document");

        parse(&body).with_context(|| anyhow!("`{url}` is not a valid RSS feed"))
    }
}
