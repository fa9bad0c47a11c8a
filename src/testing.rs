use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use rss::{ChannelBuilder, ItemBuilder};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::storage::entities::{Feed, NewPost, User};
use crate::storage::Storage;

pub async fn user(storage: &Storage) -> User {
    let mut tx = storage.begin().await.unwrap();
    let user = tx.create_user("alice").await.unwrap();
    tx.commit().await.unwrap();

    user
}

pub async fn feed(storage: &Storage, user: &User, url: &str) -> Feed {
    let mut tx = storage.begin().await.unwrap();
    let feed = tx
        .create_feed(user.id, &format!("feed at {url}"), url)
        .await
        .unwrap()
        .unwrap();
    tx.commit().await.unwrap();

    feed
}

pub async fn reload_feed(storage: &Storage, feed_id: Uuid) -> Feed {
    let mut tx = storage.begin().await.unwrap();
    let feed = tx.get_feed(feed_id).await.unwrap().unwrap();
    tx.commit().await.unwrap();

    feed
}

pub async fn post_urls(storage: &Storage, feed_id: Uuid) -> Vec<String> {
    let mut tx = storage.begin().await.unwrap();
    let posts = tx.get_feed_posts(feed_id).await.unwrap();
    tx.commit().await.unwrap();

    posts.into_iter().map(|post| post.url).collect()
}

pub fn new_post(feed_id: Uuid, url: &str) -> NewPost {
    let now = OffsetDateTime::now_utc();

    NewPost {
        id: Uuid::new_v4(),
        title: format!("post at {url}"),
        description: None,
        url: url.into(),
        published_at: now,
        feed_id,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Debug, Clone)]
pub struct TestItem {
    pub title: &'static str,
    pub link: &'static str,
    pub description: Option<&'static str>,
    pub pub_date: &'static str,
}

impl TestItem {
    pub fn new(link: &'static str, pub_date: &'static str) -> Self {
        Self {
            title: "An item",
            link,
            description: Some("Item body"),
            pub_date,
        }
    }
}

pub fn rss_document(items: &[TestItem]) -> String {
    let mut channel = ChannelBuilder::default();
    channel
        .title("Test channel")
        .link("http://example.test/")
        .description("A channel for tests")
        .language(Some("en-us".to_owned()));

    for item in items {
        channel.item(
            ItemBuilder::default()
                .title(Some(item.title.to_owned()))
                .link(Some(item.link.to_owned()))
                .description(item.description.map(ToOwned::to_owned))
                .pub_date(Some(item.pub_date.to_owned()))
                .build(),
        );
    }

    channel.build().to_string()
}

pub fn three_item_document() -> String {
    rss_document(&[
        TestItem::new("http://example.test/1", "Mon, 02 Jan 2006 15:04:05 -0700"),
        TestItem::new("http://example.test/2", "Tue, 03 Jan 2006 10:00:00 +0000"),
        TestItem::new("http://example.test/3", "Wed, 04 Jan 2006 08:30:00 +0200"),
    ])
}

#[derive(Debug, Clone)]
pub enum Route {
    Document(String),
    Status(StatusCode),
    Delayed(Duration, String),
}

#[derive(Default)]
struct Host {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
}

type SharedHost = Arc<Mutex<Host>>;

/// A local HTTP server standing in for remote feed hosts.
pub struct FeedServer {
    addr: SocketAddr,
    host: SharedHost,
}

impl FeedServer {
    pub async fn start() -> Self {
        let host: SharedHost = Default::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .fallback(respond)
            .with_state(host.clone());

        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { addr, host }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn set(&self, path: &str, route: Route) {
        self.host.lock().unwrap().routes.insert(path.into(), route);
    }

    /// Number of requests received for `path` so far.
    pub fn hits(&self, path: &str) -> usize {
        self.host
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or_default()
    }
}

async fn respond(State(host): State<SharedHost>, uri: Uri) -> Response {
    let route = {
        let mut host = host.lock().unwrap();
        *host.hits.entry(uri.path().into()).or_default() += 1;

        host.routes.get(uri.path()).cloned()
    };

    match route {
        Some(Route::Document(body)) => rss_response(body),
        Some(Route::Status(status)) => status.into_response(),

        Some(Route::Delayed(delay, body)) => {
            tokio::time::sleep(delay).await;
            rss_response(body)
        }

        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn rss_response(body: String) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "application/rss+xml")],
        body,
    )
        .into_response()
}
