use serde::Serialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::storage::entities::{Feed, FeedFollow, Post, User};

static DATE_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

fn format_date(date: OffsetDateTime) -> String {
    date.format(DATE_FORMAT).unwrap_or_else(|e| {
        error!("could not format the date {date}: {e:#}");
        date.to_string()
    })
}

#[derive(Serialize, Debug, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub name: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            created_at: format_date(user.created_at),
            updated_at: format_date(user.updated_at),
            name: user.name,
        }
    }
}

/// A user together with their API key; only shown to the user themselves.
#[derive(Serialize, Debug, Clone)]
pub struct PrivateUserResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub api_key: String,
}

impl From<User> for PrivateUserResponse {
    fn from(mut user: User) -> Self {
        let api_key = std::mem::take(&mut user.api_key);

        Self {
            user: user.into(),
            api_key,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FeedResponse {
    pub id: Uuid,
    pub created_at: String,
    pub updated_at: String,
    #[serde(rename = "feed_name")]
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub last_fetched_at: Option<String>,
}

impl From<Feed> for FeedResponse {
    fn from(feed: Feed) -> Self {
        Self {
            id: feed.id,
            created_at: format_date(feed.created_at),
            updated_at: format_date(feed.updated_at),
            name: feed.name,
            url: feed.url,
            user_id: feed.user_id,
            last_fetched_at: feed.last_fetched_at.map(format_date),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct PostResponse {
    pub id: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: String,
    pub url: String,
    pub feed_id: Uuid,
}

impl From<Post> for PostResponse {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            created_at: format_date(post.created_at),
            updated_at: format_date(post.updated_at),
            title: post.title,
            description: post.description,
            published_at: format_date(post.published_at),
            url: post.url,
            feed_id: post.feed_id,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FeedFollowResponse {
    pub id: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub user_id: Uuid,
    pub feed_id: Uuid,
}

impl From<FeedFollow> for FeedFollowResponse {
    fn from(follow: FeedFollow) -> Self {
        Self {
            id: follow.id,
            created_at: format_date(follow.created_at),
            updated_at: format_date(follow.updated_at),
            user_id: follow.user_id,
            feed_id: follow.feed_id,
        }
    }
}

pub fn collect<T, R: From<T>>(items: Vec<T>) -> Vec<R> {
    items.into_iter().map(R::from).collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn dates_are_rendered_to_the_minute() {
        assert_eq!(format_date(datetime!(2024-03-05 07:08:09.5 UTC)), "2024-03-05 07:08");
    }

    #[test]
    fn private_users_carry_their_key_inline() {
        let now = datetime!(2024-03-05 07:08 UTC);
        let user = User {
            id: Uuid::nil(),
            name: "alice".into(),
            api_key: "k".repeat(64),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(PrivateUserResponse::from(user)).unwrap();

        assert_eq!(json["name"], "alice");
        assert_eq!(json["api_key"], "k".repeat(64));
        assert_eq!(json["created_at"], "2024-03-05 07:08");
    }
}
