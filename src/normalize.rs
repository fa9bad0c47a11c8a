use std::error::Error;
use std::fmt::{self, Display};

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::fetch::RawItem;
use crate::storage::entities::NewPost;

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`.
///
/// Names match in any case, and a fractional part may follow the seconds.
static PUB_DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short case_sensitive:false], [day] [month repr:short case_sensitive:false] \
        [year] [hour]:[minute]:[second][optional [.[subsecond]]] \
        [offset_hour sign:mandatory][offset_minute]"
);

#[derive(Debug)]
pub enum NormalizeError {
    PublishedAt {
        value: String,
        source: time::error::Parse,
    },
}

impl Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublishedAt { value, .. } => {
                write!(f, "could not parse the publication date `{value}`")
            }
        }
    }
}

impl Error for NormalizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PublishedAt { source, .. } => Some(source),
        }
    }
}

pub fn parse_pub_date(value: &str) -> Result<OffsetDateTime, NormalizeError> {
    OffsetDateTime::parse(value.trim(), PUB_DATE_FORMAT)
        .map(|date| date.to_offset(UtcOffset::UTC))
        .map_err(|source| NormalizeError::PublishedAt {
            value: value.into(),
            source,
        })
}

/// Turns a raw item into a post candidate for `feed_id`.
pub fn normalize(item: RawItem, feed_id: Uuid) -> Result<NewPost, NormalizeError> {
    let published_at = parse_pub_date(&item.pub_date)?;
    let description = Some(item.description).filter(|description| !description.is_empty());
    let now = OffsetDateTime::now_utc();

    Ok(NewPost {
        id: Uuid::new_v4(),
        title: item.title,
        description,
        url: item.link,
        published_at,
        feed_id,
        created_at: now,
        updated_at: now,
    })
}
