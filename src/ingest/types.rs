// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::site::Site;

/// Kind of upstream listing a feed follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Tag,
    User,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Tag => "tag",
            FeedKind::User => "user",
        }
    }

    pub fn parse(text: &str) -> Option<FeedKind> {
        match text.trim().to_ascii_lowercase().as_str() {
            "tag" => Some(FeedKind::Tag),
            "user" => Some(FeedKind::User),
            _ => None,
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a feed: (site, kind, query).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub site: Site,
    pub kind: FeedKind,
    pub query: String,
}

impl FeedKey {
    /// Document id inside the site's feed collection.
    pub fn doc_id(&self) -> String {
        format!("{}:{}", self.kind, self.query)
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.site, self.kind, self.query)
    }
}

/// A followed query with its incremental polling state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub site: Site,
    #[serde(rename = "feed_type")]
    pub kind: FeedKind,
    pub query: String,
    pub last_query_time: DateTime<Utc>,
    /// High-water mark: newest publish time seen so far (unix seconds).
    pub last_post_time: i64,
}

impl Feed {
    /// A fresh follow. History is bounded to `lookback_secs` before `now`,
    /// and the first poll is due immediately.
    pub fn new_follow(
        site: Site,
        kind: FeedKind,
        query: impl Into<String>,
        now: DateTime<Utc>,
        lookback_secs: i64,
    ) -> Self {
        Self {
            site,
            kind,
            query: query.into(),
            last_query_time: DateTime::<Utc>::UNIX_EPOCH,
            last_post_time: now.timestamp().saturating_sub(lookback_secs),
        }
    }

    pub fn key(&self) -> FeedKey {
        FeedKey {
            site: self.site,
            kind: self.kind,
            query: self.query.clone(),
        }
    }

    /// `max(0, interval - (now - last_query_time))`
    pub fn remaining_wait(&self, interval: Duration, now: DateTime<Utc>) -> Duration {
        let elapsed = now
            .signed_duration_since(self.last_query_time)
            .to_std()
            .unwrap_or_default();
        interval.saturating_sub(elapsed)
    }

    /// Record a finished poll. The high-water mark never moves backwards.
    pub fn advance(&mut self, now: DateTime<Utc>, new_last_post_time: i64) {
        self.last_query_time = now;
        self.last_post_time = self.last_post_time.max(new_last_post_time);
    }
}

/// Decode `null` the same way as a missing field.
pub(crate) fn null_as_default<'de, D, T>(de: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    #[serde(default, deserialize_with = "null_as_default")]
    pub userid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sponsored: bool,
}

/// A piece of content from a followed site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub site: Site,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub title: String,
    /// Raw HTML as delivered by the site.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub is_mature: bool,
    /// Operator label; absent until the operator presses accept/reject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<bool>,
}

/// One entry of a listing page, before metadata resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub id: String,
    /// Unix seconds as sent upstream (a decimal string).
    pub published_time: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    pub has_more: bool,
    pub next_offset: Option<u64>,
}

/// Upstream site API used by the pollers and by `/add`.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    fn site(&self) -> Site;

    /// One page of the feed's listing, newest first.
    async fn fetch_page(&self, feed: &Feed, offset: u64) -> Result<ListingPage>;

    /// Full objects for at most [`crate::ingest::METADATA_CHUNK`] ids.
    /// Links are not populated by this call.
    async fn fetch_metadata(&self, ids: &[String]) -> Result<Vec<Post>>;

    /// A single post including its link. `Ok(None)` when the site does not know the id.
    async fn fetch_post(&self, id: &str) -> Result<Option<Post>>;
}
