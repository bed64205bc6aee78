// src/ingest/mod.rs
pub mod credentials;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod types;

use anyhow::{anyhow, Result};
use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::error::MalformedResponse;
use crate::ingest::registry::FeedRegistry;
use crate::ingest::retry::{with_backoff, RetryPolicy};
use crate::ingest::types::{Feed, FeedSource, ListingPage, Post};
use crate::pipeline::PipelineMessage;
use crate::shutdown;
use crate::site::Site;
use crate::store::Store;

/// Upper bound of ids per metadata request.
pub const METADATA_CHUNK: usize = 50;
pub const DEFAULT_MAX_PAGES: u32 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LOOKBACK_SECS: i64 = 50_000_000;

/// Everything newer than the cursor found while paginating one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub ids: Vec<String>,
    pub urls: HashMap<String, String>,
    pub new_last_post_time: i64,
    pub pages: u32,
    pub hit_boundary: bool,
}

impl Scan {
    pub fn starting_at(last_post_time: i64) -> Self {
        Self {
            new_last_post_time: last_post_time,
            ..Self::default()
        }
    }
}

/// Fold one listing page into `scan`. Returns `false` once an item at or
/// below `last_post_time` shows up, which ends pagination for the cycle.
pub fn scan_page(last_post_time: i64, page: &ListingPage, scan: &mut Scan) -> bool {
    for item in &page.items {
        let published = match item.published_time.trim().parse::<i64>() {
            Ok(t) => t,
            Err(_) => {
                tracing::warn!(
                    target: "ingest",
                    id = %item.id,
                    published_time = %item.published_time,
                    "unparseable publish time, skipping item"
                );
                continue;
            }
        };
        if published <= last_post_time {
            scan.hit_boundary = true;
            return false;
        }
        if scan.ids.contains(&item.id) {
            continue;
        }
        scan.new_last_post_time = scan.new_last_post_time.max(published);
        if let Some(url) = &item.url {
            scan.urls.insert(item.id.clone(), url.clone());
        }
        scan.ids.push(item.id.clone());
    }
    true
}

/// Walk the feed's listing from offset 0 until the cursor, the last page or
/// `max_pages`. A page that cannot be decoded ends the walk early.
pub async fn paginate(
    source: &dyn FeedSource,
    feed: &Feed,
    max_pages: u32,
    retry: &RetryPolicy,
) -> Result<Scan> {
    let mut scan = Scan::starting_at(feed.last_post_time);
    let mut offset = 0u64;
    while scan.pages < max_pages {
        let page = match with_backoff(retry, "listing request", || source.fetch_page(feed, offset)).await {
            Ok(page) => page,
            Err(e) if MalformedResponse::is_cause_of(&e) => {
                tracing::warn!(target: "ingest", feed = %feed.key(), offset, error = ?e, "skipping malformed listing page");
                break;
            }
            Err(e) => return Err(e),
        };
        scan.pages += 1;
        if page.items.is_empty() || !scan_page(feed.last_post_time, &page, &mut scan) {
            break;
        }
        match (page.has_more, page.next_offset) {
            (true, Some(next)) if next > offset => offset = next,
            _ => break,
        }
    }
    Ok(scan)
}

/// Fetch full posts for every id in `scan`, attaching the listing urls.
/// Chunks whose reply cannot be decoded are skipped.
pub async fn resolve(
    source: &dyn FeedSource,
    scan: &Scan,
    retry: &RetryPolicy,
) -> Result<Vec<Post>> {
    let mut posts = Vec::with_capacity(scan.ids.len());
    for chunk in scan.ids.chunks(METADATA_CHUNK) {
        let mut batch =
            match with_backoff(retry, "metadata request", || source.fetch_metadata(chunk)).await {
                Ok(batch) => batch,
                Err(e) if MalformedResponse::is_cause_of(&e) => {
                    tracing::warn!(target: "ingest", ids = chunk.len(), error = ?e, "skipping malformed metadata batch");
                    continue;
                }
                Err(e) => return Err(e),
            };
        for post in &mut batch {
            if let Some(url) = scan.urls.get(&post.id) {
                post.link = url.clone();
            }
        }
        posts.append(&mut batch);
    }
    Ok(posts)
}

#[derive(Clone, Copy, Debug)]
pub struct PollerCfg {
    pub interval: Duration,
    pub max_pages: u32,
    pub retry: RetryPolicy,
}

impl Default for PollerCfg {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_pages: DEFAULT_MAX_PAGES,
            retry: RetryPolicy::default(),
        }
    }
}

/// Polls the feeds of one site.
pub struct Poller {
    source: Arc<dyn FeedSource>,
    registry: Arc<FeedRegistry>,
    store: Store,
    out: mpsc::Sender<PipelineMessage>,
    cfg: PollerCfg,
}

impl Poller {
    pub fn new(
        source: Arc<dyn FeedSource>,
        registry: Arc<FeedRegistry>,
        store: Store,
        out: mpsc::Sender<PipelineMessage>,
        cfg: PollerCfg,
    ) -> Self {
        Self {
            source,
            registry,
            store,
            out,
            cfg,
        }
    }

    pub fn site(&self) -> Site {
        self.source.site()
    }

    pub fn registry(&self) -> &Arc<FeedRegistry> {
        &self.registry
    }

    /// One cycle for a checked-out feed: paginate, resolve, advance and
    /// persist the cursor, then emit. Returns the number of posts emitted.
    ///
    /// On error the cursor is left untouched.
    pub async fn poll_feed(&self, feed: &mut Feed) -> Result<usize> {
        let started = Utc::now();
        let scan = paginate(self.source.as_ref(), feed, self.cfg.max_pages, &self.cfg.retry).await?;
        let posts = resolve(self.source.as_ref(), &scan, &self.cfg.retry).await?;

        feed.advance(started, scan.new_last_post_time);
        if let Err(e) = self.store.save_feed(feed).await {
            counter!("store_errors_total").increment(1);
            tracing::error!(target: "ingest", feed = %feed.key(), error = ?e, "failed to persist cursor");
        }

        let n = posts.len();
        for post in posts {
            self.out
                .send(PipelineMessage::polled(post))
                .await
                .map_err(|_| anyhow!("write queue closed"))?;
            counter!("posts_emitted_total").increment(1);
        }

        tracing::info!(
            target: "ingest",
            feed = %feed.key(),
            pages = scan.pages,
            new = n,
            last_post_time = feed.last_post_time,
            "poll cycle done"
        );
        Ok(n)
    }

    /// Worker loop: checkout, wait out the interval, poll, checkin. Stops
    /// between cycles once shutdown is requested.
    pub async fn run_worker(self: Arc<Self>, worker: usize, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::debug!(target: "ingest", site = %self.site(), worker, "poller worker started");
        loop {
            if shutdown::is_requested(&shutdown_rx) {
                break;
            }
            let mut feed = tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown_rx) => break,
                f = self.registry.checkout() => f,
            };

            let wait = feed.remaining_wait(self.cfg.interval, Utc::now());
            if !wait.is_zero() {
                let stop = tokio::select! {
                    biased;
                    _ = shutdown::requested(&mut shutdown_rx) => true,
                    _ = tokio::time::sleep(wait) => false,
                };
                if stop {
                    self.release(feed);
                    break;
                }
            }

            let started = Utc::now();
            counter!("poll_cycles_total").increment(1);
            if let Err(e) = self.poll_feed(&mut feed).await {
                counter!("poll_errors_total").increment(1);
                feed.last_query_time = started;
                tracing::error!(target: "ingest", feed = %feed.key(), worker, error = ?e, "poll cycle failed");
            }
            self.release(feed);
        }
        tracing::debug!(target: "ingest", site = %self.site(), worker, "poller worker stopped");
    }

    fn release(&self, feed: Feed) {
        if let Err(e) = self.registry.checkin(feed) {
            tracing::error!(target: "ingest", error = %e, "checkin rejected");
        }
    }
}

/// Per-site handles: the upstream source and the follow registry.
#[derive(Clone)]
pub struct SiteHandle {
    pub source: Arc<dyn FeedSource>,
    pub registry: Arc<FeedRegistry>,
}

/// Dispatch table from site to its handles.
#[derive(Clone, Default)]
pub struct SiteTable {
    handles: HashMap<Site, SiteHandle>,
}

impl SiteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Arc<dyn FeedSource>, registry: Arc<FeedRegistry>) {
        self.handles
            .insert(source.site(), SiteHandle { source, registry });
    }

    pub fn get(&self, site: Site) -> Option<&SiteHandle> {
        self.handles.get(&site)
    }

    /// Handles in [`Site::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Site, &SiteHandle)> {
        Site::ALL
            .into_iter()
            .filter_map(|s| self.handles.get(&s).map(|h| (s, h)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::ListingItem;

    fn item(id: &str, t: &str) -> ListingItem {
        ListingItem {
            id: id.into(),
            published_time: t.into(),
            url: Some(format!("https://example.test/{id}")),
        }
    }

    #[test]
    fn scan_stops_at_cursor() {
        let page = ListingPage {
            items: vec![item("a", "300"), item("b", "200"), item("c", "50")],
            has_more: true,
            next_offset: Some(3),
        };
        let mut scan = Scan::starting_at(100);
        assert!(!scan_page(100, &page, &mut scan));
        assert_eq!(scan.ids, vec!["a", "b"]);
        assert_eq!(scan.new_last_post_time, 300);
        assert!(scan.hit_boundary);
        assert!(!scan.urls.contains_key("c"));
    }

    #[test]
    fn scan_skips_bad_times_and_duplicates() {
        let page = ListingPage {
            items: vec![item("a", "oops"), item("b", "500"), item("b", "500")],
            has_more: false,
            next_offset: None,
        };
        let mut scan = Scan::starting_at(0);
        assert!(scan_page(0, &page, &mut scan));
        assert_eq!(scan.ids, vec!["b"]);
        assert_eq!(scan.new_last_post_time, 500);
    }

    #[test]
    fn empty_scan_keeps_cursor() {
        let mut scan = Scan::starting_at(42);
        assert!(scan_page(42, &ListingPage::default(), &mut scan));
        assert_eq!(scan.new_last_post_time, 42);
        assert!(scan.ids.is_empty());
    }
}
