// src/ingest/registry.rs
//! Rotation of followed feeds between poller workers.
//!
//! One mutex guards both the queue and the set of checked-out keys, so a
//! growth (`add_follow`) can never interleave with a checkout or checkin.
//! No lock is held while a worker uses a feed.

use metrics::gauge;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

use super::types::{Feed, FeedKey};
use crate::error::RegistryError;

#[derive(Default)]
struct Inner {
    queue: VecDeque<Feed>,
    checked_out: HashSet<FeedKey>,
}

impl Inner {
    fn contains(&self, key: &FeedKey) -> bool {
        self.checked_out.contains(key) || self.queue.iter().any(|f| &f.key() == key)
    }

    fn len(&self) -> usize {
        self.queue.len() + self.checked_out.len()
    }
}

pub struct FeedRegistry {
    inner: Mutex<Inner>,
    available: Notify,
    first_follow_tx: Mutex<Option<oneshot::Sender<()>>>,
    first_follow_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FeedRegistry {
    /// Build from persisted follows. Duplicate identities are dropped.
    pub fn new(feeds: Vec<Feed>) -> Self {
        let mut inner = Inner::default();
        for f in feeds {
            if inner.contains(&f.key()) {
                tracing::warn!(target: "registry", feed = %f.key(), "duplicate follow ignored");
                continue;
            }
            inner.queue.push_back(f);
        }
        gauge!("feeds_followed").set(inner.len() as f64);
        let (tx, rx) = oneshot::channel();
        Self {
            inner: Mutex::new(inner),
            available: Notify::new(),
            first_follow_tx: Mutex::new(Some(tx)),
            first_follow_rx: Mutex::new(Some(rx)),
        }
    }

    /// Number of followed feeds, queued or checked out.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feeds waiting in the queue right now.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn contains(&self, key: &FeedKey) -> bool {
        self.lock().contains(key)
    }

    /// Queued feeds in rotation order followed by the checked-out keys.
    pub fn snapshot(&self) -> (Vec<Feed>, Vec<FeedKey>) {
        let g = self.lock();
        let mut busy: Vec<FeedKey> = g.checked_out.iter().cloned().collect();
        busy.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        (g.queue.iter().cloned().collect(), busy)
    }

    /// Take the next feed, waiting until one is available.
    pub async fn checkout(&self) -> Feed {
        loop {
            if let Some(feed) = self.try_checkout() {
                return feed;
            }
            // notify_one stores a permit when nobody waits, so a checkin that
            // lands between try_checkout and this await is not lost.
            self.available.notified().await;
        }
    }

    pub fn try_checkout(&self) -> Option<Feed> {
        let mut g = self.lock();
        let feed = g.queue.pop_front()?;
        g.checked_out.insert(feed.key());
        let more = !g.queue.is_empty();
        drop(g);
        if more {
            // Hand the permit on so another idle worker re-checks the queue.
            self.available.notify_one();
        }
        Some(feed)
    }

    /// Return a checked-out feed to the back of the rotation.
    pub fn checkin(&self, feed: Feed) -> Result<(), RegistryError> {
        let key = feed.key();
        let mut g = self.lock();
        if !g.checked_out.remove(&key) {
            return Err(RegistryError::NotCheckedOut(key.to_string()));
        }
        g.queue.push_back(feed);
        drop(g);
        self.available.notify_one();
        Ok(())
    }

    /// Grow the registry by one feed. The new feed is polled first.
    pub fn add_follow(&self, feed: Feed) -> Result<(), RegistryError> {
        let key = feed.key();
        let mut g = self.lock();
        if g.contains(&key) {
            return Err(RegistryError::AlreadyFollowed(key.to_string()));
        }
        g.queue.push_front(feed);
        let n = g.len();
        drop(g);

        gauge!("feeds_followed").set(n as f64);
        self.available.notify_one();

        let first = self
            .first_follow_tx
            .lock()
            .expect("registry signal mutex poisoned")
            .take();
        if let Some(tx) = first {
            let _ = tx.send(());
            tracing::debug!(target: "registry", "signalled first follow");
        }
        Ok(())
    }

    /// Resolve once at least one feed is followed. The wake channel is
    /// consumed by the first caller; later callers only see the count.
    pub async fn wait_for_first_follow(&self) {
        if !self.is_empty() {
            return;
        }
        let rx = self
            .first_follow_rx
            .lock()
            .expect("registry signal mutex poisoned")
            .take();
        match rx {
            Some(rx) => {
                let _ = rx.await;
            }
            None => {
                while self.is_empty() {
                    self.available.notified().await;
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry mutex poisoned")
    }
}
