// tests/common/mod.rs
//
// Shared fakes for the integration tests: a scripted feed source, a chat
// that records everything sent to it, a configurable classifier and a
// dispatcher harness wired to all of them.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use adopt_detector::chat::types::{CallbackQuery, Chat, Message, OutgoingMessage, Update};
use adopt_detector::chat::{ChatApi, Dispatcher};
use adopt_detector::classifier::{Classification, Classifier};
use adopt_detector::error::ChatError;
use adopt_detector::ingest::registry::FeedRegistry;
use adopt_detector::ingest::types::{Author, Feed, FeedSource, ListingItem, ListingPage, Post};
use adopt_detector::ingest::SiteTable;
use adopt_detector::pipeline::PipelineMessage;
use adopt_detector::site::Site;
use adopt_detector::store::{DocumentStore, MemoryStore, Store};

pub const CHAT: i64 = 4242;

pub fn post(id: &str) -> Post {
    Post {
        id: id.into(),
        site: Site::DeviantArt,
        link: String::new(),
        author: Author {
            userid: "u1".into(),
            username: "artist".into(),
        },
        title: format!("Adopt {id}"),
        description: "<b>open</b>".into(),
        tags: vec![],
        is_mature: false,
        notify: None,
    }
}

pub fn linked_post(id: &str) -> Post {
    Post {
        link: format!("https://www.deviantart.com/artist/art/{id}"),
        ..post(id)
    }
}

pub fn item(id: &str, published: i64) -> ListingItem {
    ListingItem {
        id: id.into(),
        published_time: published.to_string(),
        url: Some(format!("https://www.deviantart.com/artist/art/{id}")),
    }
}

pub fn page(items: Vec<ListingItem>, has_more: bool, next_offset: Option<u64>) -> ListingPage {
    ListingPage {
        items,
        has_more,
        next_offset,
    }
}

// ---------- feed source ----------

#[derive(Default)]
pub struct MockSource {
    pages: Mutex<VecDeque<Result<ListingPage, String>>>,
    known: Mutex<HashMap<String, Post>>,
    pub offsets: Mutex<Vec<u64>>,
    pub metadata_calls: Mutex<Vec<Vec<String>>>,
    pub fail_metadata: AtomicBool,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response of the next `fetch_page` call.
    pub fn push_page(&self, page: ListingPage) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_error(&self, msg: &str) {
        self.pages.lock().unwrap().push_back(Err(msg.to_string()));
    }

    /// Make `fetch_post` find this post.
    pub fn know(&self, post: Post) {
        self.known.lock().unwrap().insert(post.id.clone(), post);
    }

    pub fn page_calls(&self) -> usize {
        self.offsets.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl FeedSource for MockSource {
    fn site(&self) -> Site {
        Site::DeviantArt
    }

    async fn fetch_page(&self, _feed: &Feed, offset: u64) -> Result<ListingPage> {
        self.offsets.lock().unwrap().push(offset);
        match self.pages.lock().unwrap().pop_front() {
            Some(Ok(p)) => Ok(p),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(ListingPage::default()),
        }
    }

    async fn fetch_metadata(&self, ids: &[String]) -> Result<Vec<Post>> {
        self.metadata_calls.lock().unwrap().push(ids.to_vec());
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(anyhow!("metadata unavailable"));
        }
        Ok(ids.iter().map(|id| post(id)).collect())
    }

    async fn fetch_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.known.lock().unwrap().get(id).cloned())
    }
}

// ---------- chat ----------

#[derive(Default)]
pub struct RecordingChat {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
    pub answered: Mutex<Vec<String>>,
    next_id: AtomicI64,
    /// Texts longer than this are refused as too long.
    pub max_len: Mutex<Option<usize>>,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl ChatApi for RecordingChat {
    async fn send(&self, msg: &OutgoingMessage) -> Result<i64, ChatError> {
        if let Some(max) = *self.max_len.lock().unwrap() {
            if msg.text.chars().count() > max {
                return Err(ChatError::MessageTooLong);
            }
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChatError> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

// ---------- classifier ----------

pub struct MockClassifier {
    pub score: Mutex<f64>,
    pub notify: AtomicBool,
    pub fail: AtomicBool,
    pub label_ids: Mutex<Vec<String>>,
    pub classify_calls: AtomicUsize,
    pub retrained: Mutex<Vec<Option<Site>>>,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self {
            score: Mutex::new(0.75),
            notify: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            label_ids: Mutex::new(Vec::new()),
            classify_calls: AtomicUsize::new(0),
            retrained: Mutex::new(Vec::new()),
        }
    }
}

impl MockClassifier {
    pub fn scoring(score: f64, notify: bool) -> Self {
        let c = Self::default();
        *c.score.lock().unwrap() = score;
        c.notify.store(notify, Ordering::SeqCst);
        c
    }
}

#[async_trait::async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, site: Site, id: &str) -> Result<Classification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("classifier unreachable"));
        }
        Ok(Classification {
            id: id.to_string(),
            site: site.name().to_string(),
            notify: self.notify.load(Ordering::SeqCst),
            score: *self.score.lock().unwrap(),
        })
    }

    async fn retrain(&self, site: Option<Site>) -> Result<()> {
        self.retrained.lock().unwrap().push(site);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("model busy"));
        }
        Ok(())
    }

    async fn stats(&self, site: Option<Site>) -> Result<String> {
        Ok(format!("stats for {}", site.map_or("all", Site::name)))
    }

    async fn label_candidates(&self, _site: Site, count: u32) -> Result<Vec<String>> {
        let ids = self.label_ids.lock().unwrap().clone();
        Ok(ids.into_iter().take(count as usize).collect())
    }
}

// ---------- store ----------

/// Store backend whose writes always fail.
pub struct FailingStore;

#[async_trait::async_trait]
impl DocumentStore for FailingStore {
    async fn upsert(&self, _c: &str, _id: &str, _doc: Value) -> Result<()> {
        Err(anyhow!("disk full"))
    }
    async fn find(&self, _c: &str, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }
    async fn find_all(&self, _c: &str) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
    async fn set_field(&self, _c: &str, _id: &str, _f: &str, _v: Value) -> Result<bool> {
        Err(anyhow!("disk full"))
    }
    async fn delete(&self, _c: &str, _id: &str) -> Result<bool> {
        Err(anyhow!("disk full"))
    }
}

/// In-memory backend whose reads of one document id always fail.
pub struct BrokenReads {
    pub inner: Arc<MemoryStore>,
    pub broken_id: String,
}

#[async_trait::async_trait]
impl DocumentStore for BrokenReads {
    async fn upsert(&self, c: &str, id: &str, doc: Value) -> Result<()> {
        self.inner.upsert(c, id, doc).await
    }
    async fn find(&self, c: &str, id: &str) -> Result<Option<Value>> {
        if id == self.broken_id {
            return Err(anyhow!("connection reset"));
        }
        self.inner.find(c, id).await
    }
    async fn find_all(&self, c: &str) -> Result<Vec<Value>> {
        self.inner.find_all(c).await
    }
    async fn set_field(&self, c: &str, id: &str, f: &str, v: Value) -> Result<bool> {
        self.inner.set_field(c, id, f, v).await
    }
    async fn delete(&self, c: &str, id: &str) -> Result<bool> {
        self.inner.delete(c, id).await
    }
}

// ---------- dispatcher harness ----------

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub chat: Arc<RecordingChat>,
    pub mem: Arc<MemoryStore>,
    pub store: Store,
    pub source: Arc<MockSource>,
    pub registry: Arc<FeedRegistry>,
    pub classifier: Arc<MockClassifier>,
    pub queue: mpsc::Receiver<PipelineMessage>,
}

pub fn harness() -> Harness {
    harness_with(MockClassifier::default())
}

pub fn harness_with(classifier: MockClassifier) -> Harness {
    let mem = Arc::new(MemoryStore::new());
    harness_over(classifier, mem.clone(), mem)
}

/// Harness whose store talks to `backend`; `mem` is the memory store
/// behind it, for direct inspection.
pub fn harness_over(
    classifier: MockClassifier,
    mem: Arc<MemoryStore>,
    backend: Arc<dyn DocumentStore>,
) -> Harness {
    let chat = Arc::new(RecordingChat::new());
    let store = Store::new(backend);
    let source = Arc::new(MockSource::new());
    let registry = Arc::new(FeedRegistry::new(Vec::new()));
    let classifier = Arc::new(classifier);
    let mut sites = SiteTable::new();
    sites.insert(source.clone(), registry.clone());
    let (tx, queue) = mpsc::channel(16);
    let dispatcher = Dispatcher::new(
        chat.clone(),
        CHAT,
        store.clone(),
        classifier.clone(),
        sites,
        tx,
        3600,
    );
    Harness {
        dispatcher,
        chat,
        mem,
        store,
        source,
        registry,
        classifier,
        queue,
    }
}

pub fn text_update(chat_id: i64, text: &str) -> Update {
    Update {
        update_id: 1,
        message: Some(Message {
            message_id: 10,
            chat: Chat { id: chat_id },
            text: Some(text.to_string()),
        }),
        callback_query: None,
    }
}

pub fn callback_update(chat_id: i64, message_id: i64, data: &str) -> Update {
    Update {
        update_id: 2,
        message: None,
        callback_query: Some(CallbackQuery {
            id: "cb-1".into(),
            data: Some(data.to_string()),
            message: Some(Message {
                message_id,
                chat: Chat { id: chat_id },
                text: Some("Score: 0.75".into()),
            }),
        }),
    }
}
