use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::MalformedResponse;
use crate::ingest::credentials::{CredentialManager, TokenGrant};
use crate::ingest::types::{
    null_as_default, Author, Feed, FeedKind, FeedSource, ListingItem, ListingPage, Post, Tag,
};
use crate::site::Site;

pub const DEFAULT_BASE_URL: &str = "https://www.deviantart.com";

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("adopt-detector/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("build deviantart http client")
}

/// Error body DeviantArt sends alongside 4xx statuses.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    error: Option<String>,
    error_description: Option<String>,
}

impl ApiError {
    fn describe(self) -> String {
        match (self.error, self.error_description) {
            (Some(e), Some(d)) => format!("{e}: {d}"),
            (Some(e), None) => e,
            (None, Some(d)) => d,
            (None, None) => "no error description".into(),
        }
    }
}

enum Reply<T> {
    Body(T),
    Rejected(String),
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<Reply<T>> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("read {what} body"))?;
    if status.is_success() {
        let body = serde_json::from_slice(&bytes).map_err(|e| MalformedResponse {
            what: what.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(Reply::Body(body));
    }
    if status.is_client_error() {
        let err: ApiError = serde_json::from_slice(&bytes).unwrap_or_default();
        return Ok(Reply::Rejected(format!("{status}: {}", err.describe())));
    }
    bail!("{what} returned {status}")
}

// ---------- token grant ----------

#[derive(Debug, Deserialize)]
struct TokenResp {
    access_token: Option<String>,
    #[serde(flatten)]
    error: ApiError,
}

/// Client-credentials grant against the DeviantArt OAuth endpoint.
pub struct DeviantArtAuth {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl DeviantArtAuth {
    pub fn new(base: &str, client_id: &str, client_secret: &str) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            token_url: format!("{}/oauth2/token", base.trim_end_matches('/')),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }
}

#[async_trait]
impl TokenGrant for DeviantArtAuth {
    async fn request_token(&self) -> Result<String> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .context("token request")?;
        let body: TokenResp = match decode(resp, "token response").await? {
            Reply::Body(b) => b,
            Reply::Rejected(e) => bail!("token request rejected: {e}"),
        };
        match body.access_token {
            Some(t) if !t.is_empty() => Ok(t),
            _ => bail!("token response without access_token: {}", body.error.describe()),
        }
    }
}

// ---------- listing + metadata ----------

/// Entries stay raw so one bad item cannot sink the page.
#[derive(Debug, Deserialize)]
struct ListingResp {
    #[serde(default, deserialize_with = "null_as_default")]
    results: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    has_more: bool,
    #[serde(default)]
    next_offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawListingItem {
    deviationid: Option<String>,
    /// A decimal string upstream; numbers are accepted too.
    published_time: Option<serde_json::Value>,
    url: Option<String>,
}

impl RawListingItem {
    fn into_item(self) -> Option<ListingItem> {
        let id = self.deviationid.filter(|s| !s.is_empty())?;
        let published_time = match self.published_time {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        Some(ListingItem {
            id,
            published_time,
            url: self.url,
        })
    }
}

fn parse_listing(resp: ListingResp) -> ListingPage {
    let mut items = Vec::with_capacity(resp.results.len());
    for value in resp.results {
        match serde_json::from_value::<RawListingItem>(value) {
            Ok(raw) => match raw.into_item() {
                Some(item) => items.push(item),
                None => tracing::warn!(target: "deviantart", "listing item without deviationid, dropped"),
            },
            Err(e) => tracing::warn!(target: "deviantart", error = %e, "malformed listing item, dropped"),
        }
    }
    ListingPage {
        items,
        has_more: resp.has_more,
        next_offset: resp.next_offset,
    }
}

#[derive(Debug, Deserialize)]
struct MetadataResp {
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    deviationid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    author: Author,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: Vec<Tag>,
    #[serde(default, deserialize_with = "null_as_default")]
    is_mature: bool,
}

fn parse_metadata(resp: MetadataResp) -> Vec<Post> {
    let mut posts = Vec::with_capacity(resp.metadata.len());
    for value in resp.metadata {
        match serde_json::from_value::<RawMetadata>(value) {
            Ok(raw) => posts.push(raw.into_post()),
            Err(e) => tracing::warn!(target: "deviantart", error = %e, "malformed metadata entry, dropped"),
        }
    }
    posts
}

/// Deviation ids are UUIDs. Anything else must not reach a request path.
fn is_deviation_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl RawMetadata {
    fn into_post(self) -> Post {
        Post {
            id: self.deviationid,
            site: Site::DeviantArt,
            link: String::new(),
            author: self.author,
            title: self.title,
            description: self.description,
            tags: self.tags,
            is_mature: self.is_mature,
            notify: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviationResp {
    url: Option<String>,
}

pub struct DeviantArtClient {
    http: reqwest::Client,
    base: String,
    creds: Arc<CredentialManager>,
}

impl DeviantArtClient {
    pub fn new(base: &str, creds: Arc<CredentialManager>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base: base.trim_end_matches('/').to_string(),
            creds,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
    ) -> Result<Reply<T>> {
        query.push(("access_token", self.creds.bearer()?));
        let t0 = Instant::now();
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .query(&query)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let out = decode(resp, path).await;
        histogram!("deviantart_request_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
        out
    }
}

#[async_trait]
impl FeedSource for DeviantArtClient {
    fn site(&self) -> Site {
        Site::DeviantArt
    }

    async fn fetch_page(&self, feed: &Feed, offset: u64) -> Result<ListingPage> {
        let (path, key) = match feed.kind {
            FeedKind::Tag => ("/api/v1/oauth2/browse/newest", "q"),
            FeedKind::User => ("/api/v1/oauth2/gallery/all", "username"),
        };
        let query = vec![
            (key, feed.query.clone()),
            ("offset", offset.to_string()),
            ("mature_content", "true".to_string()),
        ];
        match self.get::<ListingResp>(path, query).await? {
            Reply::Body(resp) => Ok(parse_listing(resp)),
            Reply::Rejected(e) => bail!("listing for {} rejected: {e}", feed.key()),
        }
    }

    async fn fetch_metadata(&self, ids: &[String]) -> Result<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query: Vec<(&str, String)> =
            ids.iter().map(|id| ("deviationids[]", id.clone())).collect();
        query.push(("mature_content", "true".to_string()));
        match self
            .get::<MetadataResp>("/api/v1/oauth2/deviation/metadata", query)
            .await?
        {
            Reply::Body(resp) => Ok(parse_metadata(resp)),
            Reply::Rejected(e) => bail!("metadata request rejected: {e}"),
        }
    }

    async fn fetch_post(&self, id: &str) -> Result<Option<Post>> {
        if !is_deviation_id(id) {
            tracing::info!(target: "deviantart", id, "not a deviation id");
            return Ok(None);
        }
        let meta = match self
            .get::<MetadataResp>(
                "/api/v1/oauth2/deviation/metadata",
                vec![
                    ("deviationids[]", id.to_string()),
                    ("mature_content", "true".to_string()),
                ],
            )
            .await?
        {
            Reply::Body(resp) => parse_metadata(resp),
            Reply::Rejected(e) => {
                tracing::info!(target: "deviantart", id, error = %e, "deviation not found");
                return Ok(None);
            }
        };
        let Some(mut post) = meta.into_iter().next() else {
            return Ok(None);
        };

        match self
            .get::<DeviationResp>(&format!("/api/v1/oauth2/deviation/{id}"), Vec::new())
            .await?
        {
            Reply::Body(d) => post.link = d.url.unwrap_or_default(),
            Reply::Rejected(e) => {
                tracing::info!(target: "deviantart", id, error = %e, "deviation not found");
                return Ok(None);
            }
        }
        Ok(Some(post))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_lenient() {
        let raw = r#"{
            "has_more": true, "next_offset": 24,
            "results": [
                {"deviationid": "A", "published_time": "1700000000", "url": "https://da/a"},
                {"published_time": "1700000001"},
                {"deviationid": "C", "published_time": 1700000002},
                {"deviationid": "D"}
            ]
        }"#;
        let page = parse_listing(serde_json::from_str(raw).unwrap());
        assert!(page.has_more);
        assert_eq!(page.next_offset, Some(24));
        let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "D"]);
        assert_eq!(page.items[1].published_time, "1700000002");
        assert_eq!(page.items[2].published_time, "");
    }

    #[test]
    fn metadata_maps_to_post() {
        let raw = r#"{"metadata": [{
            "deviationid": "X", "title": "Adopt #1", "description": "<b>hi</b>",
            "author": {"userid": "U", "username": "artist", "type": "regular"},
            "tags": [{"tag_name": "adopt", "sponsored": false, "sponsor": ""}],
            "is_mature": true, "license": "none"
        }]}"#;
        let post = parse_metadata(serde_json::from_str(raw).unwrap()).remove(0);
        assert_eq!(post.id, "X");
        assert_eq!(post.author.username, "artist");
        assert_eq!(post.tags[0].tag_name, "adopt");
        assert!(post.is_mature);
        assert!(post.link.is_empty());
    }

    #[test]
    fn null_fields_do_not_sink_the_batch() {
        let raw = r#"{"metadata": [
            {"deviationid": "A", "title": "Adopt", "description": null,
             "author": {"userid": null, "username": "artist"}, "tags": null, "is_mature": null},
            {"deviationid": null, "title": "no id"},
            {"deviationid": "B", "title": null}
        ]}"#;
        let posts = parse_metadata(serde_json::from_str(raw).unwrap());
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(posts[0].description, "");
        assert_eq!(posts[0].author.username, "artist");
        assert!(posts[0].tags.is_empty());
        assert_eq!(posts[1].title, "");

        let empty = parse_metadata(serde_json::from_str(r#"{"metadata": null}"#).unwrap());
        assert!(empty.is_empty());
    }

    #[test]
    fn null_results_is_an_empty_page() {
        let page = parse_listing(
            serde_json::from_str(r#"{"results": null, "has_more": null, "next_offset": null}"#).unwrap(),
        );
        assert!(page.items.is_empty());
        assert!(!page.has_more);

        let page = parse_listing(
            serde_json::from_str(
                r#"{"results": [{"deviationid": 7, "published_time": "1"}, {"deviationid": "Z", "published_time": "2"}]}"#,
            )
            .unwrap(),
        );
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "Z");
    }

    #[test]
    fn deviation_ids_are_uuid_shaped() {
        assert!(is_deviation_id("0A1B2C3D-4E5F-6789-ABCD-EF0123456789"));
        assert!(!is_deviation_id(""));
        assert!(!is_deviation_id("../user/whoami"));
        assert!(!is_deviation_id("abc?username=x"));
        assert!(!is_deviation_id("abc#frag"));
    }

    #[tokio::test]
    async fn fetch_post_rejects_path_like_ids_without_a_request() {
        let auth: Arc<dyn TokenGrant> = Arc::new(DeviantArtAuth::new("http://127.0.0.1:1", "id", "secret").unwrap());
        // No token was ever acquired, so any request would fail.
        let client = DeviantArtClient::new("http://127.0.0.1:1", Arc::new(CredentialManager::new(auth))).unwrap();
        assert!(client.fetch_post("../../oauth2/token").await.unwrap().is_none());
        assert!(client.fetch_post("x?username=y").await.unwrap().is_none());
    }

    #[test]
    fn token_error_body_is_described() {
        let t: TokenResp = serde_json::from_str(
            r#"{"error": "invalid_client", "error_description": "Client authentication failed."}"#,
        )
        .unwrap();
        assert!(t.access_token.is_none());
        assert_eq!(
            t.error.describe(),
            "invalid_client: Client authentication failed."
        );
    }
}
