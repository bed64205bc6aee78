//! Client for the external scoring service.
//!
//! The service is a small HTTP app on localhost exposing `/classify`,
//! `/retrain`, `/stats` and `/label`. Failures come back as
//! `{"success": false, "error": ...}` with a 200 status, so every response
//! is decoded leniently and checked for the payload we need.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::site::Site;

pub const DEFAULT_CLASSIFIER_URL: &str = "http://localhost:5000";

/// Score for one post.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub id: String,
    pub site: String,
    pub notify: bool,
    pub score: f64,
}

/// Decides whether a classification is worth an operator notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotifyPolicy {
    /// Trust the service's own `notify` flag.
    ClassifierFlag,
    /// Notify when `score > threshold`.
    ScoreAbove(f64),
}

impl NotifyPolicy {
    pub fn from_threshold(threshold: Option<f64>) -> Self {
        threshold.map_or(NotifyPolicy::ClassifierFlag, NotifyPolicy::ScoreAbove)
    }

    pub fn passes(&self, c: &Classification) -> bool {
        match *self {
            NotifyPolicy::ClassifierFlag => c.notify,
            NotifyPolicy::ScoreAbove(t) => c.score > t,
        }
    }
}

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, site: Site, id: &str) -> Result<Classification>;

    /// Retrain one site's model, or all of them when `site` is `None`.
    async fn retrain(&self, site: Option<Site>) -> Result<()>;

    /// Human-readable statistics for one site or all of them.
    async fn stats(&self, site: Option<Site>) -> Result<String>;

    /// Ids the model would learn most from if labelled next.
    async fn label_candidates(&self, site: Site, count: u32) -> Result<Vec<String>>;
}

fn site_param(site: Option<Site>) -> &'static str {
    site.map_or("all", Site::name)
}

#[derive(Debug, Deserialize)]
struct ClassifyResp {
    id: Option<String>,
    site: Option<String>,
    #[serde(default)]
    notify: bool,
    score: Option<f64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResp {
    #[serde(default)]
    success: bool,
    statistics: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelResp {
    ids: Option<Vec<String>>,
    error: Option<String>,
}

pub struct HttpClassifier {
    http: reqwest::Client,
    base: String,
    retrain_timeout: Duration,
}

impl HttpClassifier {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("adopt-detector/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .context("build classifier http client")?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            retrain_timeout: Duration::from_secs(600),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        let mut req = self.http.get(&url).query(query);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("classifier unreachable ({path})"))?
            .error_for_status()
            .with_context(|| format!("classifier {path} non-2xx"))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("decode classifier {path} response"))
    }
}

#[async_trait::async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, site: Site, id: &str) -> Result<Classification> {
        let r: ClassifyResp = self
            .get(
                "/classify",
                &[("id", id.to_string()), ("site", site.name().to_string())],
                None,
            )
            .await?;
        let Some(score) = r.score else {
            bail!(
                "classifier rejected {site}/{id}: {}",
                r.error_description
                    .or(r.error)
                    .unwrap_or_else(|| "no score in response".into())
            );
        };
        Ok(Classification {
            id: r.id.unwrap_or_else(|| id.to_string()),
            site: r.site.unwrap_or_else(|| site.name().to_string()),
            notify: r.notify,
            score,
        })
    }

    async fn retrain(&self, site: Option<Site>) -> Result<()> {
        let r: StatusResp = self
            .get(
                "/retrain",
                &[("site", site_param(site).to_string())],
                Some(self.retrain_timeout),
            )
            .await?;
        if r.success {
            Ok(())
        } else {
            Err(anyhow!(r.error.unwrap_or_else(|| "unknown error".into())))
        }
    }

    async fn stats(&self, site: Option<Site>) -> Result<String> {
        let r: StatusResp = self
            .get("/stats", &[("site", site_param(site).to_string())], None)
            .await?;
        match (r.success, r.statistics) {
            (true, Some(s)) => Ok(s),
            (true, None) => Ok(String::new()),
            (false, _) => Err(anyhow!(r.error.unwrap_or_else(|| "unknown error".into()))),
        }
    }

    async fn label_candidates(&self, site: Site, count: u32) -> Result<Vec<String>> {
        let r: LabelResp = self
            .get(
                "/label",
                &[
                    ("site", site.name().to_string()),
                    ("count", count.to_string()),
                ],
                None,
            )
            .await?;
        match r.ids {
            Some(ids) => Ok(ids),
            None => Err(anyhow!(r.error.unwrap_or_else(|| "no ids in response".into()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(notify: bool, score: f64) -> Classification {
        Classification {
            id: "1".into(),
            site: "deviantart".into(),
            notify,
            score,
        }
    }

    #[test]
    fn flag_policy_follows_service() {
        let p = NotifyPolicy::from_threshold(None);
        assert!(p.passes(&c(true, -3.0)));
        assert!(!p.passes(&c(false, 3.0)));
    }

    #[test]
    fn threshold_policy_is_strict() {
        let p = NotifyPolicy::from_threshold(Some(-0.5));
        assert!(p.passes(&c(false, -0.4)));
        assert!(!p.passes(&c(true, -0.5)));
    }

    #[test]
    fn error_body_decodes_without_score() {
        let r: ClassifyResp =
            serde_json::from_str(r#"{"success": false, "error": "Cannot find site x"}"#).unwrap();
        assert!(r.score.is_none());
        assert_eq!(r.error.as_deref(), Some("Cannot find site x"));
    }

    #[test]
    fn site_param_defaults_to_all() {
        assert_eq!(site_param(None), "all");
        assert_eq!(site_param(Some(Site::DeviantArt)), "deviantart");
    }
}
