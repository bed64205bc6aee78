// src/pipeline/notifier.rs
use anyhow::{Context, Result};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::PipelineMessage;
use crate::chat::{render, ChatApi};
use crate::classifier::{Classifier, NotifyPolicy};

/// Notify stage: score each post and tell the operator about the ones that
/// pass the policy (or are forced through).
pub struct Notifier {
    classifier: Arc<dyn Classifier>,
    chat: Arc<dyn ChatApi>,
    chat_id: i64,
    policy: NotifyPolicy,
}

impl Notifier {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        chat: Arc<dyn ChatApi>,
        chat_id: i64,
        policy: NotifyPolicy,
    ) -> Self {
        Self {
            classifier,
            chat,
            chat_id,
            policy,
        }
    }

    /// Returns whether a notification was sent.
    pub async fn notify_one(&self, msg: &PipelineMessage) -> Result<bool> {
        let post = &msg.post;
        let c = match self.classifier.classify(post.site, &post.id).await {
            Ok(c) => c,
            Err(e) => {
                counter!("classifier_errors_total").increment(1);
                return Err(e.context(format!("classify {}/{}", post.site, post.id)));
            }
        };

        if !(msg.force_notify || self.policy.passes(&c)) {
            tracing::debug!(target: "pipeline", site = %post.site, id = %post.id, score = c.score, "below notify policy");
            return Ok(false);
        }

        self.chat
            .send(&render::summary_message(self.chat_id, post, c.score))
            .await
            .with_context(|| format!("send notification for {}/{}", post.site, post.id))?;
        counter!("notifications_sent_total").increment(1);
        tracing::info!(
            target: "pipeline",
            site = %post.site,
            id = %post.id,
            score = c.score,
            forced = msg.force_notify,
            "operator notified"
        );
        Ok(true)
    }
}

/// Drain `rx` until every producer is gone.
pub fn spawn_notifier(notifier: Notifier, mut rx: mpsc::Receiver<PipelineMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = notifier.notify_one(&msg).await {
                tracing::error!(target: "pipeline", error = ?e, "notification skipped");
            }
        }
        tracing::info!(target: "pipeline", "notifier drained");
    })
}
