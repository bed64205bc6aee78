// src/pipeline/writer.rs
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::PipelineMessage;
use crate::store::Store;

/// Persist one message. Returns the message to forward, or `None` when the
/// write failed and the message is dropped.
pub async fn write_one(store: &Store, msg: PipelineMessage) -> Option<PipelineMessage> {
    if msg.skip_write {
        return Some(msg);
    }
    match store.save_post(&msg.post).await {
        Ok(()) => {
            counter!("posts_written_total").increment(1);
            tracing::info!(target: "pipeline", site = %msg.post.site, id = %msg.post.id, link = %msg.post.link, "stored post");
            Some(msg)
        }
        Err(e) => {
            counter!("store_errors_total").increment(1);
            tracing::error!(target: "pipeline", site = %msg.post.site, id = %msg.post.id, error = ?e, "store write failed, dropping message");
            None
        }
    }
}

/// Drain `rx` until every producer is gone, forwarding to the notify stage.
pub fn spawn_writer(
    store: Store,
    mut rx: mpsc::Receiver<PipelineMessage>,
    tx: mpsc::Sender<PipelineMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Some(msg) = write_one(&store, msg).await else {
                continue;
            };
            if tx.send(msg).await.is_err() {
                tracing::error!(target: "pipeline", "notify queue closed, writer stopping");
                break;
            }
        }
        tracing::info!(target: "pipeline", "writer drained");
    })
}
