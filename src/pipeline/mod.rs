// src/pipeline/mod.rs
//! Two-stage ingestion pipeline: write stage → notify stage, joined by
//! bounded queues. A full queue stalls the producer; that is the only
//! backpressure in the system.

pub mod notifier;
pub mod writer;

use tokio::sync::mpsc;

use crate::ingest::types::Post;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Unit of work flowing from pollers and commands to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineMessage {
    pub post: Post,
    /// Notify regardless of the classifier's verdict.
    pub force_notify: bool,
    /// Do not touch the store; go straight to classification.
    pub skip_write: bool,
}

impl PipelineMessage {
    /// Freshly polled post: stored, then notified only if the classifier agrees.
    pub fn polled(post: Post) -> Self {
        Self {
            post,
            force_notify: false,
            skip_write: false,
        }
    }

    /// Operator `/add`: stored and always shown.
    pub fn manual_add(post: Post) -> Self {
        Self {
            post,
            force_notify: true,
            skip_write: false,
        }
    }

    /// Operator `/label`: already stored, always shown.
    pub fn relabel(post: Post) -> Self {
        Self {
            post,
            force_notify: true,
            skip_write: true,
        }
    }
}

/// Sender/receiver pairs for both stages.
pub struct Queues {
    pub write_tx: mpsc::Sender<PipelineMessage>,
    pub write_rx: mpsc::Receiver<PipelineMessage>,
    pub notify_tx: mpsc::Sender<PipelineMessage>,
    pub notify_rx: mpsc::Receiver<PipelineMessage>,
}

pub fn queues(capacity: usize) -> Queues {
    let (write_tx, write_rx) = mpsc::channel(capacity.max(1));
    let (notify_tx, notify_rx) = mpsc::channel(capacity.max(1));
    Queues {
        write_tx,
        write_rx,
        notify_tx,
        notify_rx,
    }
}
