// src/chat/dispatcher.rs
//! Single-threaded control plane over the inbound update stream.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::callback::{CallbackAction, CallbackData};
use super::dialog::{Dialog, DialogOutcome};
use super::render;
use super::types::{CallbackQuery, Message, OutgoingMessage, ReplyMarkup, Update};
use super::ChatApi;
use crate::classifier::Classifier;
use crate::error::ChatError;
use crate::ingest::types::{Feed, FeedKind};
use crate::ingest::SiteTable;
use crate::pipeline::PipelineMessage;
use crate::site::Site;
use crate::store::Store;

pub struct Dispatcher {
    chat: Arc<dyn ChatApi>,
    chat_id: i64,
    store: Store,
    classifier: Arc<dyn Classifier>,
    sites: SiteTable,
    pipeline: mpsc::Sender<PipelineMessage>,
    lookback_secs: i64,
    dialog: Dialog,
}

impl Dispatcher {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        chat_id: i64,
        store: Store,
        classifier: Arc<dyn Classifier>,
        sites: SiteTable,
        pipeline: mpsc::Sender<PipelineMessage>,
        lookback_secs: i64,
    ) -> Self {
        Self {
            chat,
            chat_id,
            store,
            classifier,
            sites,
            pipeline,
            lookback_secs,
            dialog: Dialog::Idle,
        }
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    /// Consume updates until the stream ends. Handler errors are logged and
    /// never stop the loop.
    pub async fn run(mut self, mut updates: mpsc::UnboundedReceiver<Update>) {
        while let Some(update) = updates.recv().await {
            let update_id = update.update_id;
            if let Err(e) = self.handle_update(update).await {
                tracing::error!(target: "chat", update_id, error = ?e, "update handling failed");
            }
        }
        tracing::info!(target: "chat", "dispatcher drained");
    }

    pub async fn handle_update(&mut self, update: Update) -> Result<()> {
        if let Some(cb) = update.callback_query {
            return self.handle_callback(cb).await;
        }
        let Some(msg) = update.message else {
            return Ok(());
        };
        if msg.chat.id != self.chat_id {
            tracing::debug!(target: "chat", chat_id = msg.chat.id, "ignoring message from foreign chat");
            return Ok(());
        }
        self.handle_message(msg).await
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        if let Some((verb, args)) = msg.command() {
            let superseded = self.dialog.is_pending();
            if superseded {
                tracing::info!(target: "chat", dialog = ?self.dialog, command = %verb, "command supersedes pending dialog");
                self.dialog = Dialog::Idle;
            }
            return self.handle_command(&verb, &args, superseded).await;
        }

        let Some(text) = msg.text else {
            return self.reply(render::NOT_UNDERSTOOD).await;
        };
        if !self.dialog.is_pending() {
            return self.reply(render::NOT_UNDERSTOOD).await;
        }
        let (next, outcome) = std::mem::take(&mut self.dialog).advance(&text);
        self.dialog = next;
        self.apply_outcome(outcome).await
    }

    async fn apply_outcome(&mut self, outcome: DialogOutcome) -> Result<()> {
        match outcome {
            DialogOutcome::Ask { text, markup } => self.reply_with(&text, markup).await,
            DialogOutcome::Abort(text) => self.reply_with(&text, render::remove_keyboard()).await,
            DialogOutcome::Follow { site, kind, query } => self.follow(site, kind, &query).await,
        }
    }

    async fn follow(&mut self, site: Site, kind: FeedKind, query: &str) -> Result<()> {
        let Some(handle) = self.sites.get(site) else {
            return self.reply(render::UNKNOWN_SITE).await;
        };
        let feed = Feed::new_follow(site, kind, query, Utc::now(), self.lookback_secs);
        let key = feed.key();
        if handle.registry.contains(&key) {
            return self
                .reply(&format!("Already following {kind} \"{query}\"."))
                .await;
        }
        if let Err(e) = self.store.save_feed(&feed).await {
            self.reply("Couldn't save that follow, please try again.")
                .await?;
            return Err(e);
        }
        handle.registry.add_follow(feed)?;
        tracing::info!(target: "chat", feed = %key, "follow added");
        self.reply(&render::follow_added(kind, query)).await
    }

    /// `superseded` tells whether a dialog was open when the command arrived.
    async fn handle_command(&mut self, verb: &str, args: &[String], superseded: bool) -> Result<()> {
        match verb {
            "start" => self.reply(render::WELCOME).await,
            "help" => self.reply(&render::help_text()).await,
            "follow" => {
                let (dialog, outcome) = Dialog::start_follow();
                self.dialog = dialog;
                self.apply_outcome(outcome).await
            }
            "cancel" if superseded => self.reply_with("Cancelled.", render::remove_keyboard()).await,
            "cancel" => self.reply("Nothing to cancel.").await,
            "feeds" => self.list_feeds().await,
            "add" => self.cmd_add(args).await,
            "label" => self.cmd_label(args).await,
            "retrain" => self.cmd_retrain(args).await,
            "stats" => self.cmd_stats(args).await,
            _ => self.reply(render::UNKNOWN_COMMAND).await,
        }
    }

    async fn list_feeds(&self) -> Result<()> {
        let mut lines = Vec::new();
        for (site, handle) in self.sites.iter() {
            let (queued, busy) = handle.registry.snapshot();
            for f in queued {
                lines.push(format!("{} {} {}", site.pretty_name(), f.kind, f.query));
            }
            for k in busy {
                lines.push(format!("{} {} {} (polling)", site.pretty_name(), k.kind, k.query));
            }
        }
        if lines.is_empty() {
            return self.reply("No feeds followed yet. Use /follow to add one.").await;
        }
        lines.sort();
        self.reply(&lines.join("\n")).await
    }

    /// `None` once the reply for an unknown site has been sent.
    async fn parse_site(&self, text: &str) -> Result<Option<Site>> {
        match Site::parse(text).filter(|s| self.sites.get(*s).is_some()) {
            Some(s) => Ok(Some(s)),
            None => {
                self.reply(render::UNKNOWN_SITE).await?;
                Ok(None)
            }
        }
    }

    /// `[site]` argument of `/retrain` and `/stats`. `Some(None)` means all sites.
    async fn parse_optional_site(&self, args: &[String]) -> Result<Option<Option<Site>>> {
        match args {
            [] => Ok(Some(None)),
            [s] if s.eq_ignore_ascii_case("all") => Ok(Some(None)),
            [s] => Ok(self.parse_site(s).await?.map(Some)),
            _ => {
                self.reply(render::BAD_PARAM_COUNT).await?;
                Ok(None)
            }
        }
    }

    async fn cmd_add(&self, args: &[String]) -> Result<()> {
        let [site, id] = args else {
            return self.reply(render::BAD_PARAM_COUNT).await;
        };
        let Some(site) = self.parse_site(site).await? else {
            return Ok(());
        };
        let Some(handle) = self.sites.get(site) else {
            return self.reply(render::UNKNOWN_SITE).await;
        };
        match handle.source.fetch_post(id).await {
            Ok(Some(post)) => {
                tracing::info!(target: "chat", %site, id = %post.id, "manual add");
                self.enqueue(PipelineMessage::manual_add(post)).await
            }
            Ok(None) => self.reply(render::POST_NOT_FOUND).await,
            Err(e) => {
                tracing::warn!(target: "chat", %site, id = %id, error = ?e, "manual add lookup failed");
                self.reply(render::POST_NOT_FOUND).await
            }
        }
    }

    async fn cmd_label(&self, args: &[String]) -> Result<()> {
        let [site, count] = args else {
            return self.reply(render::BAD_PARAM_COUNT).await;
        };
        let Some(site) = self.parse_site(site).await? else {
            return Ok(());
        };
        let count = match count.parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                return self
                    .reply("The number of posts must be a positive whole number.")
                    .await
            }
        };
        let ids = match self.classifier.label_candidates(site, count).await {
            Ok(ids) => ids,
            Err(e) => {
                return self
                    .reply(&format!("Failed to get posts to label.\nError: {e:#}"))
                    .await
            }
        };
        if ids.is_empty() {
            return self.reply("Nothing to label right now.").await;
        }
        for id in ids {
            match self.store.get_post(site, &id).await {
                Ok(Some(post)) => self.enqueue(PipelineMessage::relabel(post)).await?,
                Ok(None) => self.reply(&format!("Couldn't find post {id}")).await?,
                Err(e) => {
                    tracing::warn!(target: "chat", %site, %id, error = ?e, "label lookup failed");
                    self.reply(&format!("Couldn't load post {id}.\nError: {e:#}")).await?
                }
            }
        }
        Ok(())
    }

    async fn cmd_retrain(&self, args: &[String]) -> Result<()> {
        let Some(site) = self.parse_optional_site(args).await? else {
            return Ok(());
        };
        self.reply("Retraining, this may take a while...").await?;
        match self.classifier.retrain(site).await {
            Ok(()) => self.reply("Successfully retrained model.").await,
            Err(e) => {
                let name = site.map_or("all", Site::name);
                self.reply(&format!("Failed to retrain model \"{name}\".\nError: {e:#}"))
                    .await
            }
        }
    }

    async fn cmd_stats(&self, args: &[String]) -> Result<()> {
        let Some(site) = self.parse_optional_site(args).await? else {
            return Ok(());
        };
        match self.classifier.stats(site).await {
            Ok(s) if s.trim().is_empty() => self.reply("No statistics available.").await,
            Ok(s) => self.reply(&s).await,
            Err(e) => {
                let name = site.map_or("all", Site::name);
                self.reply(&format!("Failed to get statistics for \"{name}\".\nError: {e:#}"))
                    .await
            }
        }
    }

    async fn handle_callback(&mut self, cb: CallbackQuery) -> Result<()> {
        let Some(message) = cb.message else {
            tracing::warn!(target: "chat", callback = %cb.id, "callback without message");
            return Ok(());
        };
        if message.chat.id != self.chat_id {
            tracing::debug!(target: "chat", chat_id = message.chat.id, "ignoring callback from foreign chat");
            return Ok(());
        }
        if let Err(e) = self.chat.answer_callback(&cb.id).await {
            tracing::warn!(target: "chat", error = %e, "answerCallbackQuery failed");
        }

        let raw = cb.data.unwrap_or_default();
        let data: CallbackData = match raw.parse() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(target: "chat", payload = %raw, error = %e, "malformed callback payload");
                return Ok(());
            }
        };
        let Some(site) = Site::parse(&data.site) else {
            tracing::warn!(target: "chat", payload = %raw, "callback for unknown site");
            return Ok(());
        };

        match data.action {
            CallbackAction::Hide => self.hide(message.message_id).await,
            CallbackAction::Delete => {
                let removed = self.store.delete_post(site, &data.id).await?;
                tracing::info!(target: "chat", %site, id = %data.id, removed, "post deleted");
                self.hide(message.message_id).await
            }
            CallbackAction::MarkTrue | CallbackAction::MarkFalse => {
                let label = data.action == CallbackAction::MarkTrue;
                if self.store.set_post_notify(site, &data.id, label).await? {
                    tracing::info!(target: "chat", %site, id = %data.id, label, "post labelled");
                    Ok(())
                } else {
                    self.reply(&format!("Couldn't find post {}", data.id)).await
                }
            }
            CallbackAction::Print => self.show_detail(site, &data, message.message_id).await,
        }
    }

    async fn hide(&self, message_id: i64) -> Result<()> {
        self.chat.delete(self.chat_id, message_id).await?;
        Ok(())
    }

    async fn show_detail(&self, site: Site, data: &CallbackData, message_id: i64) -> Result<()> {
        let Some(post) = self.store.get_post(site, &data.id).await? else {
            return self.reply(&format!("Couldn't find post {}", data.id)).await;
        };
        let score = match self.classifier.classify(site, &post.id).await {
            Ok(c) => c.score,
            Err(e) => match data.score {
                Some(s) => {
                    tracing::warn!(target: "chat", %site, id = %post.id, error = ?e, "re-score failed, using previous score");
                    s
                }
                None => return Err(e),
            },
        };

        if let Err(e) = self.chat.delete(self.chat_id, message_id).await {
            tracing::warn!(target: "chat", error = %e, "could not remove summary message");
        }
        match self
            .chat
            .send(&render::detail_message(self.chat_id, &post, score))
            .await
        {
            Ok(_) => Ok(()),
            Err(ChatError::MessageTooLong) => {
                tracing::info!(target: "chat", %site, id = %post.id, "detail too long, sending summary");
                self.chat
                    .send(&render::summary_message(self.chat_id, &post, score))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn enqueue(&self, msg: PipelineMessage) -> Result<()> {
        self.pipeline
            .send(msg)
            .await
            .map_err(|_| anyhow!("pipeline closed"))
    }

    async fn reply(&self, text: &str) -> Result<()> {
        self.chat
            .send(&OutgoingMessage::text(self.chat_id, text))
            .await?;
        Ok(())
    }

    async fn reply_with(&self, text: &str, markup: ReplyMarkup) -> Result<()> {
        self.chat
            .send(&OutgoingMessage::text(self.chat_id, text).with_markup(markup))
            .await?;
        Ok(())
    }
}
