// src/chat/dialog.rs
//! The multi-step `/follow` conversation.
//!
//! Transitions are pure: [`Dialog::advance`] consumes the current state and
//! the operator's reply and returns the next state plus what to do about it.
//! The dispatcher owns the single live instance.

use super::render;
use super::types::ReplyMarkup;
use crate::ingest::types::FeedKind;
use crate::site::Site;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dialog {
    #[default]
    Idle,
    AwaitSite,
    AwaitKind {
        site: Site,
    },
    AwaitQuery {
        site: Site,
        kind: FeedKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DialogOutcome {
    /// Send a prompt; the dialog stays open.
    Ask { text: String, markup: ReplyMarkup },
    /// The reply was unusable; the dialog is closed.
    Abort(String),
    /// All answers collected.
    Follow {
        site: Site,
        kind: FeedKind,
        query: String,
    },
}

impl Dialog {
    pub fn is_pending(&self) -> bool {
        !matches!(self, Dialog::Idle)
    }

    pub fn start_follow() -> (Dialog, DialogOutcome) {
        (
            Dialog::AwaitSite,
            DialogOutcome::Ask {
                text: "Which site would you like to follow?".into(),
                markup: render::site_keyboard(),
            },
        )
    }

    pub fn advance(self, reply: &str) -> (Dialog, DialogOutcome) {
        match self {
            Dialog::Idle => (
                Dialog::Idle,
                DialogOutcome::Abort(render::NOT_UNDERSTOOD.into()),
            ),
            Dialog::AwaitSite => match Site::parse(reply) {
                Some(site) => (
                    Dialog::AwaitKind { site },
                    DialogOutcome::Ask {
                        text: "What type of follow would you like to add?".into(),
                        markup: render::kind_keyboard(),
                    },
                ),
                None => (
                    Dialog::Idle,
                    DialogOutcome::Abort("Invalid site name, please restart with /follow.".into()),
                ),
            },
            Dialog::AwaitKind { site } => match FeedKind::parse(reply) {
                Some(kind) => (
                    Dialog::AwaitQuery { site, kind },
                    DialogOutcome::Ask {
                        text: format!("And what {kind} would you like to follow?"),
                        markup: render::remove_keyboard(),
                    },
                ),
                None => (
                    Dialog::Idle,
                    DialogOutcome::Abort(
                        "Sorry, I don't recognise that follow type. Please restart with /follow."
                            .into(),
                    ),
                ),
            },
            Dialog::AwaitQuery { site, kind } => {
                let mut words = reply.split_whitespace();
                match (words.next(), words.next()) {
                    (Some(q), None) => (
                        Dialog::Idle,
                        DialogOutcome::Follow {
                            site,
                            kind,
                            query: q.to_lowercase(),
                        },
                    ),
                    _ => (
                        Dialog::Idle,
                        DialogOutcome::Abort(
                            "Invalid query - it must be a single word with no spaces.".into(),
                        ),
                    ),
                }
            }
        }
    }
}
