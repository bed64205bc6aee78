// src/chat/render.rs
//! Message texts and keyboards shown to the operator.

use once_cell::sync::OnceCell;
use regex::Regex;

use super::callback::{CallbackAction, CallbackData};
use super::types::{InlineButton, KeyboardButton, OutgoingMessage, ReplyMarkup};
use crate::ingest::types::{FeedKind, Post};
use crate::site::Site;

/// Telegram's limit for one message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

pub const WELCOME: &str = "Welcome! Try /help to get a list of commands.";
pub const UNKNOWN_COMMAND: &str = "Sorry, I don't recognise that command. Try /help for commands.";
pub const NOT_UNDERSTOOD: &str = "Sorry, I didn't understand what you said. Try /help for commands.";
pub const BAD_PARAM_COUNT: &str =
    "Sorry, I don't know how to parse that many parameters. Check /help for usage.";
pub const UNKNOWN_SITE: &str =
    "Sorry, I don't recognise that site. Check /help for the implemented sites.";
pub const POST_NOT_FOUND: &str = "Sorry, I couldn't find that post. Please try again.";

pub fn help_text() -> String {
    let sites = Site::ALL
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Commands:\n\
         /follow - follow a new tag or user\n\
         /feeds - list followed feeds\n\
         /add <site> <id> - store and show a post\n\
         /label <site> <count> - show posts worth labelling\n\
         /retrain [site] - retrain the model\n\
         /stats [site] - model statistics\n\
         /cancel - abandon the current dialog\n\
         /help - this message\n\
         \n\
         Sites: {sites}"
    )
}

pub fn summary_text(post: &Post, score: f64) -> String {
    format!("Score: {score:.2}\n{}", post.link)
}

pub fn detail_text(post: &Post, score: f64) -> String {
    format!(
        "Score: {score:.2}\n{}\n{}\n{}",
        post.title,
        "-".repeat(40),
        html_to_text(&post.description)
    )
}

fn fits(text: &str) -> bool {
    text.chars().count() <= MAX_MESSAGE_CHARS
}

/// Compact notification: score, link, action buttons.
pub fn summary_message(chat_id: i64, post: &Post, score: f64) -> OutgoingMessage {
    OutgoingMessage::text(chat_id, summary_text(post, score)).with_markup(post_keyboard(post, score))
}

/// Full notification. Falls back to the summary when the body cannot fit.
pub fn detail_message(chat_id: i64, post: &Post, score: f64) -> OutgoingMessage {
    let text = detail_text(post, score);
    if !fits(&text) {
        return summary_message(chat_id, post, score);
    }
    OutgoingMessage::text(chat_id, text).with_markup(post_keyboard(post, score))
}

pub fn post_keyboard(post: &Post, score: f64) -> ReplyMarkup {
    let site = post.site.name();
    let cb = |action| CallbackData::new(action, site, &post.id).encode();

    let mut first = Vec::with_capacity(2);
    if !post.link.is_empty() {
        first.push(InlineButton::url("🔗", &post.link));
    }
    first.push(InlineButton::callback(
        "💬",
        CallbackData::new(CallbackAction::Print, site, &post.id)
            .with_score(score)
            .encode(),
    ));

    ReplyMarkup::Inline {
        inline_keyboard: vec![
            first,
            vec![
                InlineButton::callback("✔", cb(CallbackAction::MarkTrue)),
                InlineButton::callback("❌", cb(CallbackAction::MarkFalse)),
            ],
            vec![
                InlineButton::callback("🚫", cb(CallbackAction::Hide)),
                InlineButton::callback("🗑", cb(CallbackAction::Delete)),
            ],
        ],
    }
}

fn reply_keyboard(options: &[&str]) -> ReplyMarkup {
    ReplyMarkup::Keyboard {
        keyboard: options
            .iter()
            .map(|o| vec![KeyboardButton { text: o.to_string() }])
            .collect(),
        one_time_keyboard: true,
        resize_keyboard: true,
    }
}

pub fn site_keyboard() -> ReplyMarkup {
    let names: Vec<&str> = Site::ALL.iter().map(|s| s.pretty_name()).collect();
    reply_keyboard(&names)
}

pub fn kind_keyboard() -> ReplyMarkup {
    reply_keyboard(&["Tag", "User"])
}

pub fn remove_keyboard() -> ReplyMarkup {
    ReplyMarkup::Remove {
        remove_keyboard: true,
    }
}

pub fn follow_added(kind: FeedKind, query: &str) -> String {
    format!("Added {kind} feed with query \"{query}\"!")
}

/// Plain text from a deviation description: line breaks kept, tags
/// dropped, entities decoded, runs of spaces collapsed.
pub fn html_to_text(s: &str) -> String {
    static RE_BR: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_SPACES: OnceCell<Regex> = OnceCell::new();
    static RE_BLANK: OnceCell<Regex> = OnceCell::new();

    let re_br = RE_BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>").expect("static regex"));
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    let re_spaces = RE_SPACES.get_or_init(|| Regex::new(r"[ \t\u{a0}]+").expect("static regex"));
    let re_blank = RE_BLANK.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"));

    let out = re_br.replace_all(s, "\n");
    let out = re_tags.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out);
    let out = re_spaces.replace_all(&out, " ");
    let out: Vec<&str> = out.lines().map(str::trim).collect();
    re_blank
        .replace_all(&out.join("\n"), "\n\n")
        .trim()
        .to_string()
}
