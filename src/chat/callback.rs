// src/chat/callback.rs
//! Inline-button payloads: `"<action> <site> <id> [<score>]"`.
//!
//! Telegram caps `callback_data` at 64 bytes, so the score is written with
//! two decimals.

use std::fmt;
use std::str::FromStr;

use crate::error::CallbackParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Hide,
    Delete,
    MarkTrue,
    MarkFalse,
    Print,
}

impl CallbackAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackAction::Hide => "cb_hide",
            CallbackAction::Delete => "cb_delete",
            CallbackAction::MarkTrue => "cb_true",
            CallbackAction::MarkFalse => "cb_false",
            CallbackAction::Print => "cb_print",
        }
    }
}

impl FromStr for CallbackAction {
    type Err = CallbackParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cb_hide" => Ok(CallbackAction::Hide),
            "cb_delete" => Ok(CallbackAction::Delete),
            "cb_true" => Ok(CallbackAction::MarkTrue),
            "cb_false" => Ok(CallbackAction::MarkFalse),
            "cb_print" => Ok(CallbackAction::Print),
            other => Err(CallbackParseError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackData {
    pub action: CallbackAction,
    pub site: String,
    pub id: String,
    pub score: Option<f64>,
}

impl CallbackData {
    pub fn new(action: CallbackAction, site: &str, id: &str) -> Self {
        Self {
            action,
            site: site.to_string(),
            id: id.to_string(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action.as_str(), self.site, self.id)?;
        if let Some(s) = self.score {
            write!(f, " {s:.2}")?;
        }
        Ok(())
    }
}

impl FromStr for CallbackData {
    type Err = CallbackParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        match fields.as_slice() {
            [] => Err(CallbackParseError::Empty),
            [action, site, id] => Ok(Self::new(action.parse()?, site, id)),
            [action, site, id, score] => {
                let score = score
                    .parse::<f64>()
                    .map_err(|_| CallbackParseError::BadScore(score.to_string()))?;
                Ok(Self::new(action.parse()?, site, id).with_score(score))
            }
            other => Err(CallbackParseError::FieldCount(other.len())),
        }
    }
}
