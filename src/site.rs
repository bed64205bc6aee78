//! Closed set of supported content sites.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A content site the detector can follow and store posts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    DeviantArt,
}

impl Site {
    pub const ALL: [Site; 1] = [Site::DeviantArt];

    /// Machine name used in callbacks, collection names and classifier requests.
    pub fn name(self) -> &'static str {
        match self {
            Site::DeviantArt => "deviantart",
        }
    }

    /// Display name used in chat keyboards.
    pub fn pretty_name(self) -> &'static str {
        match self {
            Site::DeviantArt => "DeviantArt",
        }
    }

    /// Accepts either the machine or the display name, ignoring case.
    pub fn parse(text: &str) -> Option<Site> {
        let t = text.trim();
        Site::ALL
            .into_iter()
            .find(|s| t.eq_ignore_ascii_case(s.name()) || t.eq_ignore_ascii_case(s.pretty_name()))
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
