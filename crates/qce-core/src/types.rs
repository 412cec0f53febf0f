use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::QceError;

/// Conversation kind as exposed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatType::Private => write!(f, "private"),
            ChatType::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ChatType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatType::Private),
            "group" => Ok(ChatType::Group),
            other => Err(format!("unknown chat type: {other}")),
        }
    }
}

/// Opaque triple identifying one conversation. Immutable; equality over all
/// three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef {
    pub chat_type: ChatType,
    pub peer_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

impl ChatRef {
    pub fn private(peer_uid: impl Into<String>) -> Self {
        Self {
            chat_type: ChatType::Private,
            peer_uid: peer_uid.into(),
            guild_id: None,
        }
    }

    pub fn group(peer_uid: impl Into<String>) -> Self {
        Self {
            chat_type: ChatType::Group,
            peer_uid: peer_uid.into(),
            guild_id: None,
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_type, self.peer_uid)
    }
}

/// Promote a seconds-scale timestamp to milliseconds.
///
/// Values strictly between 10^9 and 10^10 are plausible unix *seconds*
/// (2001-09..2286-11) and get multiplied by 1000; anything else is passed
/// through untouched as milliseconds.
pub fn promote_millis(t: i64) -> i64 {
    if t > 1_000_000_000 && t < 10_000_000_000 {
        t * 1000
    } else {
        t
    }
}

/// Half-open interval `[start_ms, end_ms)` over message timestamps.
///
/// Either bound may be 0, meaning unbounded on that side. Construction
/// applies the seconds→millis promotion to both bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self, QceError> {
        let start_ms = promote_millis(start_ms);
        let end_ms = promote_millis(end_ms);
        if start_ms < 0 || end_ms < 0 {
            return Err(QceError::Validation("time window bounds must be >= 0".into()));
        }
        if start_ms != 0 && end_ms != 0 && start_ms > end_ms {
            return Err(QceError::Validation(format!(
                "time window start {start_ms} is after end {end_ms}"
            )));
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Both sides open.
    pub fn unbounded() -> Self {
        Self { start_ms: 0, end_ms: 0 }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start_ms == 0 && self.end_ms == 0
    }

    /// Whether a (promoted) millisecond timestamp falls inside the window.
    pub fn contains(&self, t_ms: i64) -> bool {
        let t = promote_millis(t_ms);
        (self.start_ms == 0 || t >= self.start_ms) && (self.end_ms == 0 || t < self.end_ms)
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}
