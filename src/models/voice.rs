//! Voice and vote models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Review status of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStatus {
    Pending,
    Accepted,
    Denied,
}

impl From<&str> for VoiceStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "accepted" => Self::Accepted,
            "denied" => Self::Denied,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Kind of a single vote, and of the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Accept,
    Deny,
}

impl From<&str> for VoteKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "deny" => Self::Deny,
            _ => Self::Accept,
        }
    }
}

impl std::fmt::Display for VoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// A voice submitted to the bot, waiting for or past its vote.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Voice {
    /// Local voice ID.
    pub id: i64,

    /// Telegram file ID of the audio.
    pub file_id: String,

    /// Display name chosen by the sender.
    pub name: String,

    /// Telegram user ID of the sender.
    pub sender_id: i64,

    /// Status: `pending`, `accepted`, `denied`.
    pub status: String,

    /// Whether an admin has already reviewed the voice.
    pub reviewed: bool,

    /// Admin currently holding the review claim (optional).
    pub assigned_admin: Option<i64>,

    /// Telegram message carrying the vote keyboard (optional).
    pub message_id: Option<i64>,

    /// When the voice was submitted (Unix).
    pub created_at: i64,
}

impl Voice {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> VoiceStatus {
        VoiceStatus::from(self.status.as_str())
    }

    /// Check if the voice is still open for voting.
    pub fn is_pending(&self) -> bool {
        self.status_enum() == VoiceStatus::Pending
    }
}

/// Accept and deny tallies of a voice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub accept: i64,
    pub deny: i64,
}

impl VoteCounts {
    /// Decide the outcome of a vote.
    ///
    /// No votes at all means the vote is still open. Otherwise accept wins
    /// ties, so `1-1` accepts while `0-1` denies.
    pub fn decide(&self) -> Option<VoteKind> {
        if self.accept == 0 && self.deny == 0 {
            None
        } else if self.accept >= self.deny {
            Some(VoteKind::Accept)
        } else {
            Some(VoteKind::Deny)
        }
    }

    /// Total number of votes cast.
    pub fn total(&self) -> i64 {
        self.accept + self.deny
    }
}
