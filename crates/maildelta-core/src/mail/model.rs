//! Mail record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flag set on messages that have been read.
pub const SEEN: &str = "\\Seen";

/// Flag set on messages that are starred.
pub const FLAGGED: &str = "\\Flagged";

/// A message as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Local message id.
    pub id: String,
    /// Unique message id; stable across folder moves.
    pub umid: String,
    /// Conversation this message belongs to.
    pub conversation_id: String,
    /// Message date.
    pub date: DateTime<Utc>,
    /// Message subject.
    pub subject: String,
    /// IMAP flags and keywords.
    pub flags: Vec<String>,
    /// Folders (or Gmail labels) the message is filed in.
    pub folder_ids: Vec<String>,
}

impl MessageRecord {
    /// Whether the message has been read.
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.flags.iter().any(|f| f == SEEN)
    }

    /// Whether the message is starred.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.flags.iter().any(|f| f == FLAGGED)
    }
}

/// Summary of a conversation, derived from its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation id.
    pub id: String,
    /// Subject of the first message.
    pub subject: String,
    /// Number of messages.
    pub message_count: usize,
    /// Number of messages without `\Seen`.
    pub unread_count: usize,
    /// Number of messages with `\Flagged`.
    pub flagged_count: usize,
    /// Date of the newest message.
    pub latest_date: Option<DateTime<Utc>>,
    /// Union of all message flags.
    pub flags: Vec<String>,
    /// Union of all message folders.
    pub folder_ids: Vec<String>,
}

/// Where a message currently lives on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmidLocation {
    /// Folder holding the message.
    pub folder_id: String,
    /// Server UID inside that folder.
    pub uid: u32,
}
