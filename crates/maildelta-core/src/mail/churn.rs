//! Conversation summary derivation.

use super::model::{ConversationRecord, MessageRecord};

/// Recompute a conversation's summary from all of its messages.
#[must_use]
pub fn churn_conversation(conversation_id: &str, messages: &[MessageRecord]) -> ConversationRecord {
    let mut flags: Vec<String> = Vec::new();
    let mut folder_ids: Vec<String> = Vec::new();
    for message in messages {
        for flag in &message.flags {
            if !flags.contains(flag) {
                flags.push(flag.clone());
            }
        }
        for folder_id in &message.folder_ids {
            if !folder_ids.contains(folder_id) {
                folder_ids.push(folder_id.clone());
            }
        }
    }

    ConversationRecord {
        id: conversation_id.to_string(),
        subject: messages
            .iter()
            .min_by_key(|m| m.date)
            .map(|m| m.subject.clone())
            .unwrap_or_default(),
        message_count: messages.len(),
        unread_count: messages.iter().filter(|m| !m.is_read()).count(),
        flagged_count: messages.iter().filter(|m| m.is_flagged()).count(),
        latest_date: messages.iter().map(|m| m.date).max(),
        flags,
        folder_ids,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn message(id: &str, day: u32, flags: &[&str], folders: &[&str]) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            umid: format!("u-{id}"),
            conversation_id: "c1".to_string(),
            date: Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap(),
            subject: format!("subject {id}"),
            flags: flags.iter().map(|s| (*s).to_string()).collect(),
            folder_ids: folders.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn counts_and_unions() {
        let messages = vec![
            message("m1", 2, &["\\Seen"], &["inbox"]),
            message("m2", 5, &["\\Flagged"], &["inbox", "work"]),
            message("m3", 1, &[], &["inbox"]),
        ];

        let conv = churn_conversation("c1", &messages);

        assert_eq!(conv.message_count, 3);
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.flagged_count, 1);
        assert_eq!(conv.subject, "subject m3");
        assert_eq!(conv.latest_date, Some(messages[1].date));
        assert_eq!(conv.flags, vec!["\\Seen", "\\Flagged"]);
        assert_eq!(conv.folder_ids, vec!["inbox", "work"]);
    }

    #[test]
    fn empty_conversation() {
        let conv = churn_conversation("c9", &[]);
        assert_eq!(conv.message_count, 0);
        assert_eq!(conv.latest_date, None);
        assert!(conv.subject.is_empty());
    }
}
