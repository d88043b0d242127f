//! Narrowing a conversation's messages down to the ones a request targets.

use serde::{Deserialize, Serialize};

use super::model::MessageRecord;

/// Picks a subset of the candidate messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSelector {
    /// Only the newest message.
    Last,
}

/// Indices of the messages a request applies to.
///
/// `only_messages` restricts candidates to the listed message ids; the
/// selector then narrows the candidates further. With neither, every message
/// is selected.
#[must_use]
pub fn select_messages(
    messages: &[MessageRecord],
    only_messages: Option<&[String]>,
    selector: Option<MessageSelector>,
) -> Vec<usize> {
    let candidates: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| only_messages.is_none_or(|only| only.contains(&m.id)))
        .map(|(index, _)| index)
        .collect();

    match selector {
        None => candidates,
        Some(MessageSelector::Last) => candidates
            .into_iter()
            .max_by_key(|&index| messages[index].date)
            .into_iter()
            .collect(),
    }
}
