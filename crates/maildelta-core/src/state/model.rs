//! Stored state shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::AccountId;

/// Key of one persisted state row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// Owning account.
    pub account_id: AccountId,
    /// Task type the state belongs to.
    pub task_type: String,
    /// Entry key when the state is stored as a keyed map.
    pub task_key: Option<String>,
}

impl StateKey {
    /// Key of a single-object state.
    #[must_use]
    pub fn single(account_id: AccountId, task_type: &str) -> Self {
        Self {
            account_id,
            task_type: task_type.to_string(),
            task_key: None,
        }
    }

    /// Key of one entry of a keyed-map state.
    #[must_use]
    pub fn keyed(account_id: AccountId, task_type: &str, task_key: &str) -> Self {
        Self {
            account_id,
            task_type: task_type.to_string(),
            task_key: Some(task_key.to_string()),
        }
    }
}

/// Persisted state of one task type for one account, as loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredState {
    /// One object holding the whole state.
    Single(serde_json::Value),
    /// Multiple keyed records.
    Keyed(BTreeMap<String, serde_json::Value>),
}

impl StoredState {
    /// The state as a single JSON value; keyed maps become objects.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        match self {
            Self::Single(value) => value,
            Self::Keyed(entries) => serde_json::Value::Object(entries.into_iter().collect()),
        }
    }
}
