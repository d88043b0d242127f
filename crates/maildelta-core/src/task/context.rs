//! The execution context handed to plan and execute.
//!
//! The scheduler that owns the task queue implements [`TaskContext`]. It is
//! the only way a task reaches the database or an account connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use super::account::MailAccount;
use super::model::{AccountId, PlannedTask, RawTask, TaskMarker};
use crate::Result;
use crate::mail::{ConversationRecord, MessageRecord, UmidLocation};

/// Collections and keys to read for mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// All messages of each listed conversation.
    pub messages_by_conversation: Vec<String>,
    /// Server locations by umid.
    pub umid_locations: Vec<String>,
}

impl ReadRequest {
    /// An empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also read every message of a conversation.
    #[must_use]
    pub fn messages_of(mut self, conversation_id: &str) -> Self {
        self.messages_by_conversation.push(conversation_id.to_string());
        self
    }

    /// Also read where a message lives on the server.
    #[must_use]
    pub fn umid_location(mut self, umid: &str) -> Self {
        self.umid_locations.push(umid.to_string());
        self
    }
}

/// What `begin_mutate` read. Missing records map to `None`.
#[derive(Debug, Clone, Default)]
pub struct MutateSnapshot {
    /// Messages per conversation.
    pub messages_by_conversation: HashMap<String, Vec<MessageRecord>>,
    /// Server locations by umid.
    pub umid_locations: HashMap<String, Option<UmidLocation>>,
}

/// Local record writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutations {
    /// Conversation summaries to write.
    pub conversations: HashMap<String, ConversationRecord>,
    /// Messages to write.
    pub messages: HashMap<String, MessageRecord>,
}

impl Mutations {
    /// Whether there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty() && self.messages.is_empty()
    }
}

/// Everything a task hands back to be committed in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskCompletion {
    /// Local data writes.
    pub mutations: Mutations,
    /// Marker set delta: `Some` adds or replaces, `None` removes.
    pub task_markers: BTreeMap<String, Option<TaskMarker>>,
    /// Updated persistent state of the complex task that is finishing.
    pub complex_task_state: Option<serde_json::Value>,
    /// The planned form of a simple task.
    pub planned_task: Option<PlannedTask>,
    /// Requests that would revert what the plan did locally.
    pub undo_tasks: Vec<RawTask>,
}

/// Supplied by the scheduler for the duration of one plan or execute.
#[async_trait]
pub trait TaskContext: Send {
    /// Read records for mutation.
    async fn begin_mutate(&mut self, request: ReadRequest) -> Result<MutateSnapshot>;

    /// Atomically commit mutations, marker changes and task state.
    async fn finish_task(&mut self, completion: TaskCompletion) -> Result<()>;

    /// Acquire the account object for network work.
    async fn acquire_account(&mut self, account_id: AccountId) -> Result<Arc<dyn MailAccount>>;

    /// Records which implementation is running under this context.
    fn set_task_instance(&mut self, task_type: &str);

    /// Releases anything the task left open. Called exactly once per dispatch.
    fn failsafe_finalize(&mut self);
}
