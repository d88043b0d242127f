//! Shared fixtures: an in-memory mail database behind `TaskContext` and a
//! `MailAccount` that records every store.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

use maildelta_core::mail::{ConversationRecord, MessageRecord, UmidLocation, churn_conversation};
use maildelta_core::task::{MutateSnapshot, ReadRequest, StoreAction, StoreItem};
use maildelta_core::{
    AccountId, DataOverlayManager, Error, MailAccount, PlannedTask, RawTask, ResourceLocks,
    Result, TaskCompletion, TaskContext, TaskMarker, TaskRegistry, TaskStateRepository,
    register_stock_tasks,
};

pub const ACCOUNT: AccountId = AccountId(1);

/// Local records plus everything committed by `finish_task`.
#[derive(Debug, Default)]
pub struct Db {
    pub conversations: HashMap<String, ConversationRecord>,
    pub messages: BTreeMap<String, MessageRecord>,
    pub umid_locations: HashMap<String, UmidLocation>,
    pub markers: BTreeMap<String, TaskMarker>,
    pub task_state: HashMap<String, serde_json::Value>,
    pub undo_tasks: Vec<RawTask>,
    pub planned: Vec<PlannedTask>,
}

impl Db {
    /// Add a message and its server location, and churn its conversation.
    pub fn insert_message(&mut self, message: MessageRecord, folder_id: &str, uid: u32) {
        self.umid_locations.insert(
            message.umid.clone(),
            UmidLocation {
                folder_id: folder_id.to_string(),
                uid,
            },
        );
        let conversation_id = message.conversation_id.clone();
        self.messages.insert(message.id.clone(), message);
        let summary = churn_conversation(&conversation_id, &self.conversation_messages(&conversation_id));
        self.conversations.insert(conversation_id, summary);
    }

    pub fn conversation_messages(&self, conversation_id: &str) -> Vec<MessageRecord> {
        self.messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn flags(&self, message_id: &str) -> Vec<String> {
        self.messages[message_id].flags.clone()
    }

    pub fn marker_ids(&self) -> Vec<String> {
        self.markers.keys().cloned().collect()
    }

    pub fn pending(&self, task_type: &str) -> serde_json::Value {
        self.task_state
            .get(task_type)
            .map_or(serde_json::Value::Null, |state| state["entity_changes"].clone())
    }
}

pub fn message(id: &str, umid: &str, day: u32, flags: &[&str], folder_ids: &[&str]) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        umid: umid.to_string(),
        conversation_id: "c1".to_string(),
        date: Utc.with_ymd_and_hms(2026, 3, day, 9, 30, 0).unwrap(),
        subject: format!("Subject {id}"),
        flags: flags.iter().map(|f| (*f).to_string()).collect(),
        folder_ids: folder_ids.iter().map(|f| (*f).to_string()).collect(),
    }
}

/// One store issued against the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub folder_path: String,
    pub uids: Vec<u32>,
    pub action: StoreAction,
    pub item: StoreItem,
    pub values: Vec<String>,
    pub account_locked: bool,
}

/// Holds a store on the server side until released.
#[derive(Debug, Default)]
pub struct StoreGate {
    pub entered: Notify,
    pub release: Notify,
}

/// Account that records stores and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingAccount {
    pub calls: Mutex<Vec<StoreCall>>,
    pub fail: AtomicBool,
    pub locks: Option<Arc<ResourceLocks>>,
    pub gate: Option<Arc<StoreGate>>,
}

impl RecordingAccount {
    pub fn watching(locks: Arc<ResourceLocks>) -> Self {
        Self {
            locks: Some(locks),
            ..Self::default()
        }
    }

    pub fn gated(gate: Arc<StoreGate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailAccount for RecordingAccount {
    fn folder_path(&self, folder_id: &str) -> Option<String> {
        match folder_id {
            "f-inbox" => Some("INBOX".to_string()),
            "f-work" => Some("Work".to_string()),
            "f-all" => Some("[Gmail]/All Mail".to_string()),
            _ => None,
        }
    }

    fn label_for_folder(&self, folder_id: &str) -> Option<String> {
        match folder_id {
            "f-inbox" => Some("\\Inbox".to_string()),
            "f-work" => Some("Work".to_string()),
            _ => None,
        }
    }

    async fn store(
        &self,
        folder_path: &str,
        uids: &[u32],
        action: StoreAction,
        item: StoreItem,
        values: &[String],
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Remote("connection reset".to_string()));
        }
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let account_locked = self
            .locks
            .as_ref()
            .is_some_and(|locks| locks.is_held(&format!("account:{}", ACCOUNT.0)));
        self.calls.lock().unwrap().push(StoreCall {
            folder_path: folder_path.to_string(),
            uids: uids.to_vec(),
            action,
            item,
            values: values.to_vec(),
            account_locked,
        });
        Ok(())
    }
}

/// `TaskContext` over the shared in-memory database, optionally also
/// committing task state and markers to a repository.
pub struct MemoryContext {
    pub db: Arc<Mutex<Db>>,
    pub account: Arc<RecordingAccount>,
    pub repository: Option<Arc<TaskStateRepository>>,
    pub task_instance: Option<String>,
    pub reads: Vec<ReadRequest>,
    pub finalized: usize,
}

impl MemoryContext {
    pub fn new(db: Arc<Mutex<Db>>, account: Arc<RecordingAccount>) -> Self {
        Self {
            db,
            account,
            repository: None,
            task_instance: None,
            reads: Vec::new(),
            finalized: 0,
        }
    }

    pub fn with_repository(mut self, repository: Arc<TaskStateRepository>) -> Self {
        self.repository = Some(repository);
        self
    }
}

#[async_trait]
impl TaskContext for MemoryContext {
    async fn begin_mutate(&mut self, request: ReadRequest) -> Result<MutateSnapshot> {
        self.reads.push(request.clone());
        let db = self.db.lock().unwrap();
        let mut snapshot = MutateSnapshot::default();
        for id in request.messages_by_conversation {
            let messages = db.conversation_messages(&id);
            snapshot.messages_by_conversation.insert(id, messages);
        }
        for umid in request.umid_locations {
            let location = db.umid_locations.get(&umid).cloned();
            snapshot.umid_locations.insert(umid, location);
        }
        Ok(snapshot)
    }

    async fn finish_task(&mut self, completion: TaskCompletion) -> Result<()> {
        let task_type = self.task_instance.clone().unwrap_or_default();
        if let Some(repository) = &self.repository {
            repository
                .commit(
                    ACCOUNT,
                    &task_type,
                    completion.complex_task_state.as_ref(),
                    &completion.task_markers,
                )
                .await?;
        }

        let mut db = self.db.lock().unwrap();
        for (id, conversation) in completion.mutations.conversations {
            db.conversations.insert(id, conversation);
        }
        for (id, message) in completion.mutations.messages {
            db.messages.insert(id, message);
        }
        for (id, marker) in completion.task_markers {
            match marker {
                Some(marker) => {
                    db.markers.insert(id, marker);
                }
                None => {
                    db.markers.remove(&id);
                }
            }
        }
        if let Some(state) = completion.complex_task_state {
            db.task_state.insert(task_type, state);
        }
        db.undo_tasks.extend(completion.undo_tasks);
        db.planned.extend(completion.planned_task);
        Ok(())
    }

    async fn acquire_account(&mut self, account_id: AccountId) -> Result<Arc<dyn MailAccount>> {
        if account_id == ACCOUNT {
            Ok(self.account.clone())
        } else {
            Err(Error::AccountNotFound(account_id))
        }
    }

    fn set_task_instance(&mut self, task_type: &str) {
        self.task_instance = Some(task_type.to_string());
    }

    fn failsafe_finalize(&mut self) {
        self.finalized += 1;
    }
}

/// Registry with the stock task sets and a fresh overlay manager.
pub fn stock_registry(locks: Arc<ResourceLocks>) -> TaskRegistry {
    let mut registry = TaskRegistry::new(Arc::new(DataOverlayManager::default()), locks);
    register_stock_tasks(&mut registry);
    registry
}
