//! Flag and label stores on the messages of a conversation.
//!
//! Both tasks share one lifecycle: a plan applies the request to the local
//! messages right away, folds the effective change into the pending change
//! set of each message (keyed by umid) and issues one marker per message with
//! pending server work. Edits that cancel out drop the pending entry and its
//! marker before anything reaches the network. An execute sends the pending
//! change set with at most one add and one remove store, then clears it.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delta::{ChangeSet, apply_change_set, compute_effective_change, merge_change_sets};
use crate::mail::{MessageRecord, MessageSelector, churn_conversation, select_messages};
use crate::task::{
    AccountId, ComplexTask, ConsultRequest, DerivedState, MailAccount, RawTask, ReadRequest,
    StoreAction, StoreItem, TaskCompletion, TaskContext, TaskMarker,
};
use crate::{Error, Result};

/// Arguments of a `store_flags` or `store_labels` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    /// Conversation whose messages are targeted.
    pub conversation_id: String,
    /// Restrict the request to these message ids.
    #[serde(default)]
    pub only_messages: Option<Vec<String>>,
    /// Narrow the remaining messages further.
    #[serde(default)]
    pub message_selector: Option<MessageSelector>,
    /// Values to add.
    #[serde(default)]
    pub add: Option<Vec<String>>,
    /// Values to remove.
    #[serde(default)]
    pub remove: Option<Vec<String>>,
}

impl StoreRequest {
    /// A request against every message of a conversation.
    #[must_use]
    pub fn conversation(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            ..Self::default()
        }
    }

    /// Values to add.
    #[must_use]
    pub fn add<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Values to remove.
    #[must_use]
    pub fn remove<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to specific messages.
    #[must_use]
    pub fn only(mut self, message_ids: &[&str]) -> Self {
        self.only_messages = Some(message_ids.iter().map(|id| (*id).to_string()).collect());
        self
    }

    /// Apply a selector.
    #[must_use]
    pub const fn select(mut self, selector: MessageSelector) -> Self {
        self.message_selector = Some(selector);
        self
    }

    /// Wrap as a raw task of the given type.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn into_raw(self, task_type: &str, account_id: AccountId) -> Result<RawTask> {
        RawTask::new(task_type, Some(account_id), &self)
    }
}

/// Pending server-bound changes, one change set per message umid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    /// Outstanding change per umid.
    pub entity_changes: BTreeMap<String, ChangeSet<String>>,
}

/// A list-valued message attribute a store task manipulates.
pub trait MessageAttribute: Send + Sync + 'static {
    /// Task type name.
    const TASK_TYPE: &'static str;
    /// Server-side data item.
    const ITEM: StoreItem;

    /// The attribute on a local message.
    fn values_mut(message: &mut MessageRecord) -> &mut Vec<String>;

    /// Translate local values to the names the server uses.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has no server counterpart.
    fn to_server(account: &dyn MailAccount, values: &[String]) -> Result<Vec<String>>;
}

/// IMAP system and keyword flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags;

impl MessageAttribute for Flags {
    const TASK_TYPE: &'static str = "store_flags";
    const ITEM: StoreItem = StoreItem::Flags;

    fn values_mut(message: &mut MessageRecord) -> &mut Vec<String> {
        &mut message.flags
    }

    fn to_server(_account: &dyn MailAccount, values: &[String]) -> Result<Vec<String>> {
        Ok(values.to_vec())
    }
}

/// Gmail labels, held locally as folder ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct Labels;

impl MessageAttribute for Labels {
    const TASK_TYPE: &'static str = "store_labels";
    const ITEM: StoreItem = StoreItem::GmailLabels;

    fn values_mut(message: &mut MessageRecord) -> &mut Vec<String> {
        &mut message.folder_ids
    }

    fn to_server(account: &dyn MailAccount, values: &[String]) -> Result<Vec<String>> {
        values
            .iter()
            .map(|folder_id| {
                account
                    .label_for_folder(folder_id)
                    .ok_or_else(|| Error::UnknownFolder(folder_id.clone()))
            })
            .collect()
    }
}

/// Complex task storing one attribute on messages.
#[derive(Debug, Clone, Copy)]
pub struct StoreTask<A> {
    executes: bool,
    _attribute: PhantomData<A>,
}

/// `store_flags`.
pub type StoreFlagsTask = StoreTask<Flags>;

/// `store_labels`.
pub type StoreLabelsTask = StoreTask<Labels>;

impl<A: MessageAttribute> StoreTask<A> {
    /// A task that mirrors every change to the server.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            executes: true,
            _attribute: PhantomData,
        }
    }

    /// A task for accounts with nothing to store on the server (POP3). It
    /// changes local messages only and never leaves pending work behind.
    #[must_use]
    pub const fn local_only() -> Self {
        Self {
            executes: false,
            _attribute: PhantomData,
        }
    }
}

impl<A: MessageAttribute> Default for StoreTask<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<A: MessageAttribute> ComplexTask for StoreTask<A> {
    type PersistentState = StoreState;
    type MemoryState = ();

    fn name(&self) -> &str {
        A::TASK_TYPE
    }

    fn executes(&self) -> bool {
        self.executes
    }

    fn init_persistent_state(&self) -> StoreState {
        StoreState::default()
    }

    async fn derive_memory_state_from_persistent_state(
        &self,
        persistent: &StoreState,
        account_id: AccountId,
    ) -> Result<DerivedState<()>> {
        let markers = persistent
            .entity_changes
            .keys()
            .map(|umid| TaskMarker::for_entity(A::TASK_TYPE, account_id, umid))
            .collect();
        Ok(DerivedState {
            memory_state: (),
            markers,
        })
    }

    async fn plan(
        &self,
        ctx: &mut dyn TaskContext,
        persistent: &mut StoreState,
        _memory: &mut (),
        raw: RawTask,
    ) -> Result<()> {
        let account_id = raw
            .account_id
            .ok_or_else(|| Error::MissingAccount(raw.task_type.clone()))?;
        let request: StoreRequest = raw.parse_args()?;
        let conversation_id = request.conversation_id.as_str();

        let mut snapshot = ctx
            .begin_mutate(ReadRequest::new().messages_of(conversation_id))
            .await?;
        let mut messages = snapshot
            .messages_by_conversation
            .remove(conversation_id)
            .unwrap_or_default();

        let selected = select_messages(
            &messages,
            request.only_messages.as_deref(),
            request.message_selector,
        );

        let mut completion = TaskCompletion::default();
        for index in selected {
            let message = &mut messages[index];
            let change = compute_effective_change(
                A::values_mut(message),
                request.add.as_deref(),
                request.remove.as_deref(),
            );
            if change.is_empty() {
                continue;
            }

            // Invert what actually changed, not what was asked for.
            completion.undo_tasks.push(RawTask::new(
                A::TASK_TYPE,
                Some(account_id),
                &StoreRequest {
                    conversation_id: conversation_id.to_string(),
                    only_messages: Some(vec![message.id.clone()]),
                    message_selector: None,
                    add: change.remove.clone(),
                    remove: change.add.clone(),
                },
            )?);
            completion
                .mutations
                .messages
                .insert(message.id.clone(), message.clone());

            let umid = message.umid.clone();
            let marker_id = TaskMarker::id_for(A::TASK_TYPE, &umid);
            let pending = match persistent.entity_changes.get(&umid) {
                Some(existing) => merge_change_sets(existing, &change),
                None if self.executes => change,
                None => continue,
            };

            if pending.is_empty() {
                debug!("Pending {} for {} cancelled out", A::TASK_TYPE, umid);
                persistent.entity_changes.remove(&umid);
                completion.task_markers.insert(marker_id, None);
            } else {
                completion.task_markers.insert(
                    marker_id,
                    Some(TaskMarker::for_entity(A::TASK_TYPE, account_id, &umid)),
                );
                persistent.entity_changes.insert(umid, pending);
            }
        }

        if !completion.mutations.messages.is_empty() {
            let summary = churn_conversation(conversation_id, &messages);
            completion
                .mutations
                .conversations
                .insert(conversation_id.to_string(), summary);
        }

        completion.complex_task_state = Some(serde_json::to_value(&*persistent)?);
        ctx.finish_task(completion).await
    }

    async fn execute(
        &self,
        ctx: &mut dyn TaskContext,
        persistent: &mut StoreState,
        _memory: &mut (),
        marker: &TaskMarker,
    ) -> Result<()> {
        let umid = marker.entity_key.as_str();
        let Some(changes) = persistent.entity_changes.get(umid).cloned() else {
            debug!("No pending {} for {}", A::TASK_TYPE, umid);
            return Ok(());
        };

        let snapshot = ctx
            .begin_mutate(ReadRequest::new().umid_location(umid))
            .await?;
        let location = snapshot
            .umid_locations
            .get(umid)
            .cloned()
            .flatten()
            .ok_or_else(|| Error::MissingLocation(umid.to_string()))?;

        let account = ctx.acquire_account(marker.account_id).await?;
        let folder_path = account
            .folder_path(&location.folder_id)
            .ok_or_else(|| Error::UnknownFolder(location.folder_id.clone()))?;

        for (action, values) in [
            (StoreAction::Add, changes.added()),
            (StoreAction::Remove, changes.removed()),
        ] {
            if values.is_empty() {
                continue;
            }
            let server_values = A::to_server(account.as_ref(), values)?;
            account
                .store(&folder_path, &[location.uid], action, A::ITEM, &server_values)
                .await?;
        }

        persistent.entity_changes.remove(umid);
        let mut completion = TaskCompletion {
            complex_task_state: Some(serde_json::to_value(&*persistent)?),
            ..TaskCompletion::default()
        };
        completion.task_markers.insert(marker.id.clone(), None);
        ctx.finish_task(completion).await
    }

    fn consult(
        &self,
        _ctx: &dyn TaskContext,
        persistent: &StoreState,
        _memory: &(),
        request: ConsultRequest<'_>,
    ) -> Result<()> {
        if let Some(changes) = persistent.entity_changes.get(request.entity_key) {
            apply_change_set(request.value, changes);
        }
        Ok(())
    }

    fn overlay_namespaces(&self) -> &'static [&'static str] {
        &["messages"]
    }

    fn overlay(
        &self,
        _namespace: &str,
        persistent: &StoreState,
        _memory: &(),
        umid: &str,
    ) -> Option<serde_json::Value> {
        persistent
            .entity_changes
            .get(umid)
            .and_then(|changes| serde_json::to_value(changes).ok())
    }
}
