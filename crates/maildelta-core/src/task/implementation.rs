//! Task implementation contracts.
//!
//! A task type is either *simple* (stateless plan, optional execute) or
//! *complex* (owns persistent state per account, re-derives memory state and
//! markers on startup, and may answer consult and overlay queries).

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::account::MailAccount;
use super::context::{MutateSnapshot, ReadRequest, TaskCompletion, TaskContext};
use super::model::{AccountId, PlannedTask, RawTask, TaskMarker};
use crate::overlay::DataOverlayManager;
use crate::state::StoredState;
use crate::{Error, Result};

/// Arguments of a consult: project pending intent for one entity onto `value`.
#[derive(Debug)]
pub struct ConsultRequest<'a> {
    /// The entity being asked about.
    pub entity_key: &'a str,
    /// Snapshot of the attribute; updated in place.
    pub value: &'a mut Vec<String>,
}

/// Memory state and the markers re-derived from persistent state.
#[derive(Debug, Clone)]
pub struct DerivedState<M> {
    /// Runtime-only state.
    pub memory_state: M,
    /// Work that must be re-offered to the scheduler.
    pub markers: Vec<TaskMarker>,
}

/// A task with no persistent state.
#[async_trait]
pub trait SimpleTask: Send + Sync + 'static {
    /// Task type name.
    fn name(&self) -> &str;

    /// Priority tags attached when planning.
    fn priority_tags(&self, _raw: &RawTask) -> Vec<String> {
        Vec::new()
    }

    /// Resources held while executing.
    fn exclusive_resources(&self, _raw: &RawTask) -> Vec<String> {
        Vec::new()
    }

    /// Plan the task. The default decorates it and finishes it as planned.
    async fn plan(&self, ctx: &mut dyn TaskContext, raw: RawTask) -> Result<()> {
        let planned = PlannedTask {
            priority_tags: self.priority_tags(&raw),
            exclusive_resources: self.exclusive_resources(&raw),
            raw,
        };
        ctx.finish_task(TaskCompletion {
            planned_task: Some(planned),
            ..TaskCompletion::default()
        })
        .await
    }

    /// Whether the task has any network work to do.
    fn executes(&self) -> bool {
        false
    }

    /// Perform the planned work.
    async fn execute(&self, _ctx: &mut dyn TaskContext, _planned: &PlannedTask) -> Result<()> {
        Ok(())
    }
}

/// A task that aggregates requests into per-account persistent state.
///
/// The registry owns one `(PersistentState, MemoryState)` pair per account and
/// hands it to every call; implementations keep no per-account state of their
/// own.
#[async_trait]
pub trait ComplexTask: Send + Sync + 'static {
    /// Durable state, serialized on every commit and loaded on startup.
    type PersistentState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    /// Runtime state, always re-derived from the persistent state.
    type MemoryState: Clone + Send + Sync + 'static;

    /// Task type name.
    fn name(&self) -> &str;

    /// Whether the task sends anything to the server. Local-only tasks never
    /// produce markers.
    fn executes(&self) -> bool {
        true
    }

    /// State for an account that has none stored.
    fn init_persistent_state(&self) -> Self::PersistentState;

    /// Rebuild memory state and pending markers after a restart.
    async fn derive_memory_state_from_persistent_state(
        &self,
        persistent: &Self::PersistentState,
        account_id: AccountId,
    ) -> Result<DerivedState<Self::MemoryState>>;

    /// Apply a request locally and record the server-bound remainder.
    async fn plan(
        &self,
        ctx: &mut dyn TaskContext,
        persistent: &mut Self::PersistentState,
        memory: &mut Self::MemoryState,
        raw: RawTask,
    ) -> Result<()>;

    /// Perform the network work behind a marker.
    async fn execute(
        &self,
        ctx: &mut dyn TaskContext,
        persistent: &mut Self::PersistentState,
        memory: &mut Self::MemoryState,
        marker: &TaskMarker,
    ) -> Result<()>;

    /// Project pending intent onto a snapshot.
    ///
    /// # Errors
    ///
    /// The default reports that the task cannot be consulted.
    fn consult(
        &self,
        _ctx: &dyn TaskContext,
        _persistent: &Self::PersistentState,
        _memory: &Self::MemoryState,
        _request: ConsultRequest<'_>,
    ) -> Result<()> {
        Err(Error::ConsultUnsupported(self.name().to_string()))
    }

    /// Overlay namespaces this task provides data for.
    fn overlay_namespaces(&self) -> &'static [&'static str] {
        &[]
    }

    /// Overlay contribution for one item of a namespace.
    fn overlay(
        &self,
        _namespace: &str,
        _persistent: &Self::PersistentState,
        _memory: &Self::MemoryState,
        _id: &str,
    ) -> Option<serde_json::Value> {
        None
    }
}

/// A registered task implementation.
#[derive(Clone)]
pub struct TaskImplementation(pub(crate) Kind);

#[derive(Clone)]
pub(crate) enum Kind {
    Simple(Arc<dyn SimpleTask>),
    Complex(Arc<dyn ComplexDefinition>),
}

impl TaskImplementation {
    /// Wrap a simple task.
    pub fn simple(task: impl SimpleTask) -> Self {
        Self(Kind::Simple(Arc::new(task)))
    }

    /// Wrap a complex task.
    pub fn complex<T: ComplexTask>(task: T) -> Self {
        Self(Kind::Complex(Arc::new(Definition(Arc::new(task)))))
    }

    /// Task type name.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.0 {
            Kind::Simple(task) => task.name(),
            Kind::Complex(definition) => definition.name(),
        }
    }

    /// Whether this is a complex task.
    #[must_use]
    pub const fn is_complex(&self) -> bool {
        matches!(self.0, Kind::Complex(_))
    }
}

impl std::fmt::Debug for TaskImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskImplementation")
            .field("name", &self.name())
            .field("complex", &self.is_complex())
            .finish()
    }
}

/// Creates per-account instances of a complex task.
#[async_trait]
pub(crate) trait ComplexDefinition: Send + Sync {
    fn name(&self) -> &str;

    async fn instantiate(
        &self,
        stored: Option<StoredState>,
        account_id: AccountId,
        overlays: Arc<DataOverlayManager>,
    ) -> Result<(Arc<dyn BoundTask>, Vec<TaskMarker>)>;
}

struct Definition<T>(Arc<T>);

#[async_trait]
impl<T: ComplexTask> ComplexDefinition for Definition<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn instantiate(
        &self,
        stored: Option<StoredState>,
        account_id: AccountId,
        overlays: Arc<DataOverlayManager>,
    ) -> Result<(Arc<dyn BoundTask>, Vec<TaskMarker>)> {
        let persistent = match stored {
            Some(stored) => serde_json::from_value(stored.into_value())?,
            None => self.0.init_persistent_state(),
        };
        let derived = self
            .0
            .derive_memory_state_from_persistent_state(&persistent, account_id)
            .await?;

        let bound = BoundComplexTask {
            task: Arc::clone(&self.0),
            overlays,
            serial: Mutex::new(()),
            committed: RwLock::new(TaskState {
                persistent,
                memory: derived.memory_state,
            }),
        };
        Ok((Arc::new(bound), derived.markers))
    }
}

/// A complex task bound to one account's state.
#[async_trait]
pub(crate) trait BoundTask: Send + Sync {
    fn name(&self) -> &str;

    fn executes(&self) -> bool;

    async fn plan(&self, ctx: &mut dyn TaskContext, raw: RawTask) -> Result<()>;

    async fn execute(&self, ctx: &mut dyn TaskContext, marker: &TaskMarker) -> Result<()>;

    fn consult(&self, ctx: &dyn TaskContext, request: ConsultRequest<'_>) -> Result<()>;

    fn overlay_namespaces(&self) -> &'static [&'static str];

    fn overlay(&self, namespace: &str, id: &str) -> Option<serde_json::Value>;
}

struct TaskState<T: ComplexTask> {
    persistent: T::PersistentState,
    memory: T::MemoryState,
}

impl<T: ComplexTask> Clone for TaskState<T> {
    fn clone(&self) -> Self {
        Self {
            persistent: self.persistent.clone(),
            memory: self.memory.clone(),
        }
    }
}

// `serial` orders plans and executes of one instance. `committed` only ever
// holds state whose `finish_task` succeeded, so readers see pending work for
// the whole time it is in flight.
struct BoundComplexTask<T: ComplexTask> {
    task: Arc<T>,
    overlays: Arc<DataOverlayManager>,
    serial: Mutex<()>,
    committed: RwLock<TaskState<T>>,
}

impl<T: ComplexTask> BoundComplexTask<T> {
    fn snapshot(&self) -> TaskState<T> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, working: TaskState<T>, finished: &FinishRecorder<'_>) {
        *self
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = working;

        for &namespace in self.task.overlay_namespaces() {
            for entity_key in &finished.entity_keys {
                self.overlays
                    .announce_updated_overlay_data(namespace, entity_key);
            }
        }
    }
}

#[async_trait]
impl<T: ComplexTask> BoundTask for BoundComplexTask<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn executes(&self) -> bool {
        self.task.executes()
    }

    async fn plan(&self, ctx: &mut dyn TaskContext, raw: RawTask) -> Result<()> {
        let _serial = self.serial.lock().await;
        let mut working = self.snapshot();
        let mut recorder = FinishRecorder::new(ctx, self.task.name());
        self.task
            .plan(&mut recorder, &mut working.persistent, &mut working.memory, raw)
            .await?;
        self.commit(working, &recorder);
        Ok(())
    }

    async fn execute(&self, ctx: &mut dyn TaskContext, marker: &TaskMarker) -> Result<()> {
        let _serial = self.serial.lock().await;
        let mut working = self.snapshot();
        let mut recorder = FinishRecorder::new(ctx, self.task.name());
        self.task
            .execute(&mut recorder, &mut working.persistent, &mut working.memory, marker)
            .await?;
        self.commit(working, &recorder);
        Ok(())
    }

    fn consult(&self, ctx: &dyn TaskContext, request: ConsultRequest<'_>) -> Result<()> {
        let state = self
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.task
            .consult(ctx, &state.persistent, &state.memory, request)
    }

    fn overlay_namespaces(&self) -> &'static [&'static str] {
        self.task.overlay_namespaces()
    }

    fn overlay(&self, namespace: &str, id: &str) -> Option<serde_json::Value> {
        let state = self
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.task
            .overlay(namespace, &state.persistent, &state.memory, id)
    }
}

/// Passes every call through and remembers which entities had their markers
/// changed by a successful `finish_task`.
struct FinishRecorder<'a> {
    inner: &'a mut dyn TaskContext,
    task_type: &'a str,
    entity_keys: Vec<String>,
}

impl<'a> FinishRecorder<'a> {
    fn new(inner: &'a mut dyn TaskContext, task_type: &'a str) -> Self {
        Self {
            inner,
            task_type,
            entity_keys: Vec::new(),
        }
    }
}

#[async_trait]
impl TaskContext for FinishRecorder<'_> {
    async fn begin_mutate(&mut self, request: ReadRequest) -> Result<MutateSnapshot> {
        self.inner.begin_mutate(request).await
    }

    async fn finish_task(&mut self, completion: TaskCompletion) -> Result<()> {
        let touched: Vec<String> = completion
            .task_markers
            .iter()
            .filter_map(|(id, marker)| match marker {
                Some(marker) => Some(marker.entity_key.clone()),
                None => TaskMarker::entity_key_of(self.task_type, id).map(str::to_string),
            })
            .collect();
        self.inner.finish_task(completion).await?;
        self.entity_keys.extend(touched);
        Ok(())
    }

    async fn acquire_account(&mut self, account_id: AccountId) -> Result<Arc<dyn MailAccount>> {
        self.inner.acquire_account(account_id).await
    }

    fn set_task_instance(&mut self, task_type: &str) {
        self.inner.set_task_instance(task_type);
    }

    fn failsafe_finalize(&mut self) {
        self.inner.failsafe_finalize();
    }
}
