//! Task registry: owns task implementations and per-account task state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use super::context::TaskContext;
use super::implementation::{BoundTask, ConsultRequest, Kind, SimpleTask, TaskImplementation};
use super::model::{AccountId, Dispatch, PlannedTask, RawTask, TaskMarker, TaskShape, TaskThing};
use crate::overlay::{DataOverlayManager, OverlayResolver, ProviderHandle};
use crate::resources::{ResourceLocks, account_resource};
use crate::state::{StateKey, StoredState};
use crate::{Error, Result};

/// Logging target of the fatal-error sink for plan failures.
pub const FATAL_TARGET: &str = "maildelta::fatal";

#[derive(Clone)]
enum TaskSlot {
    Simple(Arc<dyn SimpleTask>),
    Complex(Arc<dyn BoundTask>),
}

impl TaskSlot {
    fn name(&self) -> &str {
        match self {
            Self::Simple(task) => task.name(),
            Self::Complex(task) => task.name(),
        }
    }

    fn executes(&self) -> bool {
        match self {
            Self::Simple(task) => task.executes(),
            Self::Complex(task) => task.executes(),
        }
    }
}

enum Execution<'a> {
    Simple(&'a Arc<dyn SimpleTask>, &'a PlannedTask),
    Complex(&'a Arc<dyn BoundTask>, &'a TaskMarker),
}

struct AccountTasks {
    account_type: String,
    tasks: HashMap<String, TaskSlot>,
    overlay_handles: Vec<ProviderHandle>,
}

/// Dispatches plan, execute and consult calls to the right implementation.
///
/// Registration happens once at startup through `&mut self`; everything else
/// takes `&self` so the registry can be shared behind an `Arc`.
pub struct TaskRegistry {
    overlays: Arc<DataOverlayManager>,
    resources: Arc<ResourceLocks>,
    global_tasks: HashMap<String, Arc<dyn SimpleTask>>,
    per_account_type_tasks: HashMap<String, BTreeMap<String, TaskImplementation>>,
    accounts: RwLock<HashMap<AccountId, AccountTasks>>,
    stored: Mutex<HashMap<AccountId, HashMap<String, StoredState>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(overlays: Arc<DataOverlayManager>, resources: Arc<ResourceLocks>) -> Self {
        Self {
            overlays,
            resources,
            global_tasks: HashMap::new(),
            per_account_type_tasks: HashMap::new(),
            accounts: RwLock::new(HashMap::new()),
            stored: Mutex::new(HashMap::new()),
        }
    }

    /// The overlay manager complex tasks register with.
    #[must_use]
    pub const fn overlays(&self) -> &Arc<DataOverlayManager> {
        &self.overlays
    }

    /// The resource locks held around executes.
    #[must_use]
    pub const fn resources(&self) -> &Arc<ResourceLocks> {
        &self.resources
    }

    /// Register task types usable for any account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ComplexGlobalTask`] if any implementation is complex;
    /// nothing is registered then.
    pub fn register_global_tasks(
        &mut self,
        impls: impl IntoIterator<Item = TaskImplementation>,
    ) -> Result<()> {
        let mut simple = Vec::new();
        for implementation in impls {
            match implementation.0 {
                Kind::Simple(task) => simple.push(task),
                Kind::Complex(definition) => {
                    return Err(Error::ComplexGlobalTask(definition.name().to_string()));
                }
            }
        }
        for task in simple {
            debug!("Registered global task {}", task.name());
            self.global_tasks.insert(task.name().to_string(), task);
        }
        Ok(())
    }

    /// Register task types for a protocol family such as `imap`.
    pub fn register_per_account_type_tasks(
        &mut self,
        account_type: &str,
        impls: impl IntoIterator<Item = TaskImplementation>,
    ) {
        let tasks = self
            .per_account_type_tasks
            .entry(account_type.to_string())
            .or_default();
        for implementation in impls {
            debug!(
                "Registered {} task {}",
                account_type,
                implementation.name()
            );
            tasks.insert(implementation.name().to_string(), implementation);
        }
    }

    /// Whether any tasks were registered for an account type.
    #[must_use]
    pub fn is_account_type_known(&self, account_type: &str) -> bool {
        self.per_account_type_tasks.contains_key(account_type)
    }

    /// Ingest every persisted complex task state row.
    ///
    /// `keys` and `values` are parallel. Rows with a task key build a keyed
    /// map for their task type; rows without one hold the whole state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] if the lists differ in length or a
    /// task type mixes both storage shapes.
    pub fn initialize_from_database_state(
        &self,
        keys: Vec<StateKey>,
        values: Vec<serde_json::Value>,
    ) -> Result<()> {
        if keys.len() != values.len() {
            return Err(Error::InconsistentState(format!(
                "{} state keys but {} values",
                keys.len(),
                values.len()
            )));
        }

        let mut stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        let row_count = keys.len();
        for (key, value) in keys.into_iter().zip(values) {
            let by_task_type = stored.entry(key.account_id).or_default();
            match key.task_key {
                Some(task_key) => {
                    let entry = by_task_type
                        .entry(key.task_type.clone())
                        .or_insert_with(|| StoredState::Keyed(BTreeMap::new()));
                    match entry {
                        StoredState::Keyed(entries) => {
                            entries.insert(task_key, value);
                        }
                        StoredState::Single(_) => {
                            return Err(mixed_shapes(key.account_id, &key.task_type));
                        }
                    }
                }
                None => {
                    if matches!(by_task_type.get(&key.task_type), Some(StoredState::Keyed(_))) {
                        return Err(mixed_shapes(key.account_id, &key.task_type));
                    }
                    by_task_type.insert(key.task_type, StoredState::Single(value));
                }
            }
        }

        info!("Loaded {} persisted task state rows", row_count);
        Ok(())
    }

    /// Activate an account: build its task instances and return the markers
    /// of all pending work re-derived from persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is already active, stored state does
    /// not deserialize, a task fails to derive its memory state or an overlay
    /// namespace is not served. The account stays inactive then.
    pub async fn account_exists_init_tasks(
        &self,
        account_id: AccountId,
        account_type: &str,
    ) -> Result<Vec<TaskMarker>> {
        if self.is_account_active(account_id) {
            return Err(Error::InconsistentState(format!(
                "account {account_id} is already active"
            )));
        }
        debug!("Initializing tasks for account {} ({})", account_id.0, account_type);

        let implementations = self
            .per_account_type_tasks
            .get(account_type)
            .cloned()
            .unwrap_or_else(|| {
                warn!("No tasks registered for account type {}", account_type);
                BTreeMap::new()
            });
        let mut stored = self
            .stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&account_id)
            .unwrap_or_default();

        let mut tasks = HashMap::new();
        let mut overlay_handles = Vec::new();
        let mut markers = Vec::new();
        let mut complex_count = 0;

        for (task_type, implementation) in implementations {
            let slot = match implementation.0 {
                Kind::Simple(task) => TaskSlot::Simple(task),
                Kind::Complex(definition) => {
                    complex_count += 1;
                    let state = stored.remove(&task_type);
                    debug!(
                        "Initializing complex task {} for account {} (stored state: {})",
                        task_type,
                        account_id.0,
                        state.is_some()
                    );
                    let instantiated = definition
                        .instantiate(state, account_id, Arc::clone(&self.overlays))
                        .await;
                    let (bound, derived) = match instantiated {
                        Ok(pair) => pair,
                        Err(err) => {
                            self.unregister_all(&overlay_handles);
                            return Err(err);
                        }
                    };
                    if let Err(err) = self.register_overlays(&bound, &mut overlay_handles) {
                        self.unregister_all(&overlay_handles);
                        return Err(err);
                    }
                    markers.extend(derived);
                    TaskSlot::Complex(bound)
                }
            };
            tasks.insert(task_type, slot);
        }

        if !stored.is_empty() {
            let orphaned: Vec<&String> = stored.keys().collect();
            warn!(
                "Account {} has stored state for unregistered tasks {:?}",
                account_id.0, orphaned
            );
        }

        info!(
            "Account {} tasks ready: {} simple, {} complex, {} markers",
            account_id.0,
            tasks.len() - complex_count,
            complex_count,
            markers.len()
        );

        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                account_id,
                AccountTasks {
                    account_type: account_type.to_string(),
                    tasks,
                    overlay_handles,
                },
            );
        Ok(markers)
    }

    fn register_overlays(
        &self,
        bound: &Arc<dyn BoundTask>,
        handles: &mut Vec<ProviderHandle>,
    ) -> Result<()> {
        for &namespace in bound.overlay_namespaces() {
            let task = Arc::clone(bound);
            let resolver: OverlayResolver = Arc::new(move |id: &str| task.overlay(namespace, id));
            handles.push(
                self.overlays
                    .register_provider(namespace, bound.name(), resolver)?,
            );
            debug!("Registered {} overlay provider {}", namespace, bound.name());
        }
        Ok(())
    }

    fn unregister_all(&self, handles: &[ProviderHandle]) {
        for handle in handles {
            self.overlays.unregister_provider(handle);
        }
    }

    /// Tear down an account: drop its task instances and state and remove its
    /// overlay providers. Returns whether the account was known.
    pub fn account_removed(&self, account_id: AccountId) -> bool {
        let removed = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&account_id);
        let had_stored = self
            .stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&account_id)
            .is_some();

        if let Some(account) = &removed {
            self.unregister_all(&account.overlay_handles);
            info!(
                "Removed {} account {} ({} tasks)",
                account.account_type,
                account_id.0,
                account.tasks.len()
            );
        }
        removed.is_some() || had_stored
    }

    /// Whether an account has been activated.
    #[must_use]
    pub fn is_account_active(&self, account_id: AccountId) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&account_id)
    }

    /// Active account ids, ascending.
    #[must_use]
    pub fn active_accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn resolve(
        &self,
        task_type: &str,
        account_id: Option<AccountId>,
    ) -> std::result::Result<TaskSlot, Dispatch> {
        if let Some(task) = self.global_tasks.get(task_type) {
            return Ok(TaskSlot::Simple(Arc::clone(task)));
        }

        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        let Some(account) = account_id.and_then(|id| accounts.get(&id)) else {
            warn!("No such account {:?} for task {}", account_id.map(|id| id.0), task_type);
            return Err(Dispatch::NoSuchAccount);
        };
        account.tasks.get(task_type).cloned().ok_or_else(|| {
            warn!("No task provider for {} on account {:?}", task_type, account_id.map(|id| id.0));
            Dispatch::NoSuchTaskType
        })
    }

    /// Plan a raw task.
    ///
    /// Lookup misses are reported through the returned [`Dispatch`]. When an
    /// implementation is dispatched, `ctx.failsafe_finalize()` runs exactly
    /// once afterwards whatever the outcome, and failures are also logged on
    /// the [`FATAL_TARGET`] target.
    ///
    /// # Errors
    ///
    /// Returns the implementation's plan error.
    pub async fn plan_task(&self, ctx: &mut dyn TaskContext, raw: RawTask) -> Result<Dispatch> {
        let slot = match self.resolve(&raw.task_type, raw.account_id) {
            Ok(slot) => slot,
            Err(miss) => return Ok(miss),
        };

        let task_type = raw.task_type.clone();
        ctx.set_task_instance(slot.name());
        let result = match &slot {
            TaskSlot::Simple(task) => task.plan(ctx, raw).await,
            TaskSlot::Complex(task) => task.plan(ctx, raw).await,
        };
        ctx.failsafe_finalize();

        if let Err(err) = &result {
            error!(target: FATAL_TARGET, "Plan of {} failed: {}", task_type, err);
        }
        result.map(|()| Dispatch::Ran)
    }

    /// Execute a marker (complex tasks) or a planned task (simple tasks).
    ///
    /// The account resource and every exclusive resource of `thing` are held
    /// for the duration of the execute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskShapeMismatch`] if `thing` has the wrong shape for
    /// its implementation, or the implementation's execute error.
    pub async fn execute_task(&self, ctx: &mut dyn TaskContext, thing: TaskThing) -> Result<Dispatch> {
        let slot = match self.resolve(thing.task_type(), thing.account_id()) {
            Ok(slot) => slot,
            Err(miss) => return Ok(miss),
        };

        let execution = match (&slot, &thing) {
            (TaskSlot::Simple(task), TaskThing::Planned(planned)) => Execution::Simple(task, planned),
            (TaskSlot::Complex(task), TaskThing::Marker(marker)) => Execution::Complex(task, marker),
            (TaskSlot::Simple(_), TaskThing::Marker(_)) => {
                return Err(shape_mismatch(&thing, TaskShape::Planned));
            }
            (TaskSlot::Complex(_), TaskThing::Planned(_)) => {
                return Err(shape_mismatch(&thing, TaskShape::Marker));
            }
        };
        if !slot.executes() {
            return Ok(Dispatch::Ran);
        }

        let mut resources: Vec<String> = thing.exclusive_resources().to_vec();
        if let Some(account_id) = thing.account_id() {
            resources.push(account_resource(account_id));
        }
        let _guard = self.resources.acquire(resources).await;

        ctx.set_task_instance(slot.name());
        let result = match execution {
            Execution::Simple(task, planned) => task.execute(ctx, planned).await,
            Execution::Complex(task, marker) => task.execute(ctx, marker).await,
        };
        ctx.failsafe_finalize();

        if let Err(err) = &result {
            warn!("Execute of {} failed: {}", thing.task_type(), err);
        }
        result.map(|()| Dispatch::Ran)
    }

    /// Synchronously ask a complex task to project its pending intent onto
    /// `request.value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the account or task is unknown or the task cannot
    /// be consulted. A plan or execute in progress never blocks a consult; it
    /// sees the last committed state.
    pub fn consult(
        &self,
        ctx: &dyn TaskContext,
        task_type: &str,
        account_id: AccountId,
        request: ConsultRequest<'_>,
    ) -> Result<()> {
        if self.global_tasks.contains_key(task_type) {
            return Err(Error::ConsultUnsupported(task_type.to_string()));
        }

        let slot = {
            let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
            let account = accounts
                .get(&account_id)
                .ok_or(Error::AccountNotFound(account_id))?;
            account
                .tasks
                .get(task_type)
                .cloned()
                .ok_or_else(|| Error::UnknownTaskType(task_type.to_string()))?
        };

        match slot {
            TaskSlot::Simple(_) => Err(Error::ConsultUnsupported(task_type.to_string())),
            TaskSlot::Complex(task) => task.consult(ctx, request),
        }
    }
}

fn shape_mismatch(thing: &TaskThing, expected: TaskShape) -> Error {
    Error::TaskShapeMismatch {
        task_type: thing.task_type().to_string(),
        expected,
        got: thing.shape(),
    }
}

fn mixed_shapes(account_id: AccountId, task_type: &str) -> Error {
    Error::InconsistentState(format!(
        "task {task_type} of account {account_id} has both single and keyed state rows"
    ))
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut account_types: Vec<&String> = self.per_account_type_tasks.keys().collect();
        account_types.sort();
        f.debug_struct("TaskRegistry")
            .field("global_tasks", &self.global_tasks.len())
            .field("account_types", &account_types)
            .field("active_accounts", &self.active_accounts())
            .finish_non_exhaustive()
    }
}
