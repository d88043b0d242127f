//! Task data model: raw requests, planned tasks and markers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A caller-issued intent, immutable once submitted.
///
/// The task-specific fields live in `args` and are parsed by the
/// implementation that handles `task_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTask {
    /// Task type name.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Account the task is scoped to; `None` for global tasks.
    pub account_id: Option<AccountId>,
    /// Task-specific fields.
    pub args: serde_json::Value,
}

impl RawTask {
    /// Build a raw task from typed arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be serialized.
    pub fn new(
        task_type: impl Into<String>,
        account_id: Option<AccountId>,
        args: &impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            task_type: task_type.into(),
            account_id,
            args: serde_json::to_value(args)?,
        })
    }

    /// Parse the task-specific arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments do not match `T`.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.args.clone())?)
    }
}

/// Durable handle to one unit of not-yet-executed server work.
///
/// At most one marker exists per `(task_type, entity_key)`; the id is derived
/// from that pair so re-issuing a marker replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMarker {
    /// Task type that executes this marker.
    #[serde(rename = "type")]
    pub task_type: String,
    /// `"<task_type>:<entity_key>"`.
    pub id: String,
    /// Account the work belongs to.
    pub account_id: AccountId,
    /// Key of the entity the pending work is about.
    pub entity_key: String,
    /// Reserved for prioritization.
    pub priority_tags: Vec<String>,
    /// Resources held for the duration of the execute.
    pub exclusive_resources: Vec<String>,
}

impl TaskMarker {
    /// Marker for pending work on one entity.
    #[must_use]
    pub fn for_entity(task_type: &str, account_id: AccountId, entity_key: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            id: Self::id_for(task_type, entity_key),
            account_id,
            entity_key: entity_key.to_string(),
            priority_tags: Vec::new(),
            exclusive_resources: Vec::new(),
        }
    }

    /// The marker id for an entity.
    #[must_use]
    pub fn id_for(task_type: &str, entity_key: &str) -> String {
        format!("{task_type}:{entity_key}")
    }

    /// The entity key inside a marker id of the given task type.
    #[must_use]
    pub fn entity_key_of<'a>(task_type: &str, id: &'a str) -> Option<&'a str> {
        id.strip_prefix(task_type)?.strip_prefix(':')
    }
}

/// A simple task after planning, ready to be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    /// The request as issued.
    pub raw: RawTask,
    /// Tags used by the scheduler for prioritization.
    pub priority_tags: Vec<String>,
    /// Resources held for the duration of the execute.
    pub exclusive_resources: Vec<String>,
}

impl PlannedTask {
    /// Task type name.
    #[must_use]
    pub fn task_type(&self) -> &str {
        &self.raw.task_type
    }
}

/// Something the scheduler can hand to `execute_task`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskThing {
    /// Pending work of a complex task.
    Marker(TaskMarker),
    /// A planned simple task.
    Planned(PlannedTask),
}

impl TaskThing {
    /// Task type name.
    #[must_use]
    pub fn task_type(&self) -> &str {
        match self {
            Self::Marker(marker) => &marker.task_type,
            Self::Planned(planned) => planned.task_type(),
        }
    }

    /// Account the work is scoped to.
    #[must_use]
    pub const fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Marker(marker) => Some(marker.account_id),
            Self::Planned(planned) => planned.raw.account_id,
        }
    }

    /// Resources to hold while executing.
    #[must_use]
    pub fn exclusive_resources(&self) -> &[String] {
        match self {
            Self::Marker(marker) => &marker.exclusive_resources,
            Self::Planned(planned) => &planned.exclusive_resources,
        }
    }

    /// Which kind of work this is.
    #[must_use]
    pub const fn shape(&self) -> TaskShape {
        match self {
            Self::Marker(_) => TaskShape::Marker,
            Self::Planned(_) => TaskShape::Planned,
        }
    }
}

/// The two kinds of executable work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskShape {
    /// A complex task marker.
    Marker,
    /// A planned simple task.
    Planned,
}

impl std::fmt::Display for TaskShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Marker => "markers",
            Self::Planned => "planned tasks",
        })
    }
}

/// Outcome of dispatching a task through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The implementation ran (or had nothing to execute).
    Ran,
    /// The account is no longer known to the registry.
    NoSuchAccount,
    /// No implementation is registered for the task type.
    NoSuchTaskType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Args {
        conversation_id: String,
    }

    #[test]
    fn entity_key_comes_back_out_of_the_id() {
        let id = TaskMarker::id_for("store_flags", "u:42");
        assert_eq!(TaskMarker::entity_key_of("store_flags", &id), Some("u:42"));
        assert_eq!(TaskMarker::entity_key_of("store_labels", &id), None);
        assert_eq!(TaskMarker::entity_key_of("store", &id), None);
    }

    #[test]
    fn marker_id_is_type_and_key() {
        let marker = TaskMarker::for_entity("store_flags", AccountId(1), "u42");
        assert_eq!(marker.id, "store_flags:u42");
        assert!(marker.priority_tags.is_empty());
        assert!(marker.exclusive_resources.is_empty());
    }

    #[test]
    fn raw_task_args_round_trip() {
        let args = Args {
            conversation_id: "c1".to_string(),
        };
        let raw = RawTask::new("store_flags", Some(AccountId(3)), &args).unwrap();
        assert_eq!(raw.parse_args::<Args>().unwrap(), args);
    }

    #[test]
    fn raw_task_rejects_mismatched_args() {
        let raw = RawTask {
            task_type: "store_flags".to_string(),
            account_id: None,
            args: serde_json::json!({ "nope": 1 }),
        };
        assert!(raw.parse_args::<Args>().is_err());
    }

    #[test]
    fn task_thing_accessors() {
        let marker = TaskThing::Marker(TaskMarker::for_entity("store_flags", AccountId(2), "u1"));
        assert_eq!(marker.task_type(), "store_flags");
        assert_eq!(marker.account_id(), Some(AccountId(2)));

        let planned = TaskThing::Planned(PlannedTask {
            raw: RawTask {
                task_type: "draft_create".to_string(),
                account_id: None,
                args: serde_json::Value::Null,
            },
            priority_tags: Vec::new(),
            exclusive_resources: vec!["outbox".to_string()],
        });
        assert_eq!(planned.task_type(), "draft_create");
        assert_eq!(planned.account_id(), None);
        assert_eq!(planned.exclusive_resources(), ["outbox".to_string()]);
    }
}
