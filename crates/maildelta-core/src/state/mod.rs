//! Durable complex-task state.
//!
//! State rows are keyed by `(account_id, task_type[, task_key])`. A row
//! without a key holds a task's whole state as one object; rows with keys
//! together form a keyed map for that task type.

mod model;
mod repository;

pub use model::{StateKey, StoredState};
pub use repository::TaskStateRepository;
