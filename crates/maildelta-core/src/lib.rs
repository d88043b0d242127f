//! # maildelta-core
//!
//! Offline-first mutation engine for the `maildelta` mail backend.
//!
//! This crate provides:
//! - Delta algebra over list-valued attributes (flags, labels)
//! - The task registry: plan, execute and consult dispatch
//! - Complex task state that survives restarts (`SQLite`)
//! - Flag and label store tasks for IMAP, Gmail and POP3 accounts
//! - Data overlays and explicit resource locks

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod delta;
mod error;
pub mod mail;
pub mod overlay;
pub mod resources;
pub mod state;
pub mod task;
pub mod tasks;

pub use config::{AccountBinding, EngineConfig};
pub use delta::{ChangeSet, apply_change_set, compute_effective_change, merge_change_sets};
pub use error::{Error, Result};
pub use overlay::{DataOverlayManager, OverlayResolver, OverlayUpdate, ProviderHandle};
pub use resources::{ResourceGuard, ResourceLocks};
pub use state::{StateKey, StoredState, TaskStateRepository};
pub use task::{
    AccountId, ComplexTask, ConsultRequest, DerivedState, Dispatch, MailAccount, PlannedTask,
    RawTask, SimpleTask, TaskCompletion, TaskContext, TaskImplementation, TaskMarker,
    TaskRegistry, TaskShape, TaskThing,
};
pub use tasks::{StoreFlagsTask, StoreLabelsTask, StoreRequest, register_stock_tasks};
