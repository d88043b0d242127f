//! Task infrastructure: data model, implementation contracts, execution
//! context and the registry that dispatches to implementations.

mod account;
mod context;
mod implementation;
mod model;
mod registry;

pub use account::{MailAccount, StoreAction, StoreItem};
pub use context::{MutateSnapshot, Mutations, ReadRequest, TaskCompletion, TaskContext};
pub use implementation::{
    ComplexTask, ConsultRequest, DerivedState, SimpleTask, TaskImplementation,
};
pub use model::{AccountId, Dispatch, PlannedTask, RawTask, TaskMarker, TaskShape, TaskThing};
pub use registry::{FATAL_TARGET, TaskRegistry};
