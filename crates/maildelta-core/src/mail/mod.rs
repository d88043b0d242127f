//! Mail records the store tasks read and mutate.
//!
//! These mirror what the database collaborator hands out from
//! `begin_mutate`; the engine never talks to the database engine directly.

mod churn;
mod model;
mod selector;

pub use churn::churn_conversation;
pub use model::{ConversationRecord, FLAGGED, MessageRecord, SEEN, UmidLocation};
pub use selector::{MessageSelector, select_messages};
