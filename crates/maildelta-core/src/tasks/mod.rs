//! Stock task implementations and the task sets per account type.

mod store;

pub use store::{
    Flags, Labels, MessageAttribute, StoreFlagsTask, StoreLabelsTask, StoreRequest, StoreState,
    StoreTask,
};

use crate::task::{TaskImplementation, TaskRegistry};

/// Tasks for plain IMAP accounts.
#[must_use]
pub fn imap_tasks() -> Vec<TaskImplementation> {
    vec![TaskImplementation::complex(StoreFlagsTask::new())]
}

/// Tasks for Gmail accounts: flags plus labels.
#[must_use]
pub fn gmail_tasks() -> Vec<TaskImplementation> {
    vec![
        TaskImplementation::complex(StoreFlagsTask::new()),
        TaskImplementation::complex(StoreLabelsTask::new()),
    ]
}

/// Tasks for POP3 accounts, where flags only ever live locally.
#[must_use]
pub fn pop3_tasks() -> Vec<TaskImplementation> {
    vec![TaskImplementation::complex(StoreFlagsTask::local_only())]
}

/// Register the stock task sets under `imap`, `gmail` and `pop3`.
pub fn register_stock_tasks(registry: &mut TaskRegistry) {
    registry.register_per_account_type_tasks("imap", imap_tasks());
    registry.register_per_account_type_tasks("gmail", gmail_tasks());
    registry.register_per_account_type_tasks("pop3", pop3_tasks());
}
