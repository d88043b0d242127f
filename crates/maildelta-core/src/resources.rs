//! Named exclusive resources held while tasks execute.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::task::AccountId;

/// Resource name guarding an account's connection.
#[must_use]
pub fn account_resource(account_id: AccountId) -> String {
    format!("account:{account_id}")
}

/// One async mutex per resource name, created on first use.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Holds a set of resources until dropped.
#[derive(Debug)]
pub struct ResourceGuard {
    names: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ResourceGuard {
    /// Names of the held resources, sorted.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl ResourceLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every named resource.
    ///
    /// Names are sorted and deduplicated first so that two callers asking for
    /// overlapping sets always lock in the same order.
    pub async fn acquire<I, S>(&self, names: I) -> ResourceGuard
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            names
                .iter()
                .map(|name| Arc::clone(locks.entry(name.clone()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        debug!("Acquired resources {:?}", names);

        ResourceGuard {
            names,
            _guards: guards,
        }
    }

    /// Whether a resource is currently held.
    #[must_use]
    pub fn is_held(&self, name: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.get(name).is_some_and(|mutex| mutex.try_lock().is_err())
    }
}
