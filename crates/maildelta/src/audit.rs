//! Comparing re-derived markers against the persisted marker set.

use std::collections::BTreeSet;
use std::fmt;

use maildelta_core::{AccountBinding, TaskMarker};
use serde::Serialize;

/// Marker comparison for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAudit {
    /// Account id.
    pub account_id: i64,
    /// Account type the account was activated as.
    pub account_type: String,
    /// Marker ids re-derived from task state.
    pub derived: Vec<String>,
    /// Marker ids in the marker table.
    pub persisted: Vec<String>,
    /// Derived but not persisted.
    pub missing: Vec<String>,
    /// Persisted but no longer backed by task state.
    pub stale: Vec<String>,
}

impl AccountAudit {
    /// Compare the two marker sets of an account.
    #[must_use]
    pub fn new(binding: &AccountBinding, derived: &[TaskMarker], persisted: &[TaskMarker]) -> Self {
        let derived: BTreeSet<&str> = derived.iter().map(|m| m.id.as_str()).collect();
        let persisted: BTreeSet<&str> = persisted.iter().map(|m| m.id.as_str()).collect();

        Self {
            account_id: binding.id.0,
            account_type: binding.account_type.clone(),
            missing: derived.difference(&persisted).map(|id| (*id).to_string()).collect(),
            stale: persisted.difference(&derived).map(|id| (*id).to_string()).collect(),
            derived: derived.into_iter().map(String::from).collect(),
            persisted: persisted.into_iter().map(String::from).collect(),
        }
    }

    /// Whether the sets disagree.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.missing.is_empty() || !self.stale.is_empty()
    }
}

impl fmt::Display for AccountAudit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.has_drift() { "DRIFT" } else { "ok" };
        writeln!(
            f,
            "account {} ({}): {} pending, {} persisted [{}]",
            self.account_id,
            self.account_type,
            self.derived.len(),
            self.persisted.len(),
            status
        )?;
        for id in &self.derived {
            writeln!(f, "  pending   {id}")?;
        }
        for id in &self.missing {
            writeln!(f, "  missing   {id}")?;
        }
        for id in &self.stale {
            writeln!(f, "  stale     {id}")?;
        }
        Ok(())
    }
}
