//! The protocol-side account as seen by executing tasks.

use async_trait::async_trait;

use crate::Result;

/// Direction of a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    /// Add the values.
    Add,
    /// Remove the values.
    Remove,
}

/// Which list-valued message attribute a store targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreItem {
    /// IMAP `FLAGS.SILENT`.
    Flags,
    /// Gmail `X-GM-LABELS.SILENT`.
    GmailLabels,
}

/// A connected (or connectable) account.
#[async_trait]
pub trait MailAccount: Send + Sync {
    /// Server path of a local folder id.
    fn folder_path(&self, folder_id: &str) -> Option<String>;

    /// Gmail label name of a local folder id.
    fn label_for_folder(&self, folder_id: &str) -> Option<String>;

    /// Store values on the given UIDs of a folder.
    async fn store(
        &self,
        folder_path: &str,
        uids: &[u32],
        action: StoreAction,
        item: StoreItem,
        values: &[String],
    ) -> Result<()>;
}
