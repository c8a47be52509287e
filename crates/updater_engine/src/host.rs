use crate::artifact::PreferenceMigration;
use crate::{ItemId, ItemStatus};

/// Host refused to create the replacement item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// The item store that owns tracked items.
///
/// Calls come from the sweep worker, one item at a time.
pub trait Host: Send + Sync {
    /// Current status of `item_id`, or `None` if the host no longer knows it.
    fn item_status(&self, item_id: &str) -> Option<ItemStatus>;

    /// Adds a new item from a downloaded artifact and returns its id.
    fn create_item(
        &self,
        artifact: &[u8],
        preferences: &PreferenceMigration,
    ) -> Result<ItemId, HostError>;

    fn remove_item(&self, item_id: &str, purge_data: bool);

    /// Every item the host manages, enrolled or not.
    fn enumerate_items(&self) -> Vec<ItemId>;
}
