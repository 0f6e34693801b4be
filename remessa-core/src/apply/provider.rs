use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApplyResult;

/// One visible cart row as observed by a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListEntry {
    pub entry_id: String,
    pub seller_id: String,
    pub item_id: String,
    #[serde(default = "default_quantity")]
    pub current_quantity: u32,
    #[serde(default)]
    pub selected: bool,
}

fn default_quantity() -> u32 {
    1
}

/// Seam to the live, partially rendered cart list. The engine owns the
/// list exclusively while a pass runs; implementations do not need to be
/// re-entrant. `wait_settled` must always resolve within the timeout and
/// report whether quiescence was actually observed.
#[async_trait(?Send)]
pub trait LiveListProvider {
    async fn scan(&mut self) -> ApplyResult<Vec<ListEntry>>;
    async fn select(&mut self, entry_id: &str) -> ApplyResult<()>;
    async fn set_quantity(&mut self, entry_id: &str, quantity: u32) -> ApplyResult<()>;
    async fn toggle_select_all(&mut self) -> ApplyResult<()>;
    /// Trigger incremental loading of further entries. Returns whether
    /// the attempt produced new content.
    async fn reveal_more(&mut self) -> ApplyResult<bool>;
    async fn wait_settled(&mut self, timeout: Duration) -> ApplyResult<bool>;
}
