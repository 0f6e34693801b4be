use std::time::Duration;

use async_trait::async_trait;

use super::provider::{ListEntry, LiveListProvider};
use super::{ApplyError, ApplyResult};

/// In-memory stand-in for the live cart list, fed from a captured
/// snapshot. Entries become visible in windows, the way a virtualized
/// list renders as it is scrolled, so a pass can be rehearsed end to end
/// without touching a real cart.
#[derive(Debug, Clone)]
pub struct ReplayListProvider {
    entries: Vec<ListEntry>,
    visible: usize,
    window: usize,
}

impl ReplayListProvider {
    pub fn new(entries: Vec<ListEntry>, window: usize) -> Self {
        let window = window.max(1);
        Self {
            visible: window.min(entries.len()),
            entries,
            window,
        }
    }

    /// Every entry at once, no incremental rendering.
    pub fn fully_rendered(entries: Vec<ListEntry>) -> Self {
        let visible = entries.len();
        Self {
            entries,
            visible,
            window: 1,
        }
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    fn entry_mut(&mut self, entry_id: &str) -> ApplyResult<&mut ListEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.entry_id == entry_id)
            .ok_or_else(|| ApplyError::UnknownEntry(entry_id.to_string()))
    }
}

#[async_trait(?Send)]
impl LiveListProvider for ReplayListProvider {
    async fn scan(&mut self) -> ApplyResult<Vec<ListEntry>> {
        Ok(self.entries[..self.visible].to_vec())
    }

    async fn select(&mut self, entry_id: &str) -> ApplyResult<()> {
        self.entry_mut(entry_id)?.selected = true;
        Ok(())
    }

    async fn set_quantity(&mut self, entry_id: &str, quantity: u32) -> ApplyResult<()> {
        self.entry_mut(entry_id)?.current_quantity = quantity;
        Ok(())
    }

    async fn toggle_select_all(&mut self) -> ApplyResult<()> {
        // Mirrors the cart-wide checkbox: selecting when any row is
        // unchecked, clearing when everything already is.
        let all_selected = self.entries.iter().all(|entry| entry.selected);
        for entry in &mut self.entries {
            entry.selected = !all_selected;
        }
        Ok(())
    }

    async fn reveal_more(&mut self) -> ApplyResult<bool> {
        if self.visible >= self.entries.len() {
            return Ok(false);
        }
        self.visible = (self.visible + self.window).min(self.entries.len());
        Ok(true)
    }

    async fn wait_settled(&mut self, _timeout: Duration) -> ApplyResult<bool> {
        // The in-memory list settles instantly.
        Ok(true)
    }
}
