use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ApplySection;
use crate::plan::models::CheckoutPass;

use super::provider::{ListEntry, LiveListProvider};
use super::{ApplyError, ApplyResult};

#[derive(Debug, Clone)]
pub struct ApplyConfig {
    /// Upper bound on matching-loop iterations, reveal attempts included.
    pub max_discovery_attempts: usize,
    pub quantity_settle: Duration,
    pub selection_settle: Duration,
    pub reveal_settle: Duration,
    /// Jittered delay issued before each list mutation, in milliseconds.
    pub pace_ms: (u64, u64),
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_discovery_attempts: 20,
            quantity_settle: Duration::from_millis(1000),
            selection_settle: Duration::from_millis(1500),
            reveal_settle: Duration::from_millis(3000),
            pace_ms: (100, 250),
        }
    }
}

impl ApplyConfig {
    pub fn from_section(section: &ApplySection) -> Self {
        Self {
            max_discovery_attempts: section.max_discovery_attempts,
            quantity_settle: Duration::from_millis(section.quantity_settle_ms),
            selection_settle: Duration::from_millis(section.selection_settle_ms),
            reveal_settle: Duration::from_millis(section.reveal_settle_ms),
            pace_ms: (section.action_pace_ms[0], section.action_pace_ms[1]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    Preparing,
    Deselecting,
    Matching,
    Done,
    PartialFailure,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Idle => "idle",
            PassState::Preparing => "preparing",
            PassState::Deselecting => "deselecting",
            PassState::Matching => "matching",
            PassState::Done => "done",
            PassState::PartialFailure => "partial_failure",
        }
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item the pass still needs, with everything required to report it
/// if discovery runs dry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingItem {
    pub item_id: String,
    pub needed_quantity: u32,
    pub display_name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum PassOutcome {
    Done {
        units_selected: u32,
    },
    /// Selections made before the budget ran out are kept; only the
    /// leftovers are reported.
    PartialFailure {
        units_selected: u32,
        missing: Vec<MissingItem>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassReport {
    pub outcome: PassOutcome,
    pub iterations: usize,
    pub settle_timeouts: usize,
}

impl PassReport {
    pub fn final_state(&self) -> PassState {
        match self.outcome {
            PassOutcome::Done { .. } => PassState::Done,
            PassOutcome::PartialFailure { .. } => PassState::PartialFailure,
        }
    }
}

/// Presentation-side surface the engine freezes while a pass runs (e.g.
/// graying out apply buttons). Restoration is guaranteed on every exit
/// path of `PassEngine::apply`.
#[async_trait(?Send)]
pub trait PassHooks {
    async fn pass_started(&self) {}
    async fn pass_finished(&self) {}
}

/// Drives one checkout pass against the live list: clean the selection,
/// then loop scan / fix quantity / select / reveal until every needed
/// item is confirmed or the discovery budget is exhausted.
pub struct PassEngine {
    config: ApplyConfig,
    hooks: Option<Arc<dyn PassHooks>>,
    gate: Mutex<()>,
}

impl PassEngine {
    pub fn new(config: ApplyConfig) -> Self {
        Self {
            config,
            hooks: None,
            gate: Mutex::new(()),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PassHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Only one pass may mutate the list at a time; a second call while
    /// one is running is rejected, not queued.
    pub async fn apply<P>(&self, provider: &mut P, pass: &CheckoutPass) -> ApplyResult<PassReport>
    where
        P: LiveListProvider + ?Sized,
    {
        let _gate = self.gate.try_lock().map_err(|_| ApplyError::PassInFlight)?;
        debug!(target: "apply", state = %PassState::Preparing, units = pass.unit_count(), "pass accepted");
        if let Some(hooks) = &self.hooks {
            hooks.pass_started().await;
        }
        let result = self.run(provider, pass).await;
        // Restoration happens whether the pass succeeded, fell short, or
        // the provider errored out mid-loop.
        if let Some(hooks) = &self.hooks {
            hooks.pass_finished().await;
        }
        result
    }

    async fn run<P>(&self, provider: &mut P, pass: &CheckoutPass) -> ApplyResult<PassReport>
    where
        P: LiveListProvider + ?Sized,
    {
        let mut pending = pending_of(pass);
        let mut timeouts = 0usize;
        if pending.is_empty() {
            return Ok(PassReport {
                outcome: PassOutcome::Done { units_selected: 0 },
                iterations: 0,
                settle_timeouts: 0,
            });
        }

        let entries = provider.scan().await?;
        if entries.iter().any(|entry| entry.selected) {
            debug!(target: "apply", state = %PassState::Deselecting, "clearing current selection");
            // First toggle brings the list to all-selected (skipped when
            // it already is), second clears it; anything else leaves
            // stray selections behind.
            if !entries.iter().all(|entry| entry.selected) {
                provider.toggle_select_all().await?;
                timeouts += self
                    .settle(provider, self.config.selection_settle, "select-all toggle")
                    .await?;
            }
            provider.toggle_select_all().await?;
            timeouts += self
                .settle(provider, self.config.selection_settle, "select-all toggle")
                .await?;
        }

        debug!(target: "apply", state = %PassState::Matching, pending = pending.len(), "matching against live list");
        let mut units_selected = 0u32;
        let mut iterations = 0usize;
        while iterations < self.config.max_discovery_attempts && !pending.is_empty() {
            iterations += 1;
            let entries = provider.scan().await?;
            let mut acted = false;

            for target in &pending {
                let Some(entry) = find_entry(&entries, target) else {
                    continue;
                };
                if entry.current_quantity != target.needed_quantity {
                    debug!(
                        target: "apply",
                        item = %target.item_id,
                        from = entry.current_quantity,
                        to = target.needed_quantity,
                        "adjusting quantity"
                    );
                    self.pace().await;
                    provider
                        .set_quantity(&entry.entry_id, target.needed_quantity)
                        .await?;
                    timeouts += self
                        .settle(provider, self.config.quantity_settle, "quantity adjustment")
                        .await?;
                    acted = true;
                }
                if !entry.selected {
                    self.pace().await;
                    provider.select(&entry.entry_id).await?;
                    timeouts += self
                        .settle(provider, self.config.selection_settle, "selection")
                        .await?;
                    acted = true;
                }
            }

            // Confirm against a fresh observation when anything was
            // issued; a selection that failed to register stays pending
            // and is retried while attempts remain.
            let confirmed = if acted { provider.scan().await? } else { entries };
            let before = pending.len();
            pending.retain(|target| match find_entry(&confirmed, target) {
                Some(entry) if entry.selected => {
                    units_selected += target.needed_quantity;
                    false
                }
                _ => true,
            });
            let matched = before - pending.len();
            if pending.is_empty() {
                break;
            }

            self.pace().await;
            let revealed_new = provider.reveal_more().await?;
            timeouts += self
                .settle(provider, self.config.reveal_settle, "reveal")
                .await?;
            // Exhausted only when nothing new rendered AND nothing moved
            // this iteration; a visible entry whose selection failed to
            // register keeps the loop alive for another attempt.
            if !revealed_new && matched == 0 && !acted {
                info!(
                    target: "apply",
                    pending = pending.len(),
                    iterations,
                    "list exhausted before all items matched"
                );
                break;
            }
        }

        let report = if pending.is_empty() {
            info!(
                target: "apply",
                state = %PassState::Done,
                units = units_selected,
                iterations,
                settle_timeouts = timeouts,
                "pass applied"
            );
            PassReport {
                outcome: PassOutcome::Done { units_selected },
                iterations,
                settle_timeouts: timeouts,
            }
        } else {
            warn!(
                target: "apply",
                state = %PassState::PartialFailure,
                missing = pending.len(),
                units = units_selected,
                "pass ended with unmatched items"
            );
            let missing = pending.into_iter().map(PendingItem::into_missing).collect();
            PassReport {
                outcome: PassOutcome::PartialFailure {
                    units_selected,
                    missing,
                },
                iterations,
                settle_timeouts: timeouts,
            }
        };
        Ok(report)
    }

    /// A timed-out settle wait is soft: it is logged, counted, and the
    /// pass continues optimistically.
    async fn settle<P>(
        &self,
        provider: &mut P,
        timeout: Duration,
        operation: &str,
    ) -> ApplyResult<usize>
    where
        P: LiveListProvider + ?Sized,
    {
        if provider.wait_settled(timeout).await? {
            Ok(0)
        } else {
            warn!(
                target: "apply",
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "settle wait timed out, assuming settled"
            );
            Ok(1)
        }
    }

    async fn pace(&self) {
        let (lo, hi) = self.config.pace_ms;
        if hi == 0 {
            return;
        }
        let delay = if lo >= hi {
            lo
        } else {
            rand::thread_rng().gen_range(lo..=hi)
        };
        sleep(Duration::from_millis(delay)).await;
    }
}

#[derive(Debug, Clone)]
struct PendingItem {
    seller_id: String,
    item_id: String,
    needed_quantity: u32,
    display_name: String,
    url: String,
}

impl PendingItem {
    fn into_missing(self) -> MissingItem {
        MissingItem {
            item_id: self.item_id,
            needed_quantity: self.needed_quantity,
            display_name: self.display_name,
            url: self.url,
        }
    }
}

fn pending_of(pass: &CheckoutPass) -> Vec<PendingItem> {
    pass.splits
        .iter()
        .flat_map(|split| {
            split.items.iter().map(|item| PendingItem {
                seller_id: split.seller_id.clone(),
                item_id: item.item_id.clone(),
                needed_quantity: item.quantity,
                display_name: item.display_name.clone(),
                url: item.url.clone(),
            })
        })
        .collect()
}

fn find_entry<'a>(entries: &'a [ListEntry], target: &PendingItem) -> Option<&'a ListEntry> {
    entries
        .iter()
        .find(|entry| entry.item_id == target.item_id && entry.seller_id == target.seller_id)
}
