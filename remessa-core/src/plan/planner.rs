use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PlannerSection;

use super::models::{grouped_fingerprint, CheckoutPass, Plan, SellerItems, Split, SplitItem};
use super::tax::TaxSchedule;

const STRATEGY_ID: &str = "seller-greedy/v2";

/// Slack applied to capacity comparisons so that accumulated float noise
/// never rejects a unit that arithmetically fits.
const CAPACITY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub threshold: f64,
    pub min_savings: f64,
    pub always_plan: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            threshold: 49.0,
            min_savings: 0.01,
            always_plan: false,
        }
    }
}

impl PlannerConfig {
    pub fn from_section(section: &PlannerSection) -> Self {
        Self {
            threshold: section.threshold,
            min_savings: section.min_savings,
            always_plan: section.always_plan,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlannerEvent {
    NoSplit { reason: NoSplitReason },
    Planned(Plan),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoSplitReason {
    EmptyCart,
    SingleSplit,
    BelowMinSavings { projected: f64 },
}

impl fmt::Display for NoSplitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoSplitReason::EmptyCart => f.write_str("cart has no units to split"),
            NoSplitReason::SingleSplit => f.write_str("cart already fits a single sub-order"),
            NoSplitReason::BelowMinSavings { projected } => {
                write!(f, "projected savings {projected:.2} below minimum")
            }
        }
    }
}

pub struct SplitPlanner {
    config: PlannerConfig,
    schedule: Arc<dyn TaxSchedule>,
}

impl SplitPlanner {
    pub fn new(config: PlannerConfig, schedule: Arc<dyn TaxSchedule>) -> Self {
        Self { config, schedule }
    }

    /// Partition the grouped cart into threshold-bounded sub-orders and
    /// assemble them into sequential checkout passes. `reference_tax` is
    /// the tax observed on the unsplit order and feeds the savings gate.
    pub fn plan(&self, groups: &[SellerItems], reference_tax: f64) -> PlannerEvent {
        let total_units: u32 = groups.iter().map(SellerItems::total_units).sum();
        if total_units == 0 {
            return PlannerEvent::NoSplit {
                reason: NoSplitReason::EmptyCart,
            };
        }

        let per_seller: Vec<Vec<Split>> = groups
            .iter()
            .map(|group| self.split_seller(group))
            .collect();
        let split_count: usize = per_seller.iter().map(Vec::len).sum();
        let total_estimated_tax: f64 = per_seller
            .iter()
            .flatten()
            .map(|split| split.estimated_tax)
            .sum();

        if split_count <= 1 {
            debug!(target: "planner", split_count, "nothing to split");
            return PlannerEvent::NoSplit {
                reason: NoSplitReason::SingleSplit,
            };
        }

        let projected = reference_tax - total_estimated_tax;
        if !self.config.always_plan && projected < self.config.min_savings {
            warn!(
                target: "planner",
                projected = %format!("{projected:.2}"),
                minimum = self.config.min_savings,
                "discarding plan below savings threshold"
            );
            return PlannerEvent::NoSplit {
                reason: NoSplitReason::BelowMinSavings { projected },
            };
        }

        let passes = assemble_passes(per_seller);
        let plan = Plan {
            plan_id: format!("split-{}", Uuid::new_v4().simple()),
            created_at: Some(Utc::now()),
            strategy_id: STRATEGY_ID.to_string(),
            passes,
            original_tax: reference_tax,
            total_estimated_tax,
            fingerprint: grouped_fingerprint(groups),
        };
        info!(
            target: "planner",
            plan_id = %plan.plan_id,
            passes = plan.passes.len(),
            splits = split_count,
            savings = %format!("{:.2}", plan.savings()),
            "split plan computed"
        );
        PlannerEvent::Planned(plan)
    }

    /// Greedy threshold packing for one seller. Items are consumed in
    /// ascending effective-price order, taking the largest whole-unit
    /// quantity that still fits the open split. When even one unit of the
    /// cheapest remaining item exceeds the threshold, that unit ships
    /// alone; only that single unit is consumed, so the item is revisited
    /// until its quantity drains.
    fn split_seller(&self, group: &SellerItems) -> Vec<Split> {
        let mut sorted: Vec<_> = group
            .items
            .iter()
            .filter(|item| item.quantity > 0)
            .collect();
        sorted.sort_by(|a, b| {
            a.effective_unit_price
                .partial_cmp(&b.effective_unit_price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut remaining: Vec<u32> = sorted.iter().map(|item| item.quantity).collect();

        let mut splits = Vec::new();
        while remaining.iter().any(|&quantity| quantity > 0) {
            let mut items = Vec::new();
            let mut subtotal = 0.0;

            for (index, item) in sorted.iter().enumerate() {
                if remaining[index] == 0 {
                    continue;
                }
                let capacity = self.config.threshold - subtotal + CAPACITY_EPSILON;
                if item.effective_unit_price > capacity {
                    continue;
                }
                let fits = (capacity / item.effective_unit_price).floor() as u32;
                let take = remaining[index].min(fits);
                if take == 0 {
                    continue;
                }
                remaining[index] -= take;
                subtotal += f64::from(take) * item.effective_unit_price;
                items.push(SplitItem {
                    item_id: item.item_id.clone(),
                    display_name: item.display_name.clone(),
                    url: item.url.clone(),
                    quantity: take,
                });
            }

            if items.is_empty() {
                // Cheapest remaining unit alone busts the threshold: ship
                // exactly one unit of it as its own sub-order.
                let Some(index) = remaining.iter().position(|&quantity| quantity > 0) else {
                    break;
                };
                let item = sorted[index];
                remaining[index] -= 1;
                subtotal = item.effective_unit_price;
                items.push(SplitItem {
                    item_id: item.item_id.clone(),
                    display_name: item.display_name.clone(),
                    url: item.url.clone(),
                    quantity: 1,
                });
                debug!(
                    target: "planner",
                    seller = %group.seller_id,
                    item = %item.item_id,
                    price = item.effective_unit_price,
                    "oversized unit ships alone"
                );
            }

            let breakdown = self.schedule.assess(subtotal);
            splits.push(Split {
                seller_id: group.seller_id.clone(),
                items,
                subtotal,
                estimated_tax: breakdown.total,
                tax_breakdown: breakdown,
            });
        }
        splits
    }
}

/// Transpose per-seller split lists into ordering rounds: pass k carries
/// every seller's k-th split, so no pass holds two splits of one seller
/// and the number of rounds is the deepest seller's split count.
fn assemble_passes(per_seller: Vec<Vec<Split>>) -> Vec<CheckoutPass> {
    let mut queues: Vec<VecDeque<Split>> = per_seller.into_iter().map(VecDeque::from).collect();
    let mut passes = Vec::new();
    loop {
        let splits: Vec<Split> = queues
            .iter_mut()
            .filter_map(VecDeque::pop_front)
            .collect();
        if splits.is_empty() {
            break;
        }
        passes.push(CheckoutPass { splits });
    }
    passes
}
