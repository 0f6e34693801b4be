use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::PlanError;
use super::tax::TaxBreakdown;

/// A priced cart line as delivered by the document adapter. The quantity
/// is the original cart quantity; the planner never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub item_id: String,
    pub display_name: String,
    pub sku: String,
    pub seller_id: String,
    pub unit_price: f64,
    /// Unit price plus this item's proportional share of shipping.
    pub effective_unit_price: f64,
    pub quantity: u32,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SellerItems {
    pub seller_id: String,
    pub items: Vec<LineItem>,
}

impl SellerItems {
    pub fn total_units(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitItem {
    pub item_id: String,
    pub display_name: String,
    pub url: String,
    pub quantity: u32,
}

/// One sub-order: the units of a single seller that check out together,
/// bounded by the exemption threshold except for oversized singletons.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Split {
    pub seller_id: String,
    pub items: Vec<SplitItem>,
    pub subtotal: f64,
    pub estimated_tax: f64,
    pub tax_breakdown: TaxBreakdown,
}

impl Split {
    pub fn unit_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// One round of ordering: at most one split per seller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutPass {
    pub splits: Vec<Split>,
}

impl CheckoutPass {
    pub fn unit_count(&self) -> u32 {
        self.splits.iter().map(Split::unit_count).sum()
    }

    pub fn subtotal(&self) -> f64 {
        self.splits.iter().map(|split| split.subtotal).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub plan_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub strategy_id: String,
    pub passes: Vec<CheckoutPass>,
    pub original_tax: f64,
    pub total_estimated_tax: f64,
    pub fingerprint: String,
}

impl Plan {
    pub fn savings(&self) -> f64 {
        self.original_tax - self.total_estimated_tax
    }

    pub fn split_count(&self) -> usize {
        self.passes.iter().map(|pass| pass.splits.len()).sum()
    }

    pub fn splits(&self) -> impl Iterator<Item = &Split> {
        self.passes.iter().flat_map(|pass| pass.splits.iter())
    }

    /// Zero-based pass lookup with a descriptive out-of-range error.
    pub fn pass(&self, index: usize) -> Result<&CheckoutPass, PlanError> {
        self.passes.get(index).ok_or(PlanError::PassOutOfRange {
            index,
            available: self.passes.len(),
        })
    }

    pub fn summary(&self) -> SavingsSummary {
        SavingsSummary {
            original_tax: self.original_tax,
            total_estimated_tax: self.total_estimated_tax,
            savings: self.savings(),
            passes: self.passes.len(),
            splits: self.split_count(),
        }
    }

    /// Items whose cart quantity is spread over more than one split. The
    /// application engine corrects quantities automatically; callers use
    /// this to tell the operator which lines will shrink per pass.
    pub fn spanning_items(&self) -> Vec<SpanningItem> {
        let mut by_item: BTreeMap<(String, String), SpanningItem> = BTreeMap::new();
        for (pass_index, pass) in self.passes.iter().enumerate() {
            for split in &pass.splits {
                for item in &split.items {
                    let key = (split.seller_id.clone(), item.item_id.clone());
                    let entry = by_item.entry(key).or_insert_with(|| SpanningItem {
                        item_id: item.item_id.clone(),
                        display_name: item.display_name.clone(),
                        total_quantity: 0,
                        placements: Vec::new(),
                    });
                    entry.total_quantity += item.quantity;
                    entry.placements.push(SplitPlacement {
                        pass: pass_index,
                        seller_id: split.seller_id.clone(),
                        quantity: item.quantity,
                    });
                }
            }
        }
        by_item
            .into_values()
            .filter(|entry| entry.placements.len() > 1)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavingsSummary {
    pub original_tax: f64,
    pub total_estimated_tax: f64,
    pub savings: f64,
    pub passes: usize,
    pub splits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanningItem {
    pub item_id: String,
    pub display_name: String,
    pub total_quantity: u32,
    pub placements: Vec<SplitPlacement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitPlacement {
    pub pass: usize,
    pub seller_id: String,
    pub quantity: u32,
}

/// Digest of the cart composition a plan was computed against. Ordering
/// of the input is irrelevant; any change to the (seller, item, quantity)
/// multiset changes the digest.
pub fn cart_fingerprint(items: &[LineItem]) -> String {
    triple_fingerprint(
        items
            .iter()
            .map(|item| (item.seller_id.as_str(), item.item_id.as_str(), item.quantity)),
    )
}

/// Same digest computed from bare (seller, item, quantity) triples, for
/// callers observing the cart through a live-list scan instead of a
/// parsed document.
pub fn triple_fingerprint<'a, I>(triples: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str, u32)>,
{
    let mut triples: Vec<(&str, &str, u32)> = triples.into_iter().collect();
    triples.sort_unstable();

    let mut hasher = Sha256::new();
    for (seller_id, item_id, quantity) in triples {
        hasher.update(seller_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(item_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(quantity.to_le_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

pub fn grouped_fingerprint(groups: &[SellerItems]) -> String {
    let items: Vec<LineItem> = groups
        .iter()
        .flat_map(|group| group.items.iter().cloned())
        .collect();
    cart_fingerprint(&items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(seller: &str, id: &str, quantity: u32) -> LineItem {
        LineItem {
            item_id: id.to_string(),
            display_name: id.to_string(),
            sku: String::new(),
            seller_id: seller.to_string(),
            unit_price: 1.0,
            effective_unit_price: 1.0,
            quantity,
            url: String::new(),
        }
    }

    #[test]
    fn fingerprint_ignores_ordering() {
        let forward = vec![item("s1", "a", 2), item("s1", "b", 1), item("s2", "c", 4)];
        let shuffled = vec![item("s2", "c", 4), item("s1", "b", 1), item("s1", "a", 2)];
        assert_eq!(cart_fingerprint(&forward), cart_fingerprint(&shuffled));
    }

    #[test]
    fn fingerprint_tracks_quantity_changes() {
        let original = vec![item("s1", "a", 2), item("s1", "b", 1)];
        let bumped = vec![item("s1", "a", 3), item("s1", "b", 1)];
        assert_ne!(cart_fingerprint(&original), cart_fingerprint(&bumped));
    }

    #[test]
    fn fingerprint_tracks_composition_changes() {
        let original = vec![item("s1", "a", 2)];
        let extended = vec![item("s1", "a", 2), item("s1", "b", 1)];
        assert_ne!(cart_fingerprint(&original), cart_fingerprint(&extended));
    }

    #[test]
    fn fingerprint_separator_is_unambiguous() {
        // "ab" + "c" must not collide with "a" + "bc".
        let left = vec![item("s", "ab", 1)];
        let right = vec![item("sa", "b", 1)];
        assert_ne!(cart_fingerprint(&left), cart_fingerprint(&right));
    }
}
