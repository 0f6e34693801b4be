use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::plan::models::{grouped_fingerprint, LineItem, SellerItems};

use super::{DocumentError, DocumentResult};

/// Known structural shapes of a captured checkout document. Extraction
/// only starts after the document classifies as one of these; anything
/// else fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// Top-level `items` array; every record names its own seller and
    /// carries its own shipping.
    FlatItems,
    /// Top-level `sellers` array; shipping is quoted per group and is
    /// shared proportionally by the group's units.
    SellerGroups,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOrder {
    pub sellers: Vec<SellerItems>,
    pub reference_tax: f64,
    pub reference_tax_rate: f64,
}

impl ParsedOrder {
    pub fn fingerprint(&self) -> String {
        grouped_fingerprint(&self.sellers)
    }

    pub fn total_units(&self) -> u32 {
        self.sellers.iter().map(SellerItems::total_units).sum()
    }
}

/// One-shot parser for captured order-and-tax documents. Prices arrive
/// either as JSON numbers or as display strings ("US $12.34", "Free
/// shipping"), so every monetary field goes through the same normalizer.
pub struct OrderDocumentAdapter {
    free_text: Regex,
    amount_strip: Regex,
    tax_line: Regex,
    sku_strip: Regex,
}

impl Default for OrderDocumentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderDocumentAdapter {
    pub fn new() -> Self {
        Self {
            free_text: Regex::new(r"(?i)^\s*free(?:\s+shipping)?\s*$").expect("valid regex"),
            amount_strip: Regex::new(r"[^0-9.\-]").expect("valid regex"),
            tax_line: Regex::new(r"(?i)\b(vat|iva|tax|duty|icms)\b").expect("valid regex"),
            sku_strip: Regex::new(r"[\s,/\-]").expect("valid regex"),
        }
    }

    pub fn classify(document: &Value) -> DocumentResult<DocumentShape> {
        if document.get("items").and_then(Value::as_array).is_some() {
            return Ok(DocumentShape::FlatItems);
        }
        if document.get("sellers").and_then(Value::as_array).is_some() {
            return Ok(DocumentShape::SellerGroups);
        }
        Err(DocumentError::UnknownShape)
    }

    pub fn parse(&self, document: &Value) -> DocumentResult<ParsedOrder> {
        let shape = Self::classify(document)?;
        debug!(target: "document", ?shape, "document classified");
        let sellers = match shape {
            DocumentShape::FlatItems => self.parse_flat(document)?,
            DocumentShape::SellerGroups => self.parse_grouped(document)?,
        };
        let (reference_tax, reference_tax_rate) = self.extract_tax_summary(document)?;
        Ok(ParsedOrder {
            sellers,
            reference_tax,
            reference_tax_rate,
        })
    }

    fn parse_flat(&self, document: &Value) -> DocumentResult<Vec<SellerItems>> {
        let records = document
            .get("items")
            .and_then(Value::as_array)
            .ok_or(DocumentError::UnknownShape)?;

        let mut sellers: Vec<SellerItems> = Vec::new();
        for record in records {
            let Some(seller_id) = record.get("seller_id").and_then(Value::as_str) else {
                warn!(target: "document", "flat record without seller_id skipped");
                continue;
            };
            let shipping = record
                .get("shipping")
                .and_then(|value| self.parse_currency(value))
                .unwrap_or(0.0);
            let Some(item) = self.parse_item(record, shipping, None) else {
                continue;
            };
            push_item(&mut sellers, seller_id, item);
        }
        Ok(sellers)
    }

    fn parse_grouped(&self, document: &Value) -> DocumentResult<Vec<SellerItems>> {
        let groups = document
            .get("sellers")
            .and_then(Value::as_array)
            .ok_or(DocumentError::UnknownShape)?;

        let mut sellers: Vec<SellerItems> = Vec::new();
        for group in groups {
            let Some(seller_id) = group.get("seller_id").and_then(Value::as_str) else {
                warn!(target: "document", "seller group without seller_id skipped");
                continue;
            };
            let records = group
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| DocumentError::Malformed {
                    shape: "seller_groups",
                    detail: format!("group {seller_id} has no items array"),
                })?;
            let group_shipping = group
                .get("shipping")
                .and_then(|value| self.parse_currency(value))
                .unwrap_or(0.0);
            let group_units: u32 = records
                .iter()
                .filter_map(|record| parse_quantity(record.get("quantity")))
                .sum();
            let shipping_per_unit = if group_units > 0 {
                group_shipping / f64::from(group_units)
            } else {
                0.0
            };
            for record in records {
                let Some(item) = self.parse_item(record, 0.0, Some(shipping_per_unit)) else {
                    continue;
                };
                push_item(&mut sellers, seller_id, item);
            }
        }
        Ok(sellers)
    }

    /// `own_shipping` is the record's total shipping (flat shape);
    /// `shared_per_unit` overrides it with a group-level share.
    fn parse_item(
        &self,
        record: &Value,
        own_shipping: f64,
        shared_per_unit: Option<f64>,
    ) -> Option<LineItem> {
        let unit_price = record
            .get("unit_price")
            .and_then(|value| self.parse_currency(value))?;
        let quantity = parse_quantity(record.get("quantity"))?;
        if unit_price.is_nan() || quantity == 0 {
            return None;
        }
        let display_name = record
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Item")
            .trim()
            .to_string();
        let sku = record
            .get("sku")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let url = record
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let shipping_per_unit =
            shared_per_unit.unwrap_or_else(|| own_shipping / f64::from(quantity));
        let item_id = match record.get("item_id").and_then(Value::as_str) {
            Some(explicit) => explicit.to_string(),
            None => self.derive_item_id(&display_name, &sku),
        };
        let seller_id = record
            .get("seller_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(LineItem {
            item_id,
            display_name,
            sku,
            seller_id,
            unit_price,
            effective_unit_price: unit_price + shipping_per_unit,
            quantity,
            url,
        })
    }

    /// Stable identifier for records without an explicit id: the display
    /// name alone, or name plus normalized SKU when one is present.
    fn derive_item_id(&self, display_name: &str, sku: &str) -> String {
        let normalized = self.sku_strip.replace_all(sku, "").to_lowercase();
        if normalized.is_empty() {
            display_name.to_string()
        } else {
            format!("{display_name} ({normalized})")
        }
    }

    fn extract_tax_summary(&self, document: &Value) -> DocumentResult<(f64, f64)> {
        let summary = document.get("summary").ok_or(DocumentError::MissingTotal)?;
        let total = summary
            .get("total")
            .and_then(|value| self.parse_currency(value))
            .ok_or(DocumentError::MissingTotal)?;

        let mut tax = 0.0;
        if let Some(lines) = summary.get("lines").and_then(Value::as_array) {
            for line in lines {
                let Some(title) = line.get("title").and_then(Value::as_str) else {
                    continue;
                };
                if !self.tax_line.is_match(title) {
                    continue;
                }
                if let Some(amount) = line
                    .get("amount")
                    .and_then(|value| self.parse_currency(value))
                {
                    tax += amount;
                }
            }
        }

        let base = total - tax;
        let rate = if base > 0.0 && tax > 0.0 { tax / base } else { 0.0 };
        Ok((tax, rate))
    }

    fn parse_currency(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => {
                if self.free_text.is_match(text) {
                    return Some(0.0);
                }
                let stripped = self.amount_strip.replace_all(text, "");
                stripped.parse::<f64>().ok()
            }
            _ => None,
        }
    }
}

fn parse_quantity(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn push_item(sellers: &mut Vec<SellerItems>, seller_id: &str, mut item: LineItem) {
    item.seller_id = seller_id.to_string();
    match sellers
        .iter_mut()
        .find(|group| group.seller_id == seller_id)
    {
        Some(group) => group.items.push(item),
        None => sellers.push(SellerItems {
            seller_id: seller_id.to_string(),
            items: vec![item],
        }),
    }
}
