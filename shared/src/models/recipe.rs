//! Recipe bill of materials and its expansion into raw-material usage

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnitGraph;

/// One raw material consumed per unit of the sold item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BomLine {
    pub ingredient_product_id: Uuid,
    /// Unit the recipe declares `quantity_per_sale_unit` in
    pub unit_id: Uuid,
    pub quantity_per_sale_unit: Decimal,
}

/// Bill of materials for a sold menu item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeBom {
    pub recipe_id: Uuid,
    pub menu_item_id: Uuid,
    pub lines: Vec<BomLine>,
}

/// Quantity of one ingredient, in its inventory unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientUsage {
    pub ingredient_product_id: Uuid,
    pub quantity: Decimal,
}

/// A recipe line that could not be converted into the ingredient's inventory unit.
///
/// `to_unit_id` is `None` when the ingredient has no inventory unit at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingConversion {
    pub menu_item_id: Uuid,
    pub ingredient_product_id: Uuid,
    pub from_unit_id: Uuid,
    pub to_unit_id: Option<Uuid>,
    pub unconverted_quantity: Decimal,
}

/// Result of expanding one sold item
#[derive(Debug, Clone, Default, Serialize)]
pub struct Expansion {
    pub usages: Vec<IngredientUsage>,
    pub missing_conversions: Vec<MissingConversion>,
    /// Some required quantity exceeded the decimal range; `usages` is incomplete
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub overflowed: bool,
}

impl Expansion {
    pub fn is_complete(&self) -> bool {
        self.missing_conversions.is_empty() && !self.overflowed
    }
}

/// Expand `sold_quantity` units of a menu item into ingredient usage.
///
/// Lines without a conversion path are collected rather than failing the
/// expansion. Repeated ingredients are summed, and usages come back ordered by
/// ingredient id.
pub fn expand_recipe(
    bom: &RecipeBom,
    sold_quantity: Decimal,
    units: &UnitGraph,
    inventory_units: &HashMap<Uuid, Uuid>,
) -> Expansion {
    let mut usage: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    let mut missing_conversions = Vec::new();
    let mut overflowed = false;

    for line in &bom.lines {
        let Some(required) = line.quantity_per_sale_unit.checked_mul(sold_quantity) else {
            overflowed = true;
            continue;
        };
        let target_unit = inventory_units.get(&line.ingredient_product_id).copied();

        let converted = target_unit.and_then(|to| units.convert(required, line.unit_id, to).ok());

        match converted {
            Some(quantity) => {
                let total = usage.entry(line.ingredient_product_id).or_default();
                match total.checked_add(quantity) {
                    Some(sum) => *total = sum,
                    None => overflowed = true,
                }
            }
            None => missing_conversions.push(MissingConversion {
                menu_item_id: bom.menu_item_id,
                ingredient_product_id: line.ingredient_product_id,
                from_unit_id: line.unit_id,
                to_unit_id: target_unit,
                unconverted_quantity: required,
            }),
        }
    }

    Expansion {
        usages: usage
            .into_iter()
            .map(|(ingredient_product_id, quantity)| IngredientUsage {
                ingredient_product_id,
                quantity,
            })
            .collect(),
        missing_conversions,
        overflowed,
    }
}

/// Expected ("ตามสูตร") usage summed across many expansions
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    usage: BTreeMap<Uuid, Decimal>,
    missing: Vec<MissingConversion>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one expansion. Returns `false`, leaving the totals untouched, when
    /// a sum would overflow.
    pub fn add(&mut self, expansion: &Expansion) -> bool {
        let mut sums = Vec::with_capacity(expansion.usages.len());
        for u in &expansion.usages {
            let current = self
                .usage
                .get(&u.ingredient_product_id)
                .copied()
                .unwrap_or_default();
            match current.checked_add(u.quantity) {
                Some(sum) => sums.push((u.ingredient_product_id, sum)),
                None => return false,
            }
        }
        self.usage.extend(sums);
        self.missing
            .extend(expansion.missing_conversions.iter().cloned());
        true
    }

    pub fn expected_usage(&self) -> Vec<IngredientUsage> {
        self.usage
            .iter()
            .map(|(id, q)| IngredientUsage {
                ingredient_product_id: *id,
                quantity: *q,
            })
            .collect()
    }

    pub fn missing_conversions(&self) -> &[MissingConversion] {
        &self.missing
    }

    pub fn into_parts(self) -> (Vec<IngredientUsage>, Vec<MissingConversion>) {
        let usage = self.expected_usage();
        (usage, self.missing)
    }
}

/// Everything expansion needs, loaded once per batch
#[derive(Debug, Clone, Default)]
pub struct RecipeCatalog {
    pub boms: HashMap<Uuid, RecipeBom>,
    pub units: UnitGraph,
    pub inventory_units: HashMap<Uuid, Uuid>,
}

impl RecipeCatalog {
    /// `None` when the menu item has no recipe on file
    pub fn expand(&self, menu_item_id: Uuid, sold_quantity: Decimal) -> Option<Expansion> {
        self.boms
            .get(&menu_item_id)
            .map(|bom| expand_recipe(bom, sold_quantity, &self.units, &self.inventory_units))
    }
}
