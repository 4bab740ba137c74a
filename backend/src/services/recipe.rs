//! Recipe lookups and expansion of sold items into ingredient usage

use std::collections::HashMap;

use rust_decimal::Decimal;
use shared::{BomLine, Expansion, RecipeBom, RecipeCatalog};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::UnitService;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RecipeService {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct BomRow {
    recipe_id: Uuid,
    menu_item_id: Uuid,
    ingredient_product_id: Uuid,
    unit_id: Uuid,
    quantity_per_sale_unit: Decimal,
}

impl RecipeService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Active recipes for the given menu items, keyed by menu item
    pub async fn load_boms(&self, menu_item_ids: &[Uuid]) -> AppResult<HashMap<Uuid, RecipeBom>> {
        let rows = sqlx::query_as::<_, BomRow>(
            r#"
            SELECT r.id AS recipe_id, r.product_id AS menu_item_id,
                   ri.ingredient_product_id, ri.unit_id, ri.quantity AS quantity_per_sale_unit
            FROM recipes r
            JOIN recipe_items ri ON ri.recipe_id = r.id
            WHERE r.is_active AND r.product_id = ANY($1)
            ORDER BY r.product_id, ri.sort_order, ri.id
            "#,
        )
        .bind(menu_item_ids)
        .fetch_all(&self.db)
        .await?;

        let mut boms: HashMap<Uuid, RecipeBom> = HashMap::new();
        for row in rows {
            boms.entry(row.menu_item_id)
                .or_insert_with(|| RecipeBom {
                    recipe_id: row.recipe_id,
                    menu_item_id: row.menu_item_id,
                    lines: Vec::new(),
                })
                .lines
                .push(BomLine {
                    ingredient_product_id: row.ingredient_product_id,
                    unit_id: row.unit_id,
                    quantity_per_sale_unit: row.quantity_per_sale_unit,
                });
        }
        Ok(boms)
    }

    /// Inventory unit of each product that has one
    pub async fn inventory_units(&self, product_ids: &[Uuid]) -> AppResult<HashMap<Uuid, Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT id, inventory_unit_id FROM products
            WHERE id = ANY($1) AND inventory_unit_id IS NOT NULL
            "#,
        )
        .bind(product_ids)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Recipes, conversions and inventory units needed to expand `menu_item_ids`
    pub async fn load_catalog(&self, menu_item_ids: &[Uuid]) -> AppResult<RecipeCatalog> {
        let boms = self.load_boms(menu_item_ids).await?;

        let mut ingredients: Vec<Uuid> = boms
            .values()
            .flat_map(|b| b.lines.iter().map(|l| l.ingredient_product_id))
            .collect();
        ingredients.sort();
        ingredients.dedup();

        let inventory_units = self.inventory_units(&ingredients).await?;
        let units = UnitService::new(self.db.clone()).load_graph().await?;

        Ok(RecipeCatalog {
            boms,
            units,
            inventory_units,
        })
    }

    /// Preview what selling `sold_quantity` of a menu item would consume
    pub async fn expand(&self, menu_item_id: Uuid, sold_quantity: Decimal) -> AppResult<Expansion> {
        if sold_quantity <= Decimal::ZERO {
            return Err(AppError::validation(
                "quantity",
                "Sold quantity must be positive",
                "จำนวนที่ขายต้องเป็นค่าบวก",
            ));
        }

        let catalog = self.load_catalog(&[menu_item_id]).await?;
        catalog
            .expand(menu_item_id, sold_quantity)
            .ok_or_else(|| AppError::NotFound("Recipe".to_string()))
    }
}
