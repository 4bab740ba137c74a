//! Production transform: consume ingredients, produce one output

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{LedgerEntry, NewLedgerEntry, TransactionType};

/// `reference_type` shared by every row of one transform
pub const PRODUCTION_REFERENCE: &str = "production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionIngredient {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

/// Input for a production transform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionRequest {
    pub department_id: Uuid,
    pub output_product_id: Uuid,
    pub output_quantity: Decimal,
    pub ingredients: Vec<ProductionIngredient>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProductionValidationError {
    #[error("at least one ingredient is required")]
    NoIngredients,

    #[error("output quantity must be positive")]
    NonPositiveOutput,

    #[error("ingredient {product_id} quantity must be positive")]
    NonPositiveIngredient { product_id: Uuid },
}

impl ProductionValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ProductionValidationError::NoIngredients => "ingredients",
            ProductionValidationError::NonPositiveOutput => "output_quantity",
            ProductionValidationError::NonPositiveIngredient { .. } => "ingredients.quantity",
        }
    }

    pub fn message_th(&self) -> String {
        match self {
            ProductionValidationError::NoIngredients => "ต้องมีวัตถุดิบอย่างน้อยหนึ่งรายการ".to_string(),
            ProductionValidationError::NonPositiveOutput => "ปริมาณที่ผลิตได้ต้องเป็นค่าบวก".to_string(),
            ProductionValidationError::NonPositiveIngredient { product_id } => {
                format!("ปริมาณวัตถุดิบ {} ต้องเป็นค่าบวก", product_id)
            }
        }
    }
}

/// Correlation id of one transform: `production:<YYYYMMDDHHMMSS>:<department>:<seq>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionReference {
    pub timestamp: DateTime<Utc>,
    pub department_id: Uuid,
    pub sequence: i64,
}

impl fmt::Display for ProductionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            PRODUCTION_REFERENCE,
            self.timestamp.format("%Y%m%d%H%M%S"),
            self.department_id,
            self.sequence
        )
    }
}

impl ProductionRequest {
    pub fn validate(&self) -> Result<(), ProductionValidationError> {
        if self.ingredients.is_empty() {
            return Err(ProductionValidationError::NoIngredients);
        }
        if self.output_quantity <= Decimal::ZERO {
            return Err(ProductionValidationError::NonPositiveOutput);
        }
        if let Some(bad) = self.ingredients.iter().find(|i| i.quantity <= Decimal::ZERO) {
            return Err(ProductionValidationError::NonPositiveIngredient {
                product_id: bad.product_id,
            });
        }
        Ok(())
    }

    /// One `production_transform_out` per ingredient followed by the
    /// `production_transform_in` for the output, all under `reference`.
    pub fn ledger_entries(
        &self,
        reference: &ProductionReference,
        actor: Option<Uuid>,
    ) -> Vec<NewLedgerEntry> {
        let reference_id = reference.to_string();

        let mut entries: Vec<NewLedgerEntry> = self
            .ingredients
            .iter()
            .map(|i| {
                NewLedgerEntry::new(
                    i.product_id,
                    self.department_id,
                    TransactionType::ProductionTransformOut,
                    -i.quantity,
                )
                .with_reference(PRODUCTION_REFERENCE, reference_id.clone())
                .with_notes(self.notes.clone())
                .created_by(actor)
            })
            .collect();

        entries.push(
            NewLedgerEntry::new(
                self.output_product_id,
                self.department_id,
                TransactionType::ProductionTransformIn,
                self.output_quantity,
            )
            .with_reference(PRODUCTION_REFERENCE, reference_id)
            .with_notes(self.notes.clone())
            .created_by(actor),
        );

        entries
    }
}

/// Posted transform
#[derive(Debug, Clone, Serialize)]
pub struct ProductionResult {
    pub reference_id: String,
    pub output_entry: LedgerEntry,
    pub ingredient_entries: Vec<LedgerEntry>,
}

impl ProductionResult {
    /// Split posted entries back into output and ingredients
    pub fn from_entries(reference_id: String, entries: Vec<LedgerEntry>) -> Option<Self> {
        let (mut outputs, ingredient_entries): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.transaction_type == TransactionType::ProductionTransformIn);
        if outputs.len() != 1 {
            return None;
        }
        Some(Self {
            reference_id,
            output_entry: outputs.remove(0),
            ingredient_entries,
        })
    }
}
