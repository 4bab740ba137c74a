//! Production transform: consume ingredients and produce one output atomically

use chrono::Utc;
use shared::{ProductionReference, ProductionRequest, ProductionResult};
use sqlx::PgPool;
use uuid::Uuid;

use super::ledger::post_batch_in;
use crate::config::NegativeStockPolicy;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct ProductionService {
    db: PgPool,
    negative_stock: NegativeStockPolicy,
}

impl ProductionService {
    pub fn new(db: PgPool, negative_stock: NegativeStockPolicy) -> Self {
        Self { db, negative_stock }
    }

    /// Post every ingredient consumption and the output under one reference.
    /// Nothing is committed unless all of them post.
    pub async fn transform(
        &self,
        actor: Option<Uuid>,
        request: ProductionRequest,
    ) -> AppResult<ProductionResult> {
        request.validate()?;

        let mut tx = self.db.begin().await?;

        let sequence = sqlx::query_scalar::<_, i64>("SELECT nextval('production_batch_seq')")
            .fetch_one(&mut *tx)
            .await?;
        let reference = ProductionReference {
            timestamp: Utc::now(),
            department_id: request.department_id,
            sequence,
        };
        let reference_id = reference.to_string();

        let entries = request.ledger_entries(&reference, actor);
        let posted = post_batch_in(&mut *tx, &entries, self.negative_stock).await?;

        let result = ProductionResult::from_entries(reference_id, posted).ok_or_else(|| {
            AppError::InvariantViolation("production posted without exactly one output".to_string())
        })?;

        tx.commit().await?;

        tracing::info!(
            reference_id = %result.reference_id,
            department_id = %request.department_id,
            output_product_id = %request.output_product_id,
            output_quantity = %request.output_quantity,
            ingredients = result.ingredient_entries.len(),
            "production transform posted"
        );
        Ok(result)
    }
}
