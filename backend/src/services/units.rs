//! Unit conversion lookups

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{UnitConversionEdge, UnitGraph};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Clone)]
pub struct UnitService {
    db: PgPool,
}

/// Outcome of a conversion lookup. A missing path is a normal answer.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionLookup {
    pub from_unit_id: Uuid,
    pub to_unit_id: Uuid,
    pub multiplier: Option<Decimal>,
    pub found: bool,
}

impl UnitService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Build the conversion graph from every stored edge
    pub async fn load_graph(&self) -> AppResult<UnitGraph> {
        let edges = sqlx::query_as::<_, UnitConversionEdge>(
            "SELECT from_unit_id, to_unit_id, multiplier FROM unit_conversions ORDER BY created_at, from_unit_id, to_unit_id",
        )
        .fetch_all(&self.db)
        .await?;

        let graph = UnitGraph::from_edges(edges);
        tracing::debug!(edges = graph.edge_count(), "unit graph loaded");
        Ok(graph)
    }

    pub async fn resolve_conversion(&self, from_unit_id: Uuid, to_unit_id: Uuid) -> AppResult<ConversionLookup> {
        let graph = self.load_graph().await?;
        let multiplier = graph.resolve(from_unit_id, to_unit_id).ok();
        Ok(ConversionLookup {
            from_unit_id,
            to_unit_id,
            multiplier,
            found: multiplier.is_some(),
        })
    }
}
