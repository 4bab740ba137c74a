//! Unit conversion graph

use std::collections::{BTreeMap, HashSet, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One directed conversion: `1 from_unit = multiplier to_unit`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UnitConversionEdge {
    pub from_unit_id: Uuid,
    pub to_unit_id: Uuid,
    pub multiplier: Decimal,
}

/// No chain of edges leads from one unit to the other
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize)]
#[error("no conversion path from unit {from_unit_id} to unit {to_unit_id}")]
pub struct NoConversionPath {
    pub from_unit_id: Uuid,
    pub to_unit_id: Uuid,
}

/// Directed, weighted graph of unit conversions
#[derive(Debug, Clone, Default)]
pub struct UnitGraph {
    adjacency: BTreeMap<Uuid, Vec<(Uuid, Decimal)>>,
    edge_count: usize,
}

impl UnitGraph {
    /// Build a graph from edges. Edges with a non-positive multiplier are dropped.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = UnitConversionEdge>,
    {
        let mut graph = Self::default();
        for edge in edges {
            graph.add_edge(edge);
        }
        graph
    }

    pub fn add_edge(&mut self, edge: UnitConversionEdge) {
        if edge.multiplier <= Decimal::ZERO {
            return;
        }
        self.adjacency
            .entry(edge.from_unit_id)
            .or_default()
            .push((edge.to_unit_id, edge.multiplier));
        self.edge_count += 1;
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Multiplier turning a quantity in `from` into a quantity in `to`.
    ///
    /// Breadth-first, so the path with the fewest hops wins; among equal-length
    /// paths the first edge inserted wins. Paths whose product overflows are
    /// abandoned.
    pub fn resolve(&self, from: Uuid, to: Uuid) -> Result<Decimal, NoConversionPath> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        let mut visited = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, Decimal::ONE)]);

        while let Some((unit, multiplier)) = queue.pop_front() {
            let Some(edges) = self.adjacency.get(&unit) else {
                continue;
            };
            for &(next, step) in edges {
                if !visited.insert(next) {
                    continue;
                }
                let Some(product) = multiplier.checked_mul(step) else {
                    continue;
                };
                if next == to {
                    return Ok(product);
                }
                queue.push_back((next, product));
            }
        }

        Err(NoConversionPath {
            from_unit_id: from,
            to_unit_id: to,
        })
    }

    /// Convert `quantity` from one unit to another
    pub fn convert(&self, quantity: Decimal, from: Uuid, to: Uuid) -> Result<Decimal, NoConversionPath> {
        let multiplier = self.resolve(from, to)?;
        quantity.checked_mul(multiplier).ok_or(NoConversionPath {
            from_unit_id: from,
            to_unit_id: to,
        })
    }
}
