//! Stop sequencing strategies and the registry that resolves them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{Bin, GeoPoint};

/// Mean earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres.
#[must_use]
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let half_chord = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * half_chord.sqrt().asin()
}

/// Sum of straight-line legs when visiting `points` in order.
#[must_use]
pub fn path_length_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|leg| match leg {
            [from, to] => haversine_km(*from, *to),
            _ => 0.0,
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identifier for a sequencing strategy.
pub struct StrategyId(pub String);

impl fmt::Display for StrategyId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Decides the visiting order of a route's bins.
pub trait SequencingStrategy: Send + Sync {
    /// Identifier used by the registry.
    fn id(&self) -> StrategyId;

    /// Indices into `bins` in visiting order. Must be a permutation of
    /// `0..bins.len()`.
    fn sequence(&self, bins: &[Bin]) -> Vec<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
/// Visit bins exactly in the order they were given.
///
/// No travel optimisation happens here.
pub struct InputOrder;

impl InputOrder {
    /// Registry id.
    pub const ID: &'static str = "input-order";
}

impl SequencingStrategy for InputOrder {
    fn id(&self) -> StrategyId {
        StrategyId(Self::ID.to_owned())
    }

    fn sequence(&self, bins: &[Bin]) -> Vec<usize> {
        (0..bins.len()).collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Start at the first bin, then always move to the closest unvisited one.
pub struct NearestNeighbor;

impl NearestNeighbor {
    /// Registry id.
    pub const ID: &'static str = "nearest-neighbor";
}

impl SequencingStrategy for NearestNeighbor {
    fn id(&self) -> StrategyId {
        StrategyId(Self::ID.to_owned())
    }

    fn sequence(&self, bins: &[Bin]) -> Vec<usize> {
        let Some(first) = bins.first() else {
            return Vec::new();
        };

        let mut order = Vec::with_capacity(bins.len());
        let mut remaining: Vec<usize> = (1..bins.len()).collect();
        let mut current = first.position;
        order.push(0);

        while !remaining.is_empty() {
            let nearest = remaining
                .iter()
                .enumerate()
                .filter_map(|(slot, &index)| {
                    bins.get(index)
                        .map(|bin| (slot, index, haversine_km(current, bin.position)))
                })
                .min_by(|left, right| left.2.total_cmp(&right.2));
            let Some((slot, index, _)) = nearest else {
                break;
            };
            remaining.swap_remove(slot);
            if let Some(bin) = bins.get(index) {
                current = bin.position;
            }
            order.push(index);
        }
        order
    }
}

/// Resolves sequencing strategies by id.
pub struct StrategyRegistry {
    strategies: HashMap<StrategyId, Arc<dyn SequencingStrategy>>,
}

impl StrategyRegistry {
    /// Build a registry from the provided strategies.
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn SequencingStrategy>>) -> Self {
        let strategies = strategies
            .into_iter()
            .map(|strategy| (strategy.id(), strategy))
            .collect();
        Self { strategies }
    }

    /// Registry holding [`InputOrder`] and [`NearestNeighbor`].
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![Arc::new(InputOrder), Arc::new(NearestNeighbor)])
    }

    /// Ids of all registered strategies, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<StrategyId> {
        let mut ids: Vec<StrategyId> = self.strategies.keys().cloned().collect();
        ids.sort_by(|left, right| left.0.cmp(&right.0));
        ids
    }

    /// Look up a strategy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when no strategy has that id.
    pub fn strategy(&self, id: &StrategyId) -> Result<Arc<dyn SequencingStrategy>, EngineError> {
        self.strategies
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Validation(format!("unknown sequencing strategy {id}")))
    }
}
