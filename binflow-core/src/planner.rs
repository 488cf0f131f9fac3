//! Route dispatch and the route/stop state machines.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collection::{CollectionRecorder, CollectionRequest};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{
    ActorId, ActorRole, Bin, BinId, Collection, Notification, Route, RouteBin, RouteBinStatus,
    RouteId, RouteStatus,
};
use crate::ports::{Ports, StoreError};
use crate::registry::BinRegistry;
use crate::strategy::{InputOrder, SequencingStrategy, path_length_km};

/// What happened at a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The bin was emptied; a completed collection is recorded for it.
    Collected {
        /// Free-text description of the waste.
        waste_type: String,
        /// Optional collector notes.
        notes: Option<String>,
    },
    /// The stop was passed over.
    Skipped {
        /// Why the stop was skipped.
        reason: Option<String>,
    },
}

/// Result of visiting a stop.
#[derive(Debug, Clone)]
pub struct StopVisit {
    /// Route after the visit.
    pub route: Route,
    /// Collection recorded for a collected stop.
    pub collection: Option<Collection>,
}

/// Builds routes from bin lists and drives them to completion.
pub struct RoutePlanner {
    ports: Ports,
    registry: Arc<BinRegistry>,
    recorder: Arc<CollectionRecorder>,
    strategy: Arc<dyn SequencingStrategy>,
    minutes_per_stop: i64,
    max_write_attempts: u32,
}

impl RoutePlanner {
    /// Create a planner that sequences stops in input order.
    #[must_use]
    pub fn new(
        ports: Ports,
        registry: Arc<BinRegistry>,
        recorder: Arc<CollectionRecorder>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ports,
            registry,
            recorder,
            strategy: Arc::new(InputOrder),
            minutes_per_stop: config.minutes_per_stop,
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    /// Replace the default sequencing strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn SequencingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Dispatch a route over `bin_ids` to `collector` on behalf of `authority`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an empty or repeating bin list
    /// or actors with the wrong role, and [`EngineError::NotFound`] naming
    /// the first unknown bin or actor.
    pub async fn assign(
        &self,
        bin_ids: &[BinId],
        collector: &ActorId,
        authority: &ActorId,
    ) -> Result<Route, EngineError> {
        self.assign_with(bin_ids, collector, authority, self.strategy.as_ref())
            .await
    }

    /// [`RoutePlanner::assign`] with an explicit sequencing strategy.
    ///
    /// # Errors
    ///
    /// Same as [`RoutePlanner::assign`].
    pub async fn assign_with(
        &self,
        bin_ids: &[BinId],
        collector: &ActorId,
        authority: &ActorId,
        strategy: &dyn SequencingStrategy,
    ) -> Result<Route, EngineError> {
        if bin_ids.is_empty() {
            return Err(EngineError::Validation(
                "a route needs at least one bin".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(bin_ids.len());
        if let Some(repeated) = bin_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(EngineError::Validation(format!(
                "bin {repeated} appears more than once"
            )));
        }

        let mut bins: Vec<Bin> = Vec::with_capacity(bin_ids.len());
        for id in bin_ids {
            bins.push(self.registry.get(id).await?);
        }
        self.ports
            .actor_with_role(collector, ActorRole::Collector)
            .await?;
        self.ports
            .actor_with_role(authority, ActorRole::Authority)
            .await?;

        let ordered = ordered_bins(&bins, strategy)?;
        let positions: Vec<_> = ordered.iter().map(|bin| bin.position).collect();
        let stops = ordered
            .iter()
            .zip(1_u32..)
            .map(|(bin, sequence_order)| RouteBin {
                bin_id: bin.id,
                sequence_order,
                status: RouteBinStatus::Pending,
                visited_date: None,
            })
            .collect::<Vec<_>>();

        let now = self.ports.clock.now();
        let stop_count = i64::try_from(stops.len())
            .map_err(|err| EngineError::Validation(format!("too many stops: {err}")))?;
        let route = Route {
            id: RouteId::new(),
            name: format!("Route {}", now.format("%Y-%m-%d %H:%M")),
            collector: *collector,
            authority: *authority,
            status: RouteStatus::Assigned,
            assigned_date: now,
            started_date: None,
            completed_date: None,
            estimated_duration_minutes: self.minutes_per_stop * stop_count,
            actual_duration_minutes: None,
            total_distance_km: Some(path_length_km(&positions)),
            stops,
            version: 0,
        };

        let route = self.ports.routes.insert(route).await?;
        info!(
            route_id = %route.id,
            collector = %collector,
            stops = route.stops.len(),
            strategy = %strategy.id(),
            "route assigned"
        );
        self.ports
            .announce(Notification::RouteAssigned {
                route_id: route.id,
                collector: route.collector,
                stops: route.stops.len(),
            })
            .await;
        Ok(route)
    }

    /// Load a route.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn get(&self, id: &RouteId) -> Result<Route, EngineError> {
        self.ports
            .routes
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("route", id))
    }

    /// Load every route, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the store fails.
    pub async fn list(&self) -> Result<Vec<Route>, EngineError> {
        Ok(self.ports.routes.list().await?)
    }

    /// Completed stops as a percentage of all stops.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn progress(&self, id: &RouteId) -> Result<f64, EngineError> {
        Ok(self.get(id).await?.progress())
    }

    /// Collector begins the route.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the route is ASSIGNED
    /// and [`EngineError::Validation`] unless `collector` owns the route.
    pub async fn start(&self, collector: &ActorId, id: &RouteId) -> Result<Route, EngineError> {
        self.ports
            .actor_with_role(collector, ActorRole::Collector)
            .await?;
        let now = self.ports.clock.now();
        let route = self
            .update(id, |route| {
                ensure_owner(route, collector)?;
                if route.status != RouteStatus::Assigned {
                    return Err(EngineError::invalid_transition("route", route.status, "start"));
                }
                route.status = RouteStatus::InProgress;
                route.started_date = Some(now);
                Ok(())
            })
            .await?;
        info!(route_id = %id, "route started");
        Ok(route)
    }

    /// Collector finishes the route. The actual duration is measured from
    /// the start; a route without a recorded start keeps it unset.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the route is
    /// IN_PROGRESS and [`EngineError::Validation`] unless `collector` owns it.
    pub async fn complete(&self, collector: &ActorId, id: &RouteId) -> Result<Route, EngineError> {
        self.ports
            .actor_with_role(collector, ActorRole::Collector)
            .await?;
        let now = self.ports.clock.now();
        let route = self
            .update(id, |route| {
                ensure_owner(route, collector)?;
                if route.status != RouteStatus::InProgress {
                    return Err(EngineError::invalid_transition(
                        "route",
                        route.status,
                        "complete",
                    ));
                }
                route.status = RouteStatus::Completed;
                route.completed_date = Some(now);
                route.actual_duration_minutes = route
                    .started_date
                    .map(|started| (now - started).num_minutes());
                Ok(())
            })
            .await?;
        info!(
            route_id = %id,
            actual_minutes = ?route.actual_duration_minutes,
            "route completed"
        );
        Ok(route)
    }

    /// Administrative stop of an unfinished route.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] when the route already
    /// COMPLETED or was CANCELLED, [`EngineError::Validation`] when
    /// `authority` is not an authority.
    pub async fn cancel(&self, authority: &ActorId, id: &RouteId) -> Result<Route, EngineError> {
        self.ports
            .actor_with_role(authority, ActorRole::Authority)
            .await?;
        let route = self
            .update(id, |route| {
                if route.status.is_terminal() {
                    return Err(EngineError::invalid_transition("route", route.status, "cancel"));
                }
                route.status = RouteStatus::Cancelled;
                Ok(())
            })
            .await?;
        info!(route_id = %id, authority = %authority, "route cancelled");
        Ok(route)
    }

    /// Collector arrives at a stop.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the route is
    /// IN_PROGRESS and the stop PENDING, [`EngineError::NotFound`] for an
    /// unknown stop, [`EngineError::Validation`] unless `collector` owns the
    /// route.
    pub async fn arrive(
        &self,
        collector: &ActorId,
        id: &RouteId,
        sequence_order: u32,
    ) -> Result<Route, EngineError> {
        self.ports
            .actor_with_role(collector, ActorRole::Collector)
            .await?;
        self.update(id, |route| {
            ensure_owner(route, collector)?;
            ensure_in_progress(route, "arrive at a stop of")?;
            let stop = stop_mut(route, sequence_order)?;
            if stop.status != RouteBinStatus::Pending {
                return Err(EngineError::invalid_transition("stop", stop.status, "arrive at"));
            }
            stop.status = RouteBinStatus::InProgress;
            Ok(())
        })
        .await
    }

    /// Finish a stop. A collected stop records a completed collection for
    /// its bin covering the whole fill level, which empties the bin before
    /// this returns.
    ///
    /// The stop is claimed on the route first, so a concurrent visit or
    /// cancel cannot record a second pickup. If the pickup cannot be
    /// recorded the stop is released again.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the route is
    /// IN_PROGRESS and the stop still open, [`EngineError::NotFound`] for an
    /// unknown route or stop, [`EngineError::Validation`] unless `collector`
    /// owns the route.
    pub async fn visit_stop(
        &self,
        collector: &ActorId,
        id: &RouteId,
        sequence_order: u32,
        outcome: StopOutcome,
    ) -> Result<StopVisit, EngineError> {
        self.ports
            .actor_with_role(collector, ActorRole::Collector)
            .await?;
        let status = match outcome {
            StopOutcome::Collected { .. } => RouteBinStatus::Completed,
            StopOutcome::Skipped { .. } => RouteBinStatus::Skipped,
        };
        let now = self.ports.clock.now();
        let mut released = RouteBinStatus::Pending;
        let route = self
            .update(id, |route| {
                ensure_owner(route, collector)?;
                ensure_in_progress(route, "visit a stop of")?;
                let stop = stop_mut(route, sequence_order)?;
                ensure_stop_open(stop)?;
                released = stop.status;
                stop.status = status;
                stop.visited_date = Some(now);
                Ok(())
            })
            .await?;

        let collection = match outcome {
            StopOutcome::Collected { waste_type, notes } => {
                match self.collect(&route, sequence_order, waste_type, notes).await {
                    Ok(collection) => Some(collection),
                    Err(err) => {
                        self.release(id, sequence_order, released).await;
                        return Err(err);
                    }
                }
            }
            StopOutcome::Skipped { reason } => {
                info!(route_id = %id, sequence_order, reason = ?reason, "stop skipped");
                None
            }
        };

        debug!(
            route_id = %id,
            sequence_order,
            progress = route.progress(),
            "stop visited"
        );
        Ok(StopVisit { route, collection })
    }

    async fn collect(
        &self,
        route: &Route,
        sequence_order: u32,
        waste_type: String,
        notes: Option<String>,
    ) -> Result<Collection, EngineError> {
        let stop = route
            .stop(sequence_order)
            .ok_or_else(|| EngineError::not_found("stop", sequence_order))?;
        let bin = self.registry.get(&stop.bin_id).await?;
        let request = CollectionRequest {
            bin_id: bin.id,
            collector: route.collector,
            waste_type,
            waste_level: bin.fill_level.max(0),
            notes,
        };
        self.recorder.record_for_route(request, route.id).await
    }

    /// Reopen a claimed stop whose pickup could not be recorded.
    async fn release(&self, id: &RouteId, sequence_order: u32, previous: RouteBinStatus) {
        let reopened = self
            .update(id, |route| {
                let stop = stop_mut(route, sequence_order)?;
                if stop.status == RouteBinStatus::Completed {
                    stop.status = previous;
                    stop.visited_date = None;
                }
                Ok(())
            })
            .await;
        if let Err(err) = reopened {
            warn!(route_id = %id, sequence_order, error = %err, "could not release stop");
        }
    }

    async fn update<F>(&self, id: &RouteId, mut mutate: F) -> Result<Route, EngineError>
    where
        F: FnMut(&mut Route) -> Result<(), EngineError> + Send,
    {
        for attempt in 1..=self.max_write_attempts {
            let mut route = self.get(id).await?;
            mutate(&mut route)?;
            match self.ports.routes.save(route).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::Conflict) => {
                    debug!(route_id = %id, attempt, "route write conflict, retrying");
                }
                Err(StoreError::Missing) => return Err(EngineError::not_found("route", id)),
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::Conflict)
    }
}

fn ordered_bins<'bins>(
    bins: &'bins [Bin],
    strategy: &dyn SequencingStrategy,
) -> Result<Vec<&'bins Bin>, EngineError> {
    let order = strategy.sequence(bins);
    let mut used = vec![false; bins.len()];
    let mut ordered = Vec::with_capacity(bins.len());
    for index in order {
        match (bins.get(index), used.get_mut(index)) {
            (Some(bin), Some(flag)) if !*flag => {
                *flag = true;
                ordered.push(bin);
            }
            _ => break,
        }
    }
    if ordered.len() != bins.len() {
        return Err(EngineError::Validation(format!(
            "strategy {} did not return a permutation of the bins",
            strategy.id()
        )));
    }
    Ok(ordered)
}

fn ensure_owner(route: &Route, collector: &ActorId) -> Result<(), EngineError> {
    if route.collector == *collector {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "route {} belongs to another collector",
            route.id
        )))
    }
}

fn ensure_in_progress(route: &Route, action: &'static str) -> Result<(), EngineError> {
    if route.status == RouteStatus::InProgress {
        Ok(())
    } else {
        Err(EngineError::invalid_transition("route", route.status, action))
    }
}

fn ensure_stop_open(stop: &RouteBin) -> Result<(), EngineError> {
    match stop.status {
        RouteBinStatus::Pending | RouteBinStatus::InProgress => Ok(()),
        RouteBinStatus::Completed | RouteBinStatus::Skipped => {
            Err(EngineError::invalid_transition("stop", stop.status, "visit"))
        }
    }
}

fn stop_mut(route: &mut Route, sequence_order: u32) -> Result<&mut RouteBin, EngineError> {
    route
        .stops
        .iter_mut()
        .find(|stop| stop.sequence_order == sequence_order)
        .ok_or_else(|| EngineError::not_found("stop", sequence_order))
}
