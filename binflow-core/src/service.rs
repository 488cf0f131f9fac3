//! High-level service facade wiring the engine components together.

use std::sync::Arc;

use tracing::info;

use crate::collection::CollectionRecorder;
use crate::config::EngineConfig;
use crate::disposal::DisposalDesk;
use crate::error::EngineError;
use crate::model::{Actor, ActorId, ActorRole, BinId, Notification};
use crate::planner::RoutePlanner;
use crate::ports::{Ports, StoreError};
use crate::registry::BinRegistry;
use crate::simulator::{FleetSimulator, TickReport};
use crate::strategy::SequencingStrategy;

/// Public entry point for front ends.
pub struct BinflowService {
    ports: Ports,
    config: EngineConfig,
    registry: Arc<BinRegistry>,
    recorder: Arc<CollectionRecorder>,
    planner: Arc<RoutePlanner>,
    simulator: Arc<FleetSimulator>,
    disposals: Arc<DisposalDesk>,
}

impl BinflowService {
    /// Build every component over the shared ports.
    #[must_use]
    pub fn new(ports: Ports, config: EngineConfig) -> Self {
        Self::with_strategy(ports, config, None)
    }

    /// Like [`BinflowService::new`], sequencing routes with `strategy`.
    #[must_use]
    pub fn with_strategy(
        ports: Ports,
        config: EngineConfig,
        strategy: Option<Arc<dyn SequencingStrategy>>,
    ) -> Self {
        let registry = Arc::new(BinRegistry::new(ports.clone(), &config));
        let recorder = Arc::new(CollectionRecorder::new(
            ports.clone(),
            Arc::clone(&registry),
            &config,
        ));
        let mut planner = RoutePlanner::new(
            ports.clone(),
            Arc::clone(&registry),
            Arc::clone(&recorder),
            &config,
        );
        if let Some(strategy) = strategy {
            planner = planner.with_strategy(strategy);
        }
        let simulator = Arc::new(FleetSimulator::from_config(
            Arc::clone(&registry),
            Arc::clone(&ports.clock),
            &config,
        ));
        let disposals = Arc::new(DisposalDesk::new(
            ports.clone(),
            Arc::clone(&registry),
            &config,
        ));

        Self {
            ports,
            config,
            registry,
            recorder,
            planner: Arc::new(planner),
            simulator,
            disposals,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bin registry.
    #[must_use]
    pub fn bins(&self) -> &Arc<BinRegistry> {
        &self.registry
    }

    /// Collection recorder.
    #[must_use]
    pub fn collections(&self) -> &Arc<CollectionRecorder> {
        &self.recorder
    }

    /// Route planner.
    #[must_use]
    pub fn routes(&self) -> &Arc<RoutePlanner> {
        &self.planner
    }

    /// Fleet simulator.
    #[must_use]
    pub fn simulator(&self) -> &Arc<FleetSimulator> {
        &self.simulator
    }

    /// Resident disposal reports.
    #[must_use]
    pub fn disposals(&self) -> &Arc<DisposalDesk> {
        &self.disposals
    }

    /// Run the overdue sweep with the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the store fails.
    pub async fn sweep_overdue(&self) -> Result<Vec<BinId>, EngineError> {
        self.registry
            .mark_overdue_sweep(self.config.overdue_threshold())
            .await
    }

    /// Run one simulator pass.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the bin list cannot be loaded.
    pub async fn simulate_tick(&self) -> Result<TickReport, EngineError> {
        self.simulator.tick().await
    }

    /// Move a collector to another region on an authority's behalf.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown actors,
    /// [`EngineError::Validation`] for a blank region or wrong roles.
    pub async fn reassign_region(
        &self,
        authority: &ActorId,
        collector: &ActorId,
        region: &str,
    ) -> Result<Actor, EngineError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(EngineError::Validation("region is required".into()));
        }
        self.ports
            .actor_with_role(authority, ActorRole::Authority)
            .await?;
        self.ports
            .actor_with_role(collector, ActorRole::Collector)
            .await?;

        let actor = self
            .ports
            .actors
            .set_region(collector, region)
            .await
            .map_err(|err| match err {
                StoreError::Missing => EngineError::not_found("actor", collector),
                other => EngineError::Storage(other),
            })?;
        info!(collector = %collector, region, "collector reassigned");
        self.ports
            .announce(Notification::RegionReassigned {
                collector: *collector,
                region: region.to_owned(),
            })
            .await;
        Ok(actor)
    }
}
