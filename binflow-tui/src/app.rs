use std::collections::BTreeSet;
use std::sync::Arc;

use binflow_core::memory::RecordingNotifier;
use binflow_core::{
    ActorId, Bin, BinId, BinflowService, EngineError, Route, RouteBin, StrategyId,
    StrategyRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Screen {
    Bins,
    Routes,
    RouteDetail,
}

/// Actors the operator acts as.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Crew {
    pub collector: ActorId,
    pub authority: ActorId,
    pub resident: ActorId,
}

pub(crate) struct App {
    pub service: Arc<BinflowService>,
    pub crew: Crew,
    pub events: Option<Arc<RecordingNotifier>>,

    pub screen: Screen,

    pub bins: Vec<Bin>,
    pub bin_list_index: usize,
    pub picked: BTreeSet<BinId>,

    pub routes: Vec<Route>,
    pub route_list_index: usize,
    pub stop_list_index: usize,

    pub strategies: StrategyRegistry,
    pub strategy_ids: Vec<StrategyId>,
    pub strategy_index: usize,

    pub is_loading: bool,
    pub error_message: Option<String>,
    pub info_message: Option<String>,
}

impl App {
    pub(crate) fn new(
        service: Arc<BinflowService>,
        crew: Crew,
        events: Option<Arc<RecordingNotifier>>,
    ) -> Self {
        let strategies = StrategyRegistry::builtin();
        let strategy_ids = strategies.ids();
        Self {
            service,
            crew,
            events,
            screen: Screen::Bins,
            bins: Vec::new(),
            bin_list_index: 0,
            picked: BTreeSet::new(),
            routes: Vec::new(),
            route_list_index: 0,
            stop_list_index: 0,
            strategies,
            strategy_ids,
            strategy_index: 0,
            is_loading: false,
            error_message: None,
            info_message: None,
        }
    }

    /// Reload bins and routes, keeping the cursors in range.
    pub(crate) async fn refresh(&mut self) -> Result<(), EngineError> {
        self.bins = self.service.bins().list().await?;
        let mut routes = self.service.routes().list().await?;
        routes.reverse();
        self.routes = routes;

        self.bin_list_index = clamp_index(self.bin_list_index, self.bins.len());
        self.route_list_index = clamp_index(self.route_list_index, self.routes.len());
        let stops = self.current_route().map_or(0, |route| route.stops.len());
        self.stop_list_index = clamp_index(self.stop_list_index, stops);
        self.picked
            .retain(|id| self.bins.iter().any(|bin| bin.id == *id));
        Ok(())
    }

    pub(crate) fn current_bin(&self) -> Option<&Bin> {
        self.bins.get(self.bin_list_index)
    }

    pub(crate) fn current_route(&self) -> Option<&Route> {
        self.routes.get(self.route_list_index)
    }

    pub(crate) fn current_stop(&self) -> Option<&RouteBin> {
        self.current_route()?.stops.get(self.stop_list_index)
    }

    pub(crate) fn toggle_current_bin(&mut self) {
        if let Some(id) = self.current_bin().map(|bin| bin.id)
            && !self.picked.remove(&id)
        {
            self.picked.insert(id);
        }
    }

    /// Bins for the next route: the picked ones, or every alerting bin.
    pub(crate) fn route_candidates(&self) -> Vec<BinId> {
        if !self.picked.is_empty() {
            return self
                .bins
                .iter()
                .filter(|bin| self.picked.contains(&bin.id))
                .map(|bin| bin.id)
                .collect();
        }
        self.bins
            .iter()
            .filter(|bin| bin.alert)
            .map(|bin| bin.id)
            .collect()
    }

    pub(crate) fn current_strategy(&self) -> Option<&StrategyId> {
        self.strategy_ids.get(self.strategy_index)
    }

    pub(crate) fn cycle_strategy(&mut self) {
        if !self.strategy_ids.is_empty() {
            self.strategy_index = (self.strategy_index + 1) % self.strategy_ids.len();
        }
    }

    pub(crate) fn event_count(&self) -> Option<usize> {
        self.events.as_ref().map(|events| events.sent().len())
    }

    pub(crate) fn bin_label(&self, id: &BinId) -> String {
        self.bins
            .iter()
            .find(|bin| bin.id == *id)
            .map_or_else(|| id.to_string(), |bin| format!("{} ({})", bin.qr_code, bin.location))
    }

    pub(crate) fn set_error(&mut self, context: &str, err: &EngineError) {
        self.info_message = None;
        self.error_message = Some(format!("{context}: {err}"));
    }

    pub(crate) fn set_info(&mut self, message: String) {
        self.error_message = None;
        self.info_message = Some(message);
    }
}

fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::clamp_index;

    #[test]
    fn clamps_cursor_to_list() {
        assert_eq!(clamp_index(5, 3), 2);
        assert_eq!(clamp_index(1, 3), 1);
        assert_eq!(clamp_index(4, 0), 0);
    }
}
