use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, Screen};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Quit,
    Refresh,
    /// Dispatch a route over the picked (or alerting) bins
    AssignRoute,
    SweepOverdue,
    /// Authority override: mark the current bin EMPTY
    EmptyBin,
    /// Resident report: the current bin gained some waste
    ReportDisposal,
    StartRoute,
    CompleteRoute,
    CancelRoute,
    CollectStop,
    SkipStop,
}

pub(crate) fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    use KeyCode::{BackTab, Char, Down, Enter, Esc, Left, Right, Tab, Up};

    // Global shortcuts
    if key.code == Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }
    if key.code == Char('q') && key.modifiers.is_empty() {
        return Action::Quit;
    }
    if key.code == Char('r') && key.modifiers.is_empty() {
        return Action::Refresh;
    }

    let mut action = Action::None;

    match app.screen {
        Screen::Bins => match key.code {
            Up | Char('k') => {
                app.bin_list_index = app.bin_list_index.saturating_sub(1);
            }
            Down | Char('j') => {
                if app.bin_list_index + 1 < app.bins.len() {
                    app.bin_list_index += 1;
                }
            }
            Char(' ') => app.toggle_current_bin(),
            Char('a') => action = Action::AssignRoute,
            Char('s') => action = Action::SweepOverdue,
            Char('e') => action = Action::EmptyBin,
            Char('d') => action = Action::ReportDisposal,
            Char('t') => app.cycle_strategy(),
            Tab | Right => app.screen = Screen::Routes,
            _ => {}
        },

        Screen::Routes => match key.code {
            Up | Char('k') => {
                app.route_list_index = app.route_list_index.saturating_sub(1);
                app.stop_list_index = 0;
            }
            Down | Char('j') => {
                if app.route_list_index + 1 < app.routes.len() {
                    app.route_list_index += 1;
                    app.stop_list_index = 0;
                }
            }
            Enter | Right => {
                if app.current_route().is_some() {
                    app.screen = Screen::RouteDetail;
                }
            }
            Char('s') => action = Action::StartRoute,
            Char('c') => action = Action::CompleteRoute,
            Char('x') => action = Action::CancelRoute,
            Tab | BackTab | Left | Esc => app.screen = Screen::Bins,
            _ => {}
        },

        Screen::RouteDetail => match key.code {
            Up | Char('k') => {
                app.stop_list_index = app.stop_list_index.saturating_sub(1);
            }
            Down | Char('j') => {
                let stops = app.current_route().map_or(0, |route| route.stops.len());
                if app.stop_list_index + 1 < stops {
                    app.stop_list_index += 1;
                }
            }
            Enter | Char('v') => action = Action::CollectStop,
            Char('n') => action = Action::SkipStop,
            Char('s') => action = Action::StartRoute,
            Char('c') => action = Action::CompleteRoute,
            Left | Esc | Char('b') => app.screen = Screen::Routes,
            _ => {}
        },
    }
    action
}
