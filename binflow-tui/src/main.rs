//! Terminal UI for binflow: watch simulated bins fill up and dispatch collection routes.

mod app;
mod input;
mod seed;
mod ui;

use std::{
    env,
    fs::{self, File},
    io,
    sync::{Arc, Mutex},
    time::{Duration as StdDuration, Instant},
};

use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use reqwest::Client;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use binflow_core::memory::{InMemoryStore, RecordingNotifier};
use binflow_core::{
    BinStatus, BinflowService, EngineConfig, NotificationPort, Ports, StopOutcome, SystemClock,
};
use binflow_notify_webhook::{WEBHOOK_URL_ENV, WebhookNotifier};

use crate::app::App;
use crate::input::Action;

const LOG_FILE: &str = "binflow.log";
const REFRESH_EVERY: StdDuration = StdDuration::from_secs(1);
const DISPOSAL_STEP: i32 = 20;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    // Optional JSON config path as the only argument
    let config = match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            EngineConfig::from_json(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => EngineConfig::default(),
    };

    // Notification sink: webhook when configured, in-memory otherwise
    let (notifier, events): (Arc<dyn NotificationPort>, Option<Arc<RecordingNotifier>>) =
        match env::var(WEBHOOK_URL_ENV) {
            Ok(url) => {
                let client = Client::builder().user_agent("binflow/0.1").build()?;
                let webhook = WebhookNotifier::new(client, &url)?;
                info!(url = %webhook.url(), "posting notifications to webhook");
                (Arc::new(webhook), None)
            }
            Err(_) => {
                let recorder = Arc::new(RecordingNotifier::default());
                let sink: Arc<dyn NotificationPort> = Arc::<RecordingNotifier>::clone(&recorder);
                (sink, Some(recorder))
            }
        };

    let store = Arc::new(InMemoryStore::default());
    let (directory, crew) = seed::directory();
    let ports = Ports {
        bins: Arc::<InMemoryStore>::clone(&store),
        routes: Arc::<InMemoryStore>::clone(&store),
        collections: store,
        actors: Arc::new(directory),
        notifier,
        clock: Arc::new(SystemClock),
    };
    let interval = config.simulator_interval();
    let service = Arc::new(BinflowService::new(ports, config));
    seed::bins(&service).await?;

    // Sensor feed in the background
    let (shutdown, shutdown_rx) = watch::channel(false);
    let simulator = Arc::clone(service.simulator());
    let simulation = tokio::spawn(async move { simulator.run(interval, shutdown_rx).await });

    let mut app = App::new(service, crew, events);
    app.refresh().await?;

    // Terminal init
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run event loop
    let res = run(&mut terminal, app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if shutdown.send(true).is_err() {
        warn!("simulator already stopped");
    }
    simulation.await?;

    res
}

/// Log to a file; the terminal belongs to the UI.
fn init_logging() -> Result<()> {
    let file = File::create(LOG_FILE).with_context(|| format!("creating {LOG_FILE}"))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    let mut last_refresh = Instant::now();

    loop {
        // Pick up simulator changes
        if last_refresh.elapsed() >= REFRESH_EVERY {
            if let Err(err) = app.refresh().await {
                app.set_error("Refresh failed", &err);
            }
            last_refresh = Instant::now();
        }

        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Poll for input (non-blocking, small timeout to keep CPU low)
        let key = if event::poll(StdDuration::from_millis(100))?
            && let CEvent::Key(key) = event::read()?
        {
            key
        } else {
            continue;
        };

        let action = input::handle_key_event(key, &mut app);
        if action == Action::Quit {
            break;
        }
        if action == Action::None {
            continue;
        }

        app.is_loading = true;
        terminal.draw(|frame| ui::draw(frame, &app))?;
        perform(&mut app, action).await;
        app.is_loading = false;

        if let Err(err) = app.refresh().await {
            app.set_error("Refresh failed", &err);
        }
        last_refresh = Instant::now();
    }

    Ok(())
}

async fn perform(app: &mut App, action: Action) {
    let service = Arc::clone(&app.service);
    let crew = app.crew;

    match action {
        Action::None | Action::Quit => {}
        Action::Refresh => app.set_info("Refreshed".into()),
        Action::AssignRoute => {
            let bins = app.route_candidates();
            if bins.is_empty() {
                app.error_message =
                    Some("Nothing to dispatch: pick bins with Space or wait for alerts".into());
                return;
            }
            let Some(strategy_id) = app.current_strategy().cloned() else {
                app.error_message = Some("No sequencing strategy available".into());
                return;
            };
            let result = match app.strategies.strategy(&strategy_id) {
                Ok(strategy) => {
                    service
                        .routes()
                        .assign_with(&bins, &crew.collector, &crew.authority, strategy.as_ref())
                        .await
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(route) => {
                    app.picked.clear();
                    app.route_list_index = 0;
                    app.stop_list_index = 0;
                    app.set_info(format!(
                        "Dispatched {} with {} stops",
                        route.name,
                        route.stops.len()
                    ));
                }
                Err(err) => app.set_error("Assign failed", &err),
            }
        }
        Action::SweepOverdue => match service.sweep_overdue().await {
            Ok(ids) => app.set_info(format!("Sweep marked {} bins overdue", ids.len())),
            Err(err) => app.set_error("Sweep failed", &err),
        },
        Action::EmptyBin => {
            let Some(bin_id) = app.current_bin().map(|bin| bin.id) else {
                return;
            };
            match service
                .bins()
                .set_status(&crew.authority, &bin_id, BinStatus::Empty, None)
                .await
            {
                Ok(bin) => app.set_info(format!("{} marked empty", bin.qr_code)),
                Err(err) => app.set_error("Override failed", &err),
            }
        }
        Action::ReportDisposal => {
            let Some((bin_id, level)) = app.current_bin().map(|bin| (bin.id, bin.fill_level))
            else {
                return;
            };
            let next = (level + DISPOSAL_STEP).min(100);
            match service
                .disposals()
                .submit(&crew.resident, &bin_id, next)
                .await
            {
                Ok(bin) => app.set_info(format!("{} now at {}%", bin.qr_code, bin.fill_level)),
                Err(err) => app.set_error("Disposal failed", &err),
            }
        }
        Action::StartRoute | Action::CompleteRoute | Action::CancelRoute => {
            let Some(route_id) = app.current_route().map(|route| route.id) else {
                return;
            };
            let planner = service.routes();
            let (verb, result) = match action {
                Action::StartRoute => ("Start", planner.start(&crew.collector, &route_id).await),
                Action::CompleteRoute => (
                    "Complete",
                    planner.complete(&crew.collector, &route_id).await,
                ),
                _ => ("Cancel", planner.cancel(&crew.authority, &route_id).await),
            };
            match result {
                Ok(route) => app.set_info(format!("{} is now {:?}", route.name, route.status)),
                Err(err) => app.set_error(&format!("{verb} failed"), &err),
            }
        }
        Action::CollectStop | Action::SkipStop => {
            let Some((route_id, sequence)) = app
                .current_route()
                .zip(app.current_stop())
                .map(|(route, stop)| (route.id, stop.sequence_order))
            else {
                return;
            };
            let outcome = if action == Action::CollectStop {
                StopOutcome::Collected {
                    waste_type: "mixed".into(),
                    notes: None,
                }
            } else {
                StopOutcome::Skipped {
                    reason: Some("skipped from terminal".into()),
                }
            };
            match service
                .routes()
                .visit_stop(&crew.collector, &route_id, sequence, outcome)
                .await
            {
                Ok(visit) => {
                    if app.stop_list_index + 1 < visit.route.stops.len() {
                        app.stop_list_index += 1;
                    }
                    app.set_info(format!(
                        "Stop {sequence} done, route {:.0}% complete",
                        visit.route.progress()
                    ));
                }
                Err(err) => app.set_error("Visit failed", &err),
            }
        }
    }
}
