use chrono::{DateTime, Local, Utc};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
};
use binflow_core::{BinStatus, BinType, RouteBinStatus, RouteStatus};

use crate::app::{App, Screen};

pub(crate) fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();

    // Outer layout: title, main content, status line
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [header_area, content_area, status_area] = chunks else {
        return;
    };

    let strategy = app
        .current_strategy()
        .map_or_else(|| "<none>".to_owned(), ToString::to_string);
    let events = app
        .event_count()
        .map(|events| format!(" · {events} events"))
        .unwrap_or_default();
    let header_text = format!(
        "binflow · bins and routes · {} bins · {} routes · sequencing: {strategy}{events}",
        app.bins.len(),
        app.routes.len()
    );
    let header =
        Paragraph::new(header_text).block(Block::default().borders(Borders::ALL).title("Binflow"));
    frame.render_widget(header, *header_area);

    // Main screen
    match app.screen {
        Screen::Bins => draw_bins(frame, app, *content_area),
        Screen::Routes => draw_routes(frame, app, *content_area),
        Screen::RouteDetail => draw_route_detail(frame, app, *content_area),
    }

    // Status bar
    let nav_hint = match app.screen {
        Screen::Bins => {
            "↑/↓ move · Space pick · a assign route · s sweep · e empty · d disposal · t strategy · Tab routes · r refresh · q quit"
        }
        Screen::Routes => {
            "↑/↓ move · Enter stops · s start · c complete · x cancel · Tab bins · r refresh · q quit"
        }
        Screen::RouteDetail => {
            "↑/↓ move · Enter/v collect · n skip · s start · c complete · Esc/←/b back · q quit"
        }
    };

    let status_text = if app.is_loading {
        format!("Working… · {nav_hint}")
    } else if let Some(msg) = app.error_message.as_ref().or(app.info_message.as_ref()) {
        format!("{msg} · {nav_hint}")
    } else {
        nav_hint.to_owned()
    };

    let status_style = if app.error_message.is_some() {
        Style::default().fg(Color::Red)
    } else if app.is_loading {
        Style::default().fg(Color::Yellow)
    } else if app.info_message.is_some() {
        Style::default().fg(Color::Green)
    } else {
        Style::default()
    };

    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(status_style)
        .wrap(Wrap { trim: true });

    frame.render_widget(status, *status_area);
}

fn draw_bins(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let title = if app.picked.is_empty() {
        "Bins (a dispatches every alerting bin)".to_owned()
    } else {
        format!("Bins ({} picked for the next route)", app.picked.len())
    };

    if app.bins.is_empty() {
        let paragraph = Paragraph::new("No bins registered.")
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
        return;
    }

    let rows = app.bins.iter().map(|bin| {
        let picked = if app.picked.contains(&bin.id) { "●" } else { " " };
        let alert = if bin.alert { "!" } else { "" };
        Row::new(vec![
            Cell::from(picked),
            Cell::from(bin.qr_code.clone()),
            Cell::from(bin.location.clone()),
            Cell::from(bin_type_label(bin.bin_type)),
            Cell::from(fill_bar(bin.fill_level)),
            Cell::from(format!("{:?}", bin.status)),
            Cell::from(alert),
            Cell::from(relative_time(bin.last_emptied)),
        ])
        .style(Style::default().fg(status_color(bin.status)))
    });

    let column_widths = [
        Constraint::Length(2),
        Constraint::Length(10),
        Constraint::Min(16),
        Constraint::Length(10),
        Constraint::Length(16),
        Constraint::Length(8),
        Constraint::Length(2),
        Constraint::Length(14),
    ];

    let table = Table::new(rows, column_widths)
        .header(
            Row::new(vec![
                "", "QR", "Location", "Type", "Fill", "Status", "", "Emptied",
            ])
            .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    let mut state = TableState::default();
    state.select(Some(app.bin_list_index));
    frame.render_stateful_widget(table, area, &mut state);
}

fn draw_routes(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let title = "Routes, newest first (Enter to open)";

    if app.routes.is_empty() {
        let paragraph = Paragraph::new("No routes yet. Pick bins on the Bins screen and press a.")
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
        return;
    }

    let rows = app.routes.iter().map(|route| {
        let distance = route
            .total_distance_km
            .map_or_else(|| "-".to_owned(), |km| format!("{km:.1} km"));
        let actual = route
            .actual_duration_minutes
            .map_or_else(|| "-".to_owned(), |minutes| format!("{minutes} min"));
        Row::new(vec![
            Cell::from(route.name.clone()),
            Cell::from(format!("{:?}", route.status)),
            Cell::from(route.stops.len().to_string()),
            Cell::from(format!("{:.0}%", route.progress())),
            Cell::from(format!("{} min", route.estimated_duration_minutes)),
            Cell::from(actual),
            Cell::from(distance),
        ])
        .style(Style::default().fg(route_color(route.status)))
    });

    let column_widths = [
        Constraint::Min(22),
        Constraint::Length(11),
        Constraint::Length(6),
        Constraint::Length(6),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
    ];

    let table = Table::new(rows, column_widths)
        .header(
            Row::new(vec!["Name", "Status", "Stops", "Done", "Est.", "Actual", "Length"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    let mut state = TableState::default();
    state.select(Some(app.route_list_index));
    frame.render_stateful_widget(table, area, &mut state);
}

fn draw_route_detail(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let Some(route) = app.current_route() else {
        let paragraph = Paragraph::new("Route no longer available.")
            .block(Block::default().borders(Borders::ALL).title("Stops"));
        frame.render_widget(paragraph, area);
        return;
    };

    let title = format!(
        "Stops of {} · {:?} · {:.0}% done (Esc/←/b to go back)",
        route.name,
        route.status,
        route.progress()
    );

    let rows = route.stops.iter().map(|stop| {
        let visited = stop
            .visited_date
            .map_or_else(String::new, |when| {
                when.with_timezone(&Local).format("%H:%M").to_string()
            });
        let style = match stop.status {
            RouteBinStatus::Pending => Style::default(),
            RouteBinStatus::InProgress => Style::default().fg(Color::Yellow),
            RouteBinStatus::Completed => Style::default().fg(Color::Green),
            RouteBinStatus::Skipped => Style::default().fg(Color::DarkGray),
        };
        Row::new(vec![
            Cell::from(stop.sequence_order.to_string()),
            Cell::from(app.bin_label(&stop.bin_id)),
            Cell::from(format!("{:?}", stop.status)),
            Cell::from(visited),
        ])
        .style(style)
    });

    let column_widths = [
        Constraint::Length(4),
        Constraint::Min(24),
        Constraint::Length(11),
        Constraint::Length(8),
    ];

    let table = Table::new(rows, column_widths)
        .header(
            Row::new(vec!["#", "Bin", "Status", "Visited"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    let mut state = TableState::default();
    state.select(Some(app.stop_list_index));
    frame.render_stateful_widget(table, area, &mut state);
}

fn bin_type_label(bin_type: BinType) -> &'static str {
    match bin_type {
        BinType::Standard => "Standard",
        BinType::Recycling => "Recycling",
        BinType::Bulk => "Bulk",
    }
}

fn status_color(status: BinStatus) -> Color {
    match status {
        BinStatus::Empty => Color::Gray,
        BinStatus::Partial => Color::Cyan,
        BinStatus::Full => Color::Yellow,
        BinStatus::Overdue => Color::Red,
    }
}

fn route_color(status: RouteStatus) -> Color {
    match status {
        RouteStatus::Assigned => Color::Cyan,
        RouteStatus::InProgress => Color::Yellow,
        RouteStatus::Completed => Color::Green,
        RouteStatus::Cancelled => Color::DarkGray,
    }
}

/// Ten-cell bar followed by the percentage.
fn fill_bar(level: i32) -> String {
    let level = level.clamp(0, 100);
    let filled = usize::try_from(level / 10).unwrap_or(0);
    format!("{}{} {level:>3}%", "█".repeat(filled), "░".repeat(10 - filled))
}

fn relative_time(when: Option<DateTime<Utc>>) -> String {
    let Some(when) = when else {
        return "never".to_owned();
    };
    let hours = (Utc::now() - when).num_hours();
    match hours {
        0 => "just now".to_owned(),
        1 => "1 hour ago".to_owned(),
        hours if hours < 48 => format!("{hours} hours ago"),
        hours => format!("{} days ago", hours / 24),
    }
}
