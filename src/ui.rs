use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame,
};
use std::time::Instant;

use crate::app::{AppController, PanelOptions};
use crate::player::PlaybackBackend;
use crate::timer::SleepSetting;

const HEADER_HEIGHT: u16 = 5;
const FILTER_HEIGHT: u16 = 3;
const SEEK_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

pub fn render<B: PlaybackBackend>(f: &mut Frame, app: &mut AppController<B>) {
    let show_seek = app.options.show_seek_bar && app.ctx.state.has_duration();

    let mut constraints = vec![
        Constraint::Length(HEADER_HEIGHT),
        Constraint::Length(FILTER_HEIGHT),
        Constraint::Min(8),
    ];
    if show_seek {
        constraints.push(Constraint::Length(SEEK_HEIGHT));
    }
    constraints.push(Constraint::Length(STATUS_HEIGHT));
    constraints.push(Constraint::Length(FOOTER_HEIGHT));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints(constraints)
        .split(f.area());

    render_header(f, chunks[0], app);
    render_filter_bar(f, chunks[1], app);
    render_station_list(f, chunks[2], app);

    let mut next = 3;
    if show_seek {
        render_seek_bar(f, chunks[next], app);
        next += 1;
    }
    render_status(f, chunks[next], app);
    render_footer(f, chunks[next + 1], &app.options);
}

fn render_header<B: PlaybackBackend>(f: &mut Frame, area: Rect, app: &AppController<B>) {
    let state = &app.ctx.state;
    let status = if state.is_playing {
        "PLAYING"
    } else if state.current_station.is_some() {
        "PAUSED"
    } else {
        "STOPPED"
    };

    let station_line = if let Some(station) = &state.current_station {
        Line::from(vec![
            Span::styled("Station: ", Style::default()),
            Span::styled(
                station.name.as_str(),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" • ", Style::default().fg(Color::Gray)),
            Span::styled(station.genre.as_str(), Style::default().fg(Color::Cyan)),
        ])
    } else {
        Line::from(Span::styled(
            "No station selected",
            Style::default().fg(Color::Gray),
        ))
    };

    let track_line = Line::from(vec![
        Span::styled("Now Playing: ", Style::default()),
        Span::styled(
            if state.track_title.is_empty() {
                "—"
            } else {
                state.track_title.as_str()
            },
            Style::default().fg(Color::White),
        ),
    ]);

    let content = vec![
        Line::from(vec![
            Span::styled(
                "RADIODIAL",
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" - terminal radio ", Style::default().fg(Color::Cyan)),
            Span::styled(
                status,
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            timer_span(app),
        ]),
        station_line,
        track_line,
    ];

    let header = Paragraph::new(Text::from(content)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta))
            .title("Now Playing"),
    );

    f.render_widget(header, area);
}

fn timer_span<B: PlaybackBackend>(app: &AppController<B>) -> Span<'static> {
    let setting = app.sleep.setting();
    if setting == SleepSetting::Off {
        return Span::styled("⏾ off", Style::default().fg(Color::DarkGray));
    }

    let text = if app.options.show_countdown {
        match app.sleep.remaining(Instant::now()) {
            Some(left) => format!("⏾ {} ({})", setting.label(), format_time(left.as_secs_f64())),
            None => format!("⏾ {}", setting.label()),
        }
    } else {
        format!("⏾ {}", setting.label())
    };
    Span::styled(text, Style::default().fg(Color::Green))
}

fn render_filter_bar<B: PlaybackBackend>(f: &mut Frame, area: Rect, app: &AppController<B>) {
    let genre = if app.current_genre().is_empty() {
        "All"
    } else {
        app.current_genre()
    };

    let search_display = if app.search_active {
        format!("{}▌", app.search)
    } else if app.search.is_empty() {
        String::from("—")
    } else {
        app.search.clone()
    };

    let line = Line::from(vec![
        Span::styled("Genre: ", Style::default()),
        Span::styled(genre, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled("  │  Search: ", Style::default()),
        Span::styled(
            search_display,
            if app.search_active {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            },
        ),
    ]);

    let bar = Paragraph::new(Text::from(line)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title("Filter"),
    );

    f.render_widget(bar, area);
}

fn render_station_list<B: PlaybackBackend>(f: &mut Frame, area: Rect, app: &mut AppController<B>) {
    let visible = app.visible();

    if visible.is_empty() {
        let message = if app.stations.is_empty() {
            "No stations available"
        } else {
            "No stations match the current filter"
        };
        let empty = Paragraph::new(Span::styled(message, Style::default().fg(Color::Gray)))
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Yellow))
                    .title("Stations"),
            );
        f.render_widget(empty, area);
        return;
    }

    let playing_id = app
        .ctx
        .state
        .current_station
        .as_ref()
        .map(|s| s.id.clone());
    let name_width = (area.width.saturating_sub(6) as usize * 6 / 10).max(15);

    let items: Vec<ListItem> = visible
        .iter()
        .map(|station| {
            let row = format!(
                "{:<width$} │ {}",
                truncate_string(&station.name, name_width),
                station.genre,
                width = name_width
            );
            let item = ListItem::new(row);
            if Some(station.id.as_str()) == playing_id.as_deref() {
                item.style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
            } else {
                item
            }
        })
        .collect();

    let title = format!("Stations ({} shown)", visible.len());
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(title),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(" > ");

    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_seek_bar<B: PlaybackBackend>(f: &mut Frame, area: Rect, app: &AppController<B>) {
    let state = &app.ctx.state;
    let ratio = (state.position_secs / state.duration_secs).clamp(0.0, 1.0);
    let label = format!(
        "{} / {}",
        format_time(state.position_secs),
        format_time(state.duration_secs)
    );

    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Blue))
                .title("Position"),
        )
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(label);

    f.render_widget(gauge, area);
}

fn render_status<B: PlaybackBackend>(f: &mut Frame, area: Rect, app: &AppController<B>) {
    let state = &app.ctx.state;

    let text = if let Some(error) = &state.last_error {
        Span::styled(
            format!("✗ {}", error),
            Style::default().fg(Color::Red),
        )
    } else if state.is_playing && !state.track_title.is_empty() {
        Span::styled(
            format!("♪ {}", state.track_title),
            Style::default().fg(Color::White),
        )
    } else if state.is_playing {
        Span::styled("♪ streaming…", Style::default().fg(Color::White))
    } else {
        Span::styled(
            "Select a station and press ENTER",
            Style::default().fg(Color::Gray),
        )
    };

    let status = Paragraph::new(Text::from(Line::from(text))).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue))
            .title("Status"),
    );

    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect, options: &PanelOptions) {
    let mut spans = vec![
        Span::styled("↑/↓ ", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::styled("Navigate • ", Style::default().fg(Color::White)),
        Span::styled("ENTER ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Span::styled("Play • ", Style::default().fg(Color::White)),
        Span::styled("SPACE ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled("Pause • ", Style::default().fg(Color::White)),
        Span::styled("T ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Span::styled("Sleep • ", Style::default().fg(Color::White)),
        Span::styled("/ ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
        Span::styled("Search • ", Style::default().fg(Color::White)),
        Span::styled("G ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
        Span::styled("Genre • ", Style::default().fg(Color::White)),
    ];
    if options.show_download {
        spans.push(Span::styled(
            "D ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled("Save • ", Style::default().fg(Color::White)));
    }
    spans.push(Span::styled(
        "Q ",
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("Quit", Style::default().fg(Color::White)));
    let controls_text = vec![Line::from(spans)];

    let controls = Paragraph::new(Text::from(controls_text))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray))
                .title("Controls"),
        );

    f.render_widget(controls, area);
}

/// Format seconds as `m:ss`.
fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    // Char-aware truncation to avoid breaking UTF-8 boundaries
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut result: String = s.chars().take(max_len.saturating_sub(1)).collect();
    result.push('…');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_time_pads_seconds() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(9.4), "0:09");
        assert_eq!(format_time(65.0), "1:05");
        assert_eq!(format_time(1800.0), "30:00");
        assert_eq!(format_time(-3.0), "0:00");
    }

    #[test]
    fn truncate_keeps_short_strings_intact() {
        assert_eq!(truncate_string("Jazz FM", 15), "Jazz FM");
        assert_eq!(truncate_string("A Very Long Station Name", 10), "A Very Lo…");
    }
}
