use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use netemu::{NetworkState, NetworkStats};

use crate::events::SimEvent;
use crate::scenario::SimStats;

const MAX_LOG_LINES: usize = 200;

pub const LAG_STEP_MS: f64 = 10.0;
pub const DROP_STEP: f64 = 0.05;

#[derive(Debug, Default)]
pub struct TuiState {
    log: VecDeque<String>,
    paused: bool,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        if self.log.len() >= MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line.into());
    }

    pub fn log_event(&mut self, event: &SimEvent) {
        if event.is_noteworthy() {
            self.log(event.to_string());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &SimStats) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Length(stats.clients.len().max(stats.peers.len()) as u16 + 2),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, stats);
    render_status(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_peers(frame, chunks[3], stats);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState, stats: &SimStats) {
    let mut title = format!(
        " Netemu Simulation - {} ",
        format_duration((stats.time_ms / 1000.0) as u64)
    );
    if state.is_paused() {
        title.push_str("[paused] ");
    }

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Clients: {}  |  Peers: {}  |  In flight: {}",
        stats.clients.len(),
        stats.peers.len(),
        stats.in_flight
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, stats: &SimStats) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let total = stats.clients.len().max(1);
    let connected = stats.connected_clients();
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((connected as f64 / total as f64).min(1.0))
        .label(format!("{}/{} connected", connected, stats.clients.len()));

    frame.render_widget(gauge, area);
}

fn traffic_line(label: &str, net: &NetworkStats) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{}: ", label), Style::default().fg(Color::Gray)),
        Span::styled(
            format!(
                "{} sent / {} recv ({} / {}), {} dropped, {} rejected",
                net.packets_sent,
                net.packets_received,
                format_bytes(net.bytes_sent),
                format_bytes(net.bytes_received),
                net.packets_dropped,
                net.packets_rejected
            ),
            Style::default().fg(Color::White),
        ),
    ])
}

fn render_network(frame: &mut Frame, area: Rect, stats: &SimStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let drop_percent = stats.conditions.packet_drop_ratio * 100.0;
    let lines = vec![
        traffic_line("Host", &stats.host),
        traffic_line("Clients", &stats.clients_total),
        Line::from(vec![
            Span::styled("Lag: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.0}ms", stats.conditions.lag_ms),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Packet Drop: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.0}%", drop_percent),
                Style::default().fg(if drop_percent > 5.0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn state_color(state: NetworkState) -> Color {
    match state {
        NetworkState::Connected => Color::Green,
        NetworkState::Connecting => Color::Yellow,
        NetworkState::Discovering => Color::Cyan,
        NetworkState::None => Color::DarkGray,
    }
}

fn render_peers(frame: &mut Frame, area: Rect, stats: &SimStats) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let peers: Vec<Line> = stats
        .peers
        .iter()
        .map(|peer| {
            let style = if peer.postponed {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::White)
            };
            Line::styled(
                format!(
                    "#{:<3} {:<15} silent {:>6.0}ms  unconfirmed {:<3} value {}",
                    peer.id,
                    peer.addr,
                    peer.silent_ms,
                    peer.unconfirmed,
                    format_value(peer.last_value)
                ),
                style,
            )
        })
        .collect();
    let block = Block::default()
        .title(" Host Peers ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    frame.render_widget(Paragraph::new(peers).block(block), columns[0]);

    let clients: Vec<Line> = stats
        .clients
        .iter()
        .map(|client| {
            Line::from(vec![
                Span::raw(format!("client#{:<2} ", client.index)),
                Span::styled(
                    format!("{:<11}", client.state.as_str()),
                    Style::default().fg(state_color(client.state)),
                ),
                Span::raw(format!(
                    " id {:<3} value {} x{:.2}  announced {}",
                    client.client_id,
                    format_value(client.interpolated),
                    client.update_speed,
                    client.announcements
                )),
            ])
        })
        .collect();
    let block = Block::default()
        .title(" Clients ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    frame.render_widget(Paragraph::new(clients).block(block), columns[1]);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.log.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(skip)
        .map(|line| Line::raw(line.as_str()))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new(
        "q/ESC quit  |  space pause  |  up/down packet drop  |  left/right lag",
    )
    .block(block)
    .style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:>7.2}", value),
        None => "      -".to_string(),
    }
}

pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3725), "01:02:05");
    }

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 10 {
            state.log(format!("line {}", i));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().map(String::as_str), Some("line 10"));
    }
}
