use crate::history::{InterfaceHistory, NetworkHistory};
use crate::keybindings::{KeyCategory, get_all_keybindings, get_status_bar_keybindings};
use crate::process::{BYTES_PER_MB, ProcessRow, SortMethod, sort_rows};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Sparkline, Table, TableState},
};

pub struct AppState {
    pub rows: Vec<ProcessRow>,
    pub selected_index: Option<usize>,
    pub table_state: TableState,
    pub sort: SortMethod,
    pub show_all: bool,
    pub show_help: bool,
    /// Set by the first `d` of `dd`
    pub pending_kill: bool,
    pub status_message: String,
    pub network_status: String,
    pub net: NetworkHistory,
}

impl AppState {
    pub fn new(sort: SortMethod, show_all: bool) -> Self {
        Self {
            rows: Vec::new(),
            selected_index: None,
            table_state: TableState::default(),
            sort,
            show_all,
            show_help: false,
            pending_kill: false,
            status_message: String::from("stortop started. Press 'h' for help."),
            network_status: String::new(),
            net: NetworkHistory::new(),
        }
    }

    /// Replace the table contents, keeping the selection on the same pid if
    /// it's still listed
    pub fn update_rows(&mut self, mut rows: Vec<ProcessRow>) {
        sort_rows(&mut rows, self.sort);

        let selected_pid = self.selected_row().map(|row| row.pid);
        self.rows = rows;

        let index = match selected_pid {
            Some(pid) => self
                .rows
                .iter()
                .position(|row| row.pid == pid)
                .or(self.selected_index),
            None => self.selected_index,
        };
        self.select(index);
    }

    pub fn set_sort(&mut self, sort: SortMethod) {
        self.sort = sort;
        let rows = std::mem::take(&mut self.rows);
        self.update_rows(rows);
        self.status_message = format!("Sorted by {}", sort.label());
    }

    fn select(&mut self, index: Option<usize>) {
        let index = match index {
            Some(_) if self.rows.is_empty() => None,
            Some(i) => Some(i.min(self.rows.len() - 1)),
            None => None,
        };
        self.selected_index = index;
        self.table_state.select(index);
    }

    pub fn select_next(&mut self) {
        if self.rows.is_empty() {
            return;
        }

        let new_index = match self.selected_index {
            None => 0,
            Some(idx) => (idx + 1) % self.rows.len(),
        };
        self.select(Some(new_index));
    }

    pub fn select_previous(&mut self) {
        if self.rows.is_empty() {
            return;
        }

        let new_index = match self.selected_index {
            None | Some(0) => self.rows.len() - 1,
            Some(idx) => idx - 1,
        };
        self.select(Some(new_index));
    }

    pub fn select_first(&mut self) {
        if !self.rows.is_empty() {
            self.select(Some(0));
        }
    }

    pub fn select_last(&mut self) {
        if !self.rows.is_empty() {
            self.select(Some(self.rows.len() - 1));
        }
    }

    pub fn selected_row(&self) -> Option<&ProcessRow> {
        self.selected_index.and_then(|idx| self.rows.get(idx))
    }
}

pub fn draw_ui(f: &mut Frame, app: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Min(10),    // Process table
            Constraint::Length(8),  // Network panel
            Constraint::Length(3),  // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);
    draw_process_table(f, chunks[1], app);
    draw_network_panel(f, chunks[2], app);
    draw_status_bar(f, chunks[3], app);

    if app.show_help {
        draw_help_overlay(f, f.area());
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &AppState) {
    let scope = if app.show_all { "all processes" } else { "tracked processes" };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!("stortop v{}", env!("CARGO_PKG_VERSION")),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "  |  {} {}  |  sort: {}  |  {}",
            app.rows.len(),
            scope,
            app.sort.label(),
            app.network_status
        )),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_process_table(f: &mut Frame, area: Rect, app: &mut AppState) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let header = Row::new(
        [
            "PID", "Command", "CPU%", "MEM%", "Net In", "Net Out", "Disk W", "Disk R",
        ]
        .into_iter()
        .map(|title| Cell::from(title).style(bold)),
    );

    let rows = app.rows.iter().map(|row| {
        Row::new(vec![
            Cell::from(row.pid.to_string()),
            Cell::from(row.command.clone()),
            Cell::from(format!("{:.1}", row.cpu_percent)),
            Cell::from(format!("{:.1}", row.mem_percent)),
            Cell::from(ProcessRow::format_rate(row.net_in_mbps)).style(Style::default().fg(Color::Green)),
            Cell::from(ProcessRow::format_rate(row.net_out_mbps)).style(Style::default().fg(Color::Yellow)),
            Cell::from(ProcessRow::format_disk_rate(row.disk_write_mbps)),
            Cell::from(ProcessRow::format_disk_rate(row.disk_read_mbps)),
        ])
    });

    let widths = [
        Constraint::Length(8),
        Constraint::Min(16),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Processes (MB/s)"),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

/// Sparkline titles `(in, out)`: current, average and peak MB/s plus the
/// time of the newest sample
fn network_titles(history: &InterfaceHistory) -> (String, String) {
    let (rx_rate, tx_rate) = history.latest();
    let updated = history
        .updated_at()
        .map(|t| format!(" @ {}", t.format("%H:%M:%S")))
        .unwrap_or_default();
    let mb = |bytes: u64| bytes as f64 / BYTES_PER_MB;

    (
        format!(
            "{} in {:.3} MB/s (avg {:.3}, max {:.3}){}",
            history.name,
            mb(rx_rate),
            mb(history.avg_rx_rate()),
            mb(history.max_rx_rate()),
            updated
        ),
        format!(
            "{} out {:.3} MB/s (avg {:.3}, max {:.3}){}",
            history.name,
            mb(tx_rate),
            mb(history.avg_tx_rate()),
            mb(history.max_tx_rate()),
            updated
        ),
    )
}

fn draw_network_panel(f: &mut Frame, area: Rect, app: &AppState) {
    let history = app.net.selected();
    let (rx_series, tx_series) = history.series();
    let (rx_title, tx_title) = network_titles(history);

    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let rx = Sparkline::default()
        .block(Block::default().borders(Borders::ALL).title(rx_title))
        .data(&rx_series)
        .style(Style::default().fg(Color::Green));

    let tx = Sparkline::default()
        .block(Block::default().borders(Borders::ALL).title(tx_title))
        .data(&tx_series)
        .style(Style::default().fg(Color::Yellow));

    f.render_widget(rx, halves[0]);
    f.render_widget(tx, halves[1]);
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &AppState) {
    // Built from the same table as the help overlay
    let mut spans = vec![];

    for (i, (key, description)) in get_status_bar_keybindings().iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::styled(
            format!("[{}]", key),
            Style::default().fg(Color::Yellow),
        ));
        spans.push(Span::raw(format!(" {}", description)));
    }

    spans.push(Span::raw("  |  "));
    let message = if app.pending_kill {
        "Press d again to kill the selected process"
    } else {
        app.status_message.as_str()
    };
    spans.push(Span::styled(message, Style::default().fg(Color::Gray)));

    let status =
        Paragraph::new(vec![Line::from(spans)]).block(Block::default().borders(Borders::ALL));

    f.render_widget(status, area);
}

fn draw_help_overlay(f: &mut Frame, area: Rect) {
    let mut help_text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "stortop - Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];

    let bindings = get_all_keybindings();
    for category in [
        KeyCategory::Navigation,
        KeyCategory::Actions,
        KeyCategory::System,
    ] {
        help_text.push(Line::from(""));
        help_text.push(Line::from(Span::styled(
            category.title(),
            Style::default().fg(Color::Yellow),
        )));
        for binding in bindings.iter().filter(|b| b.category == category) {
            help_text.push(Line::from(format!(
                "  {:14} - {}",
                binding.key, binding.description
            )));
        }
    }

    help_text.push(Line::from(""));
    help_text.push(Line::from("Press any key to close..."));

    let help = Paragraph::new(help_text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .style(Style::default().fg(Color::Cyan)),
        );

    let help_area = centered_rect(60, 70, area);
    f.render_widget(Clear, help_area);
    f.render_widget(help, help_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
