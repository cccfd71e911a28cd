use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;

use receipt_tracker::{summarize, Sector, Transaction, TransactionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Ledger,
    Sectors,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Ledger => Page::Sectors,
            Page::Sectors => Page::Ledger,
        }
    }
}

pub struct App {
    pub email: String,
    pub transactions: Vec<Transaction>,
    pub filtered_transactions: Vec<Transaction>,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    /// None shows every sector
    pub sector_filter: Option<Sector>,
}

impl App {
    pub fn new(email: &str, transactions: Vec<Transaction>) -> Self {
        let mut state = TableState::default();
        if !transactions.is_empty() {
            state.select(Some(0));
        }

        let filtered_transactions = transactions.clone();

        Self {
            email: email.to_string(),
            transactions,
            filtered_transactions,
            state,
            current_page: Page::Ledger,
            show_detail: false,
            sector_filter: None,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_transaction(&self) -> Option<&Transaction> {
        self.state.selected().and_then(|i| self.filtered_transactions.get(i))
    }

    /// All → first sector → ... → last sector → All
    pub fn cycle_sector(&mut self) {
        let next = match self.sector_filter {
            None => Some(Sector::ALL[0]),
            Some(current) => Sector::ALL
                .iter()
                .position(|s| *s == current)
                .and_then(|i| Sector::ALL.get(i + 1))
                .copied(),
        };
        self.apply_filter(next);
    }

    pub fn apply_filter(&mut self, sector: Option<Sector>) {
        self.sector_filter = sector;
        self.filtered_transactions = match sector {
            None => self.transactions.clone(),
            Some(sector) => self
                .transactions
                .iter()
                .filter(|tx| tx.sector == sector)
                .cloned()
                .collect(),
        };

        let selected = if self.filtered_transactions.is_empty() { None } else { Some(0) };
        self.state.select(selected);
    }

    pub fn clear_filter(&mut self) {
        self.apply_filter(None);
    }

    pub fn next(&mut self) {
        let len = self.filtered_transactions.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.filtered_transactions.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    /// (short label, total in thousandths) for every sector with spending
    pub fn sector_bars(&self) -> Vec<(&'static str, u64)> {
        summarize(&self.filtered_transactions)
            .by_sector
            .iter()
            .map(|s| (s.sector.short_label(), (s.total * 1000.0).round() as u64))
            .collect()
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => app.current_page = app.current_page.next(),
                KeyCode::Char('s') => app.cycle_sector(),
                KeyCode::Char('c') => app.clear_filter(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::Home if !app.filtered_transactions.is_empty() => app.state.select(Some(0)),
                KeyCode::End if !app.filtered_transactions.is_empty() => {
                    app.state.select(Some(app.filtered_transactions.len() - 1))
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Ledger if app.show_detail => {
            let content = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);

            render_table(f, content[0], app);
            render_detail_panel(f, content[1], app);
        }
        Page::Ledger => render_table(f, chunks[1], app),
        Page::Sectors => render_sector_chart(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let tab = |page: Page, name: &'static str| {
        let style = if page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Span::styled(name, style)
    };

    let summary = summarize(&app.filtered_transactions);
    let totals = summary
        .totals_by_currency
        .iter()
        .map(|(currency, total)| format!("{:.3} {}", total, currency))
        .collect::<Vec<_>>()
        .join(" · ");

    let spans = vec![
        Span::styled("🧾 ", Style::default()),
        tab(Page::Ledger, "Ledger"),
        Span::raw(" │ "),
        tab(Page::Sectors, "Sectors"),
        Span::raw("  |  "),
        Span::styled(app.email.clone(), Style::default().fg(Color::White)),
        Span::raw("  |  "),
        Span::styled(
            format!("{} transactions", summary.transaction_count),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw("  "),
        Span::styled(totals, Style::default().fg(Color::Green)),
    ];

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn type_color(kind: TransactionType) -> Color {
    match kind {
        TransactionType::Receipt => Color::White,
        TransactionType::Sms => Color::Cyan,
        TransactionType::Manual => Color::Magenta,
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Date", "Vendor", "Total", "Sector", "Type"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let header = Row::new(header_cells).style(Style::default().bg(Color::DarkGray)).height(1);

    let rows = app.filtered_transactions.iter().map(|tx| {
        let sector_style = if tx.uncertain_category {
            Style::default().fg(Color::LightYellow)
        } else {
            Style::default()
        };

        Row::new(vec![
            Cell::from(tx.date.format("%Y-%m-%d").to_string()),
            Cell::from(truncate(&tx.vendor, 30)),
            Cell::from(format!("{:.3} {}", tx.total, tx.currency)),
            Cell::from(truncate(tx.sector.as_str(), 26)).style(sector_style),
            Cell::from(tx.transaction_type.as_str()).style(Style::default().fg(type_color(tx.transaction_type))),
        ])
        .height(1)
    });

    let title = match app.sector_filter {
        Some(sector) => format!(" Transactions: {} ", sector),
        None => " Transactions ".to_string(),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(32),
            Constraint::Length(14),
            Constraint::Length(28),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_sector_chart(f: &mut Frame, area: Rect, app: &App) {
    let bars = app.sector_bars();

    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Spending by sector (thousandths) "),
        )
        .data(bars.as_slice())
        .bar_width(9)
        .bar_gap(2)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan));

    f.render_widget(chart, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let Some(tx) = app.selected_transaction() else {
        let empty = Paragraph::new("No transaction selected")
            .block(Block::default().borders(Borders::ALL).title(" Details "));
        f.render_widget(empty, area);
        return;
    };

    let label = Style::default().fg(Color::Yellow);
    let mut lines = vec![
        Line::from(vec![Span::styled("Vendor:   ", label), Span::raw(tx.vendor.clone())]),
        Line::from(vec![
            Span::styled("Date:     ", label),
            Span::raw(tx.date.format("%Y-%m-%d").to_string()),
        ]),
        Line::from(vec![
            Span::styled("Total:    ", label),
            Span::raw(format!("{:.3} {}", tx.total, tx.currency)),
        ]),
        Line::from(vec![Span::styled("Sector:   ", label), Span::raw(tx.sector.as_str())]),
        Line::from(vec![
            Span::styled("Source:   ", label),
            Span::raw(tx.transaction_type.as_str()),
        ]),
    ];

    if tx.uncertain_category {
        lines.push(Line::from(Span::styled(
            "⚠ category uncertain",
            Style::default().fg(Color::LightYellow),
        )));
    }

    if !tx.items.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("Items", label)));
        for item in &tx.items {
            let price = item.price.map(|p| format!("{:.3}", p)).unwrap_or_default();
            lines.push(Line::from(format!("  {} {}", truncate(&item.name, 28), price)));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("ID: {}", tx.id),
        Style::default().fg(Color::DarkGray),
    )));

    let detail = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Details "))
        .wrap(Wrap { trim: true });

    f.render_widget(detail, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.filtered_transactions.len();
    let key = Style::default().fg(Color::Yellow);

    let mut spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    if let Some(sector) = app.sector_filter {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            format!("Sector: {}", sector.short_label()),
            Style::default().fg(Color::Green),
        ));
    }

    spans.push(Span::raw(" | "));
    for (k, action) in [("s", " Sector | "), ("c", " Clear | "), ("Enter", " Details | "), ("Tab", " Page | ")] {
        spans.push(Span::styled(k, key));
        spans.push(Span::raw(action));
    }
    spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::White)));

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use receipt_tracker::NewTransaction;

    fn tx(vendor: &str, total: f64, sector: Sector) -> Transaction {
        NewTransaction {
            vendor_id: None,
            vendor: vendor.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            total,
            currency: "BHD".to_string(),
            sector,
            uncertain_category: false,
            transaction_type: TransactionType::Manual,
            items: vec![],
        }
        .into_transaction("user-1", None)
    }

    fn app() -> App {
        App::new(
            "sara@example.com",
            vec![
                tx("LuLu", 12.5, Sector::Groceries),
                tx("Costa", 1.9, Sector::Dining),
                tx("Carrefour", 3.0, Sector::Groceries),
            ],
        )
    }

    #[test]
    fn test_cycle_sector_filter() {
        let mut app = app();

        app.cycle_sector();
        assert_eq!(app.sector_filter, Some(Sector::Groceries));
        assert_eq!(app.filtered_transactions.len(), 2);

        app.cycle_sector();
        assert_eq!(app.sector_filter, Some(Sector::Dining));
        assert_eq!(app.filtered_transactions.len(), 1);

        for _ in 2..Sector::ALL.len() {
            app.cycle_sector();
        }
        assert_eq!(app.sector_filter, Some(Sector::Miscellaneous));
        assert!(app.filtered_transactions.is_empty());
        assert_eq!(app.state.selected(), None);

        app.cycle_sector();
        assert_eq!(app.sector_filter, None);
        assert_eq!(app.filtered_transactions.len(), 3);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app();
        app.previous();
        assert_eq!(app.state.selected(), Some(2));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
        assert_eq!(app.selected_transaction().unwrap().vendor, "LuLu");
    }

    #[test]
    fn test_sector_bars() {
        let app = app();
        assert_eq!(app.sector_bars(), vec![("Grocery", 15500), ("Dining", 1900)]);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Dining & Cafés", 40), "Dining & Cafés");
        assert_eq!(truncate("Café Café Café", 8), "Café ...");
    }
}
