// 🖥️ Terminal reviewer - one screen per step, operator decides when to go on

use crate::clustering::StepReport;
use crate::report::StepSink;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io::{self, Stdout};

const PAGE_SIZE: usize = 10;

/// What the reviewer is looking at for the current step
pub struct ReviewState {
    pub report: StepReport,
    pub total_steps: usize,
    pub merges_so_far: usize,
    pub state: TableState,
}

impl ReviewState {
    pub fn new(report: StepReport, total_steps: usize, merges_so_far: usize) -> Self {
        let mut state = TableState::default();
        if !report.merges.is_empty() {
            state.select(Some(0));
        }

        Self {
            report,
            total_steps,
            merges_so_far,
            state,
        }
    }

    pub fn next(&mut self) {
        let len = self.report.merges.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            Some(_) => 0,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.report.merges.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.report.merges.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().unwrap_or(0);
        self.state.select(Some((i + PAGE_SIZE).min(len - 1)));
    }

    pub fn page_up(&mut self) {
        if self.report.merges.is_empty() {
            return;
        }
        let i = self.state.selected().unwrap_or(0);
        self.state.select(Some(i.saturating_sub(PAGE_SIZE)));
    }
}

/// Step sink that shows each report full-screen and waits for the operator
pub struct TuiReviewer {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    total_steps: usize,
    merges_so_far: usize,
}

impl TuiReviewer {
    pub fn new(total_steps: usize) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            total_steps,
            merges_so_far: 0,
        })
    }

    fn restore(&mut self) -> io::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()
    }
}

impl Drop for TuiReviewer {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

impl StepSink for TuiReviewer {
    fn on_step(&mut self, report: &StepReport) -> io::Result<()> {
        self.merges_so_far += report.merge_count;
        let mut view = ReviewState::new(report.clone(), self.total_steps, self.merges_so_far);

        loop {
            self.terminal.draw(|f| ui(f, &mut view))?;

            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        return Err(io::Error::new(io::ErrorKind::Interrupted, "review stopped"));
                    }
                    KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Char('n') => return Ok(()),
                    KeyCode::Down | KeyCode::Char('j') => view.next(),
                    KeyCode::Up | KeyCode::Char('k') => view.previous(),
                    KeyCode::PageDown => view.page_down(),
                    KeyCode::PageUp => view.page_up(),
                    _ => {}
                }
            }
        }
    }
}

fn ui(f: &mut Frame, view: &mut ReviewState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Step header
            Constraint::Min(0),    // Merges
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], view);
    if view.report.merges.is_empty() {
        render_no_changes(f, chunks[1]);
    } else {
        render_merges(f, chunks[1], view);
    }
    render_status_bar(f, chunks[2], view);
}

fn render_header(f: &mut Frame, area: Rect, view: &ReviewState) {
    let spans = vec![
        Span::styled(
            format!("Pass {}/{}", view.report.step + 1, view.total_steps),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(view.report.description.clone(), Style::default().fg(Color::White)),
        Span::raw("  |  "),
        Span::styled(
            format!("{} changes", view.report.merge_count),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Total: {}", view.merges_so_far),
            Style::default().fg(Color::Cyan),
        ),
    ];

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_no_changes(f: &mut Frame, area: Rect) {
    let body = Paragraph::new("[No changes]")
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL).title(" Merges "));

    f.render_widget(body, area);
}

fn render_merges(f: &mut Frame, area: Rect, view: &mut ReviewState) {
    let header_cells = ["Key", "Canonical", "Names"].iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = view.report.merges.iter().map(|merge| {
        let members: Vec<String> = merge.provenance.iter().map(|p| p.to_string()).collect();
        Row::new(vec![
            Cell::from(truncate(&merge.key, 24)),
            Cell::from(truncate(&merge.canonical_name, 28)).style(Style::default().fg(Color::Green)),
            Cell::from(members.join(", ")),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(26),
            Constraint::Length(30),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Merges "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut view.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, view: &ReviewState) {
    let selected = view.state.selected().map(|i| i + 1).unwrap_or(0);

    let spans = vec![
        Span::styled(
            format!(" Row: {}/{} ", selected, view.report.merges.len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(" Next pass | "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" Fast | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Stop review"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
