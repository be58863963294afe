use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::db::Database;
use crate::models::{Application, ApplicationStatus, Identity, Page};
use crate::workflow;

struct QueueState {
    applications: Vec<Application>,
    selected: usize,
    scroll_offset: u16,
    message: Option<String>,
}

impl QueueState {
    fn new(applications: Vec<Application>) -> Self {
        Self {
            applications,
            selected: 0,
            scroll_offset: 0,
            message: None,
        }
    }

    fn current(&self) -> Option<&Application> {
        self.applications.get(self.selected)
    }

    fn next(&mut self) {
        if !self.applications.is_empty() && self.selected < self.applications.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    /// Replaces the selected entry with the stored record, or records the failure.
    fn apply(&mut self, outcome: crate::error::Result<Application>) {
        match outcome {
            Ok(updated) => {
                self.message = Some(format!("#{} {}", updated.id, updated.status));
                if let Some(slot) = self.applications.get_mut(self.selected) {
                    *slot = updated;
                }
            }
            Err(e) => self.message = Some(e.to_string()),
        }
    }
}

/// Interactive queue over pending applications; `a` approves, `x` rejects.
pub fn run_queue(db: &Database, caller: Option<&Identity>, page: Page) -> Result<()> {
    let applications = workflow::list_pending(db, caller, page)?;
    if applications.is_empty() {
        println!("No pending applications.");
        return Ok(());
    }

    let mut state = QueueState::new(applications);

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, db, caller);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut QueueState,
    db: &Database,
    caller: Option<&Identity>,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('a') => {
                    if let Some(id) = state.current().map(|a| a.id) {
                        state.apply(workflow::approve(db, caller, id));
                    }
                }
                KeyCode::Char('x') => {
                    if let Some(id) = state.current().map(|a| a.id) {
                        state.apply(workflow::reject(db, caller, id));
                    }
                }
                _ => {}
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

fn status_icon(status: ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::Pending => " ",
        ApplicationStatus::Approved => "+",
        ApplicationStatus::Rejected => "x",
    }
}

fn draw(frame: &mut Frame, state: &QueueState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[0]);

    let items: Vec<ListItem> = state
        .applications
        .iter()
        .map(|app| {
            ListItem::new(format!(
                "{} #{:<4} {} | {}",
                status_icon(app.status),
                app.id,
                truncate(&app.job_title, 28),
                truncate(&app.applicant_name, 18)
            ))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Pending ({}) ",
            state.applications.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    let detail = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Application "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail, chunks[1]);

    let footer = match &state.message {
        Some(msg) => format!(" {}  |  j/k:navigate  a:approve x:reject  q:quit", msg),
        None => " j/k:navigate  J/K:scroll  a:approve x:reject  q:quit".to_string(),
    };
    frame.render_widget(
        Paragraph::new(footer).style(Style::default().fg(Color::DarkGray)),
        rows[1],
    );
}

fn build_detail(state: &QueueState) -> Text<'_> {
    let Some(app) = state.current() else {
        return Text::raw("No application selected");
    };

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(Span::styled(
        &app.job_title,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("Job #{}", app.job_id)));

    let status_style = match app.status {
        ApplicationStatus::Pending => Style::default().fg(Color::Yellow),
        ApplicationStatus::Approved => Style::default().fg(Color::Green),
        ApplicationStatus::Rejected => Style::default().fg(Color::Red),
    };
    lines.push(Line::from(Span::styled(
        format!("Status: {}", app.status),
        status_style,
    )));
    lines.push(Line::from(format!(
        "Applicant: {} <{}>",
        app.applicant_name, app.applicant_email
    )));
    lines.push(Line::from(format!(
        "Applied: {}",
        app.applied_at.format("%Y-%m-%d %H:%M")
    )));
    if let Some(processed) = app.processed_at {
        lines.push(Line::from(format!(
            "Processed: {}",
            processed.format("%Y-%m-%d %H:%M")
        )));
    }
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "Cover Letter",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    for line in textwrap::fill(&app.cover_letter, 70).lines() {
        lines.push(Line::from(format!("  {}", line)));
    }

    Text::from(lines)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use chrono::Utc;

    fn app(id: i64) -> Application {
        Application {
            id,
            job_id: 1,
            job_title: "Backend Engineer".into(),
            applicant_id: "w1".into(),
            applicant_name: "Dana".into(),
            applicant_email: "dana@example.com".into(),
            cover_letter: "Hire me".into(),
            applied_at: Utc::now(),
            status: ApplicationStatus::Pending,
            processed_at: None,
            processed_by: None,
        }
    }

    #[test]
    fn test_navigation_stays_in_bounds() {
        let mut state = QueueState::new(vec![app(1), app(2)]);
        state.prev();
        assert_eq!(state.selected, 0);
        state.next();
        state.next();
        assert_eq!(state.selected, 1);
        state.scroll_down();
        state.prev();
        assert_eq!(state.scroll_offset, 0);
    }

    #[test]
    fn test_apply_updates_selected_entry() {
        let mut state = QueueState::new(vec![app(1), app(2)]);
        state.next();
        let mut approved = app(2);
        approved.status = ApplicationStatus::Approved;
        state.apply(Ok(approved));
        assert_eq!(state.applications[1].status, ApplicationStatus::Approved);
        assert_eq!(state.message.as_deref(), Some("#2 approved"));

        state.apply(Err(WorkflowError::ApplicationNotFound(2)));
        assert_eq!(state.message.as_deref(), Some("Application #2 not found"));
        assert_eq!(state.applications[1].status, ApplicationStatus::Approved);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Ingénieur", 20), "Ingénieur");
        assert_eq!(truncate("Ingénieur Backend", 8), "Ingén...");
    }
}
