use crate::app::App;
use crate::board::{parse_break_minutes, CompletedPatch};
use crate::models::TimeBlock;
use crate::notify::Banner;
use crate::timer::TimerState;
use crate::uploads::UploadStore;
use crate::utils::{format_clock, format_total};
use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{
        self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::path::Path;
use std::time::Duration as StdDuration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Waiting,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Normal,
    TimerDescription(String),
    CompletedDescription { id: String, buffer: String },
    AttachImage { id: String, buffer: String },
    BreakTime(String),
    ConfirmReset,
}

pub struct Ui {
    pub mode: Mode,
    pub lane: Lane,
    pub waiting: ListState,
    pub completed: ListState,
}

impl Default for Ui {
    fn default() -> Self {
        let mut waiting = ListState::default();
        waiting.select(Some(0));
        Self {
            mode: Mode::Normal,
            lane: Lane::Waiting,
            waiting,
            completed: ListState::default(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub fn run_tui(
    app: &mut App,
    uploads: &UploadStore,
    banner: &Banner,
    tick: StdDuration,
) -> Result<()> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_loop(&mut terminal, app, uploads, banner, tick);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    res
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    uploads: &UploadStore,
    banner: &Banner,
    tick: StdDuration,
) -> Result<()> {
    let mut ui = Ui::default();

    loop {
        terminal.draw(|f| draw(f, app, &mut ui, banner))?;

        if event::poll(tick)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if handle_key(key, app, &mut ui, uploads, banner)? == Flow::Quit {
                        return Ok(());
                    }
                }
                Event::FocusGained => {
                    app.set_visible(true)?;
                }
                Event::FocusLost => {
                    app.set_visible(false)?;
                }
                _ => {}
            }
        }

        app.tick()?;
    }
}

fn handle_key(
    key: KeyEvent,
    app: &mut App,
    ui: &mut Ui,
    uploads: &UploadStore,
    banner: &Banner,
) -> Result<Flow> {
    let mode = std::mem::replace(&mut ui.mode, Mode::Normal);
    ui.mode = match mode {
        Mode::Normal => return handle_normal_key(key.code, app, ui, banner),
        Mode::ConfirmReset => {
            if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                app.reset()?;
                ui.waiting.select(Some(0));
                ui.completed.select(None);
            }
            Mode::Normal
        }
        Mode::TimerDescription(buffer) => match edit(key.code, buffer) {
            Edit::Pending(buffer) => Mode::TimerDescription(buffer),
            Edit::Submit(text) => {
                app.set_description(&text)?;
                Mode::Normal
            }
            Edit::Cancel => Mode::Normal,
        },
        Mode::CompletedDescription { id, buffer } => match edit(key.code, buffer) {
            Edit::Pending(buffer) => Mode::CompletedDescription { id, buffer },
            Edit::Submit(text) => {
                let patch = CompletedPatch {
                    description: Some(text),
                    ..CompletedPatch::default()
                };
                app.board_mut().update_completed_block(&id, patch)?;
                Mode::Normal
            }
            Edit::Cancel => Mode::Normal,
        },
        Mode::AttachImage { id, buffer } => match edit(key.code, buffer) {
            Edit::Pending(buffer) => Mode::AttachImage { id, buffer },
            Edit::Submit(path) => {
                attach_image(app, uploads, banner, &id, path.trim())?;
                Mode::Normal
            }
            Edit::Cancel => Mode::Normal,
        },
        Mode::BreakTime(buffer) => match edit(key.code, buffer) {
            Edit::Pending(buffer) => Mode::BreakTime(buffer),
            Edit::Submit(text) => {
                match parse_break_minutes(&text) {
                    Some(minutes) => app.board_mut().set_break_time(minutes as i64)?,
                    None => banner.show("Break time", "Not a number; keeping the previous value"),
                }
                Mode::Normal
            }
            Edit::Cancel => Mode::Normal,
        },
    };
    Ok(Flow::Continue)
}

fn handle_normal_key(code: KeyCode, app: &mut App, ui: &mut Ui, banner: &Banner) -> Result<Flow> {
    match code {
        KeyCode::Char('q') => return Ok(Flow::Quit),
        KeyCode::Esc => banner.dismiss(),
        KeyCode::Tab => {
            ui.lane = match ui.lane {
                Lane::Waiting => Lane::Completed,
                Lane::Completed => Lane::Waiting,
            };
            if ui.lane == Lane::Completed && ui.completed.selected().is_none() {
                ui.completed.select(Some(0));
            }
        }
        KeyCode::Up | KeyCode::Char('k') => move_selection(app, ui, -1),
        KeyCode::Down | KeyCode::Char('j') => move_selection(app, ui, 1),
        KeyCode::Enter | KeyCode::Char('s') if ui.lane == Lane::Waiting => {
            let selected = ui
                .waiting
                .selected()
                .and_then(|i| app.board().waiting().get(i))
                .map(|b| b.id.clone());
            if let Some(id) = selected {
                app.start_block(&id)?;
                clamp_selection(&mut ui.waiting, app.board().waiting().len());
            }
        }
        KeyCode::Char(' ') | KeyCode::Char('p') => {
            app.toggle_pause()?;
        }
        KeyCode::Char('d') => {
            ui.mode = match (ui.lane, selected_completed(app, ui)) {
                (Lane::Completed, Some(block)) => Mode::CompletedDescription {
                    id: block.id.clone(),
                    buffer: block.description.clone().unwrap_or_default(),
                },
                _ => match app.timer() {
                    Some(timer) => Mode::TimerDescription(timer.description().to_string()),
                    None => Mode::Normal,
                },
            };
        }
        KeyCode::Char('i') if ui.lane == Lane::Completed => {
            if let Some(block) = selected_completed(app, ui) {
                ui.mode = Mode::AttachImage {
                    id: block.id.clone(),
                    buffer: String::new(),
                };
            }
        }
        KeyCode::Char('x') if ui.lane == Lane::Completed => {
            if let Some(id) = selected_completed(app, ui).map(|b| b.id.clone()) {
                app.board_mut().remove_completed_image(&id)?;
            }
        }
        KeyCode::Char('5') => {
            app.board_mut().consume_break_time(5)?;
        }
        KeyCode::Char('0') => {
            app.board_mut().consume_break_time(10)?;
        }
        KeyCode::Char('a') => {
            let all = app.board().break_time_minutes();
            app.board_mut().consume_break_time(all)?;
        }
        KeyCode::Char('e') => {
            ui.mode = Mode::BreakTime(app.board().break_time_minutes().to_string());
        }
        KeyCode::Char('r') => ui.mode = Mode::ConfirmReset,
        _ => {}
    }
    Ok(Flow::Continue)
}

enum Edit {
    Pending(String),
    Submit(String),
    Cancel,
}

fn edit(code: KeyCode, mut buffer: String) -> Edit {
    match code {
        KeyCode::Enter => Edit::Submit(buffer),
        KeyCode::Esc => Edit::Cancel,
        KeyCode::Backspace => {
            buffer.pop();
            Edit::Pending(buffer)
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            Edit::Pending(buffer)
        }
        _ => Edit::Pending(buffer),
    }
}

/// Upload failures are reported and leave the block untouched.
fn attach_image(
    app: &mut App,
    uploads: &UploadStore,
    banner: &Banner,
    id: &str,
    source: &str,
) -> Result<()> {
    if source.is_empty() {
        return Ok(());
    }
    match uploads.save_from_path(Path::new(source)) {
        Ok(path) => {
            let patch = CompletedPatch {
                image_path: Some(path),
                ..CompletedPatch::default()
            };
            app.board_mut().update_completed_block(id, patch)?;
        }
        Err(e) => {
            warn!("Failed to attach {} to {}: {}", source, id, e);
            banner.show("Upload failed", &e.to_string());
        }
    }
    Ok(())
}

fn selected_completed<'a>(app: &'a App, ui: &Ui) -> Option<&'a TimeBlock> {
    ui.completed
        .selected()
        .and_then(|i| app.board().completed().get(i))
}

fn move_selection(app: &App, ui: &mut Ui, delta: i64) {
    let (state, len) = match ui.lane {
        Lane::Waiting => (&mut ui.waiting, app.board().waiting().len()),
        Lane::Completed => (&mut ui.completed, app.board().completed().len()),
    };
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as i64;
    let next = (current + delta).clamp(0, len as i64 - 1);
    state.select(Some(next as usize));
}

fn clamp_selection(state: &mut ListState, len: usize) {
    match state.selected() {
        _ if len == 0 => state.select(None),
        Some(i) if i >= len => state.select(Some(len - 1)),
        None => state.select(Some(0)),
        _ => {}
    }
}

pub fn draw(frame: &mut Frame, app: &App, ui: &mut Ui, banner: &Banner) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Lanes
            Constraint::Length(3), // Footer
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);

    let lanes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(chunks[1]);

    clamp_selection(&mut ui.waiting, app.board().waiting().len());
    clamp_selection(&mut ui.completed, app.board().completed().len());

    draw_waiting(frame, lanes[0], app, ui);
    draw_in_progress(frame, lanes[1], app);
    draw_completed(frame, lanes[2], app, ui);
    draw_footer(frame, chunks[2], ui);

    if let Some(msg) = banner.current() {
        draw_banner(frame, &msg.title, &msg.message);
    }
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let status = match app.timer().map(|t| t.state()) {
        Some(TimerState::Running) => Span::styled(
            "RUNNING",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Some(TimerState::Paused { .. }) => Span::styled(
            "PAUSED",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        _ => Span::styled(
            "IDLE",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
    };

    let header = Line::from(vec![
        Span::styled(
            " tiblo ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        status,
        Span::raw(" | Break: "),
        Span::styled(
            format!("{} min", app.board().break_time_minutes()),
            Style::default().fg(Color::Blue),
        ),
        Span::raw(" | "),
        Span::raw(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
    ]);

    frame.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn lane_block(title: &str, active: bool) -> Block<'_> {
    let style = if active {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    Block::default()
        .title(Span::styled(
            title,
            Style::default().add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(style)
}

fn draw_waiting(frame: &mut Frame, area: Rect, app: &App, ui: &mut Ui) {
    let items: Vec<ListItem> = app
        .board()
        .waiting()
        .iter()
        .map(|b| ListItem::new(format!("{:<10} {}", b.id, format_clock(b.remaining_time))))
        .collect();

    let list = List::new(items)
        .block(lane_block(" Waiting List ", ui.lane == Lane::Waiting))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    frame.render_stateful_widget(list, area, &mut ui.waiting);
}

fn draw_in_progress(frame: &mut Frame, area: Rect, app: &App) {
    let block = lane_block(" In Progress ", false);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(timer) = app.timer() else {
        frame.render_widget(
            Paragraph::new("Select a waiting block and press Enter to start")
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            inner,
        );
        return;
    };

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);

    let color = if timer.is_running() {
        Color::Yellow
    } else {
        Color::DarkGray
    };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::raw(format!("{}  ", timer.block_id())),
            Span::styled(
                format_clock(timer.remaining_secs()),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
        ]))
        .alignment(Alignment::Center),
        rows[0],
    );
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(color))
            .ratio(timer.progress())
            .label(""),
        rows[1],
    );

    let description = if timer.description().is_empty() {
        Paragraph::new("Add a description for this task... (d)")
            .style(Style::default().fg(Color::DarkGray))
    } else {
        Paragraph::new(timer.description().to_string())
    };
    frame.render_widget(description.wrap(Wrap { trim: false }), rows[3]);
}

fn draw_completed(frame: &mut Frame, area: Rect, app: &App, ui: &mut Ui) {
    let block = lane_block(" Completed ", ui.lane == Lane::Completed);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(0)])
        .split(inner);

    let board = app.board();
    let mut summary = vec![Line::from(vec![
        Span::styled("Break Time: ", Style::default().fg(Color::Blue)),
        Span::styled(
            format!("{} minutes", board.break_time_minutes()),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ])];
    if !board.completed().is_empty() {
        summary.push(Line::styled(
            format!("Total: {}", format_total(board.total_completed_secs())),
            Style::default().fg(Color::Green),
        ));
    }
    frame.render_widget(Paragraph::new(summary), rows[0]);

    if board.completed().is_empty() {
        frame.render_widget(
            Paragraph::new("No completed tasks yet").style(Style::default().fg(Color::DarkGray)),
            rows[1],
        );
        return;
    }

    let items: Vec<ListItem> = board
        .completed()
        .iter()
        .map(|b| {
            let mut spans = vec![Span::styled(
                format!("{:<10} {}", b.id, format_clock(b.remaining_time)),
                Style::default().fg(Color::Green),
            )];
            if let Some(description) = b.description.as_deref().filter(|d| !d.is_empty()) {
                spans.push(Span::raw(format!("  {}", description)));
            }
            if b.image_path.is_some() {
                spans.push(Span::styled(" [img]", Style::default().fg(Color::Magenta)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items).highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    frame.render_stateful_widget(list, rows[1], &mut ui.completed);
}

fn draw_footer(frame: &mut Frame, area: Rect, ui: &Ui) {
    let (title, text) = match &ui.mode {
        Mode::Normal => (
            "",
            "q quit | Tab lane | Enter start | Space pause | d describe | i/x image | 5/0/a break | e edit break | r reset".to_string(),
        ),
        Mode::TimerDescription(buffer) => (" Description (Enter save, Esc cancel) ", buffer.clone()),
        Mode::CompletedDescription { id, buffer } => {
            (" Edit completed block ", format!("{}: {}", id, buffer))
        }
        Mode::AttachImage { buffer, .. } => (" Image file path ", buffer.clone()),
        Mode::BreakTime(buffer) => (" Break minutes ", buffer.clone()),
        Mode::ConfirmReset => (
            " Reset ",
            "Delete all blocks, break time and uploaded images? (y/N)".to_string(),
        ),
    };

    let footer = Paragraph::new(text)
        .block(Block::default().title(title).borders(Borders::ALL))
        .alignment(if ui.mode == Mode::Normal {
            Alignment::Center
        } else {
            Alignment::Left
        });
    frame.render_widget(footer, area);
}

fn draw_banner(frame: &mut Frame, title: &str, message: &str) {
    let size = frame.size();
    let width = 40.min(size.width);
    let area = Rect::new(size.width.saturating_sub(width + 1), 1, width, 4.min(size.height));

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(message.to_string())
            .wrap(Wrap { trim: true })
            .style(Style::default().fg(Color::White).bg(Color::Green))
            .block(
                Block::default()
                    .title(Span::styled(
                        title.to_string(),
                        Style::default().add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL),
            ),
        area,
    );
}
