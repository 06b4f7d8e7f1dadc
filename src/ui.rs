use std::cell::Cell;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Gauge, Padding, Paragraph, Tabs, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use tracing::info;

use crate::embed::status_url;
use crate::loader::ListLoader;
use crate::navigator::{FetchOutcome, Navigator, SliderValue, StateChange, Step};
use crate::renderer::{embed_width, PostRenderer, RenderStatus};
use crate::sources::SourceEntry;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_TEXT_DISABLED: Color = Color::Rgb(88, 91, 112);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const POSITION_FIELD_WIDTH: u16 = 20;
const DEFAULT_VIEWPORT_WIDTH: u16 = 80;

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

/// Numeric position entry. While focused the raw text is shown as typed.
#[derive(Default)]
struct PositionField {
    buffer: String,
    focused: bool,
}

impl PositionField {
    fn focus(&mut self, position: usize) {
        self.buffer = position.to_string();
        self.focused = true;
    }

    fn blur(&mut self) -> String {
        self.focused = false;
        std::mem::take(&mut self.buffer)
    }

    fn display(&self, position: usize) -> String {
        if self.focused {
            self.buffer.clone()
        } else {
            position.to_string()
        }
    }
}

/// Maps a column inside the slider row to a position in `0..=max`.
fn slider_value_at(area: Rect, column: u16, max: usize) -> usize {
    if area.width <= 1 || max == 0 {
        return 0;
    }
    let span = (area.width - 1) as usize;
    let offset = column.saturating_sub(area.x).min(area.width - 1) as usize;
    (offset * max + span / 2) / span
}

fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x
        && column < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height)
}

pub struct Options {
    pub sources: Vec<SourceEntry>,
    pub initial_source: usize,
    pub loader: ListLoader,
    pub renderer: PostRenderer,
    pub autoplay_interval: Duration,
    pub max_embed_width: u16,
    pub project_url: String,
}

pub struct Model {
    sources: Vec<SourceEntry>,
    selected_source: usize,
    navigator: Navigator,
    changes: Receiver<StateChange>,
    loader: ListLoader,
    renderer: PostRenderer,
    position_field: PositionField,
    max_embed_width: u16,
    viewport_width: u16,
    project_url: String,
    status_message: String,
    spinner: Spinner,
    needs_redraw: bool,
    slider_area: Cell<Option<Rect>>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let mut navigator = Navigator::new(opts.autoplay_interval);
        let changes = navigator.subscribe();
        let selected_source = opts
            .initial_source
            .min(opts.sources.len().saturating_sub(1));

        let mut model = Self {
            sources: opts.sources,
            selected_source,
            navigator,
            changes,
            loader: opts.loader,
            renderer: opts.renderer,
            position_field: PositionField::default(),
            max_embed_width: opts.max_embed_width,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            project_url: opts.project_url,
            status_message: "Starting…".to_string(),
            spinner: Spinner::new(),
            needs_redraw: true,
            slider_area: Cell::new(None),
        };
        model.select_source(selected_source);
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        self.viewport_width = terminal.size()?.width;
        self.sync_renderer();

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.pump(Instant::now()) {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let mut timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if let Some(deadline) = self.navigator.next_deadline() {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {err:#}");
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(width, _) => {
                        self.viewport_width = width;
                        self.mark_dirty();
                    }
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.navigator.loading_count() > 0 || self.renderer.is_loading()
    }

    fn current_source(&self) -> Option<&SourceEntry> {
        self.sources.get(self.selected_source)
    }

    fn select_source(&mut self, index: usize) {
        let Some(entry) = self.sources.get(index).copied() else {
            return;
        };
        self.selected_source = index;
        self.status_message = format!("Loading {}…", entry.name);
        self.spinner.reset();
        let ticket = self.navigator.select_source(&entry);
        self.loader.dispatch(ticket);
        self.mark_dirty();
    }

    fn cycle_source(&mut self, delta: isize) {
        if self.sources.is_empty() {
            return;
        }
        let len = self.sources.len() as isize;
        let next = (self.selected_source as isize + delta).rem_euclid(len) as usize;
        if next != self.selected_source {
            self.select_source(next);
        }
    }

    /// Applies finished background work and the autoplay timer. Returns true
    /// when anything visible changed.
    pub fn pump(&mut self, now: Instant) -> bool {
        let mut changed = false;

        while let Some(response) = self.loader.try_recv() {
            changed = true;
            match self
                .navigator
                .complete_fetch(response.request_id, response.result, now)
            {
                Ok(FetchOutcome::Committed) => {
                    let name = self.current_source().map(|entry| entry.name).unwrap_or("");
                    let count = self.navigator.posts().map(<[String]>::len).unwrap_or(0);
                    self.status_message = format!("{name}: {count} posts.");
                }
                Ok(FetchOutcome::Stale) => {}
                Err(err) => {
                    self.status_message = format!("Failed to load posts: {err:#}");
                }
            }
        }

        for _settled in self.renderer.poll() {
            self.navigator.post_loaded(now);
            changed = true;
        }

        if self.navigator.tick(now) {
            changed = true;
        }

        self.apply_changes() || changed
    }

    fn apply_changes(&mut self) -> bool {
        let mut changed = false;
        let mut resync = false;
        for change in self.changes.try_iter() {
            changed = true;
            if matches!(change, StateChange::List { .. } | StateChange::Position { .. }) {
                resync = true;
            }
        }
        if resync {
            self.sync_renderer();
        }
        changed
    }

    fn sync_renderer(&mut self) {
        match self.navigator.current_post() {
            Some(post_id) => self.renderer.show(post_id, self.viewport_width),
            None => self.renderer.unmount(),
        }
    }

    fn step(&mut self, step: Step) {
        if !self.navigator.controls_enabled() {
            self.status_message = "Still loading; navigation is paused.".to_string();
            return;
        }
        self.navigator.step(step);
    }

    fn toggle_autoplay(&mut self) {
        let enabled = self.navigator.toggle_autoplay(Instant::now());
        self.status_message = if enabled {
            format!(
                "Autoplay on: advancing every {}.",
                humantime::format_duration(self.navigator.interval())
            )
        } else {
            "Autoplay stopped.".to_string()
        };
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(true);
        }

        if self.position_field.focused {
            self.handle_field_key(key.code);
            self.apply_changes();
            self.mark_dirty();
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Left | KeyCode::Char('h') => self.step(Step::Back1),
            KeyCode::Right | KeyCode::Char('l') => self.step(Step::Forward1),
            KeyCode::Down | KeyCode::Char('[') => self.step(Step::Back10),
            KeyCode::Up | KeyCode::Char(']') => self.step(Step::Forward10),
            KeyCode::Char(' ') | KeyCode::Char('p') => self.toggle_autoplay(),
            KeyCode::Tab | KeyCode::Char(':') => {
                self.position_field.focus(self.navigator.position());
            }
            KeyCode::Char('y') => self.cycle_source(1),
            KeyCode::Char('Y') => self.cycle_source(-1),
            KeyCode::Char('o') => self.open_current_post()?,
            KeyCode::Char('g') => self.open_project_link()?,
            _ => {}
        }

        self.apply_changes();
        self.mark_dirty();
        Ok(false)
    }

    fn handle_field_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char(ch) if ch.is_ascii_digit() || ch == '-' => {
                self.position_field.buffer.push(ch);
                self.navigator.enter_position(&self.position_field.buffer);
            }
            KeyCode::Backspace => {
                self.position_field.buffer.pop();
                self.navigator.enter_position(&self.position_field.buffer);
            }
            KeyCode::Enter | KeyCode::Tab | KeyCode::Esc => self.commit_position_field(),
            _ => {}
        }
    }

    fn commit_position_field(&mut self) {
        let raw = self.position_field.blur();
        let position = self.navigator.commit_position(&raw);
        info!(raw = %raw, position, "position entry committed");
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        let pressed = matches!(
            event.kind,
            MouseEventKind::Down(MouseButton::Left) | MouseEventKind::Drag(MouseButton::Left)
        );
        if !pressed {
            return;
        }
        if self.position_field.focused {
            self.commit_position_field();
        }
        if let Some(area) = self.slider_area.get() {
            if contains(area, event.column, event.row) {
                let value = slider_value_at(area, event.column, self.navigator.max_position());
                self.navigator.set_from_slider(SliderValue::Single(value));
            }
        }
        self.apply_changes();
        self.mark_dirty();
    }

    fn open_current_post(&mut self) -> Result<()> {
        let url = match self.renderer.status() {
            RenderStatus::Found(node) => node.permalink.clone(),
            _ => match self.navigator.current_post() {
                Some(post_id) if !post_id.trim().is_empty() => status_url(post_id.trim()),
                _ => {
                    self.status_message = "No post to open.".to_string();
                    return Ok(());
                }
            },
        };
        webbrowser::open(&url).with_context(|| format!("open {url} in browser"))?;
        self.status_message = "Opened post in your browser.".to_string();
        Ok(())
    }

    fn open_project_link(&mut self) -> Result<()> {
        webbrowser::open(&self.project_url).context("open project page")?;
        self.status_message = "Opened project page in your browser.".to_string();
        Ok(())
    }

    fn draw(&self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_sources(frame, layout[1]);
        self.draw_position(frame, layout[2]);
        self.draw_controls(frame, layout[3]);
        self.draw_post(frame, layout[4]);

        let footer = Paragraph::new(
            "←/→ ±1 · ↓/↑ ±10 · Tab jump · Space play/stop · y/Y year · o open · g project · q quit",
        )
        .style(
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .bg(COLOR_PANEL_BG)
                .add_modifier(Modifier::ITALIC),
        )
        .alignment(Alignment::Center);
        frame.render_widget(footer, layout[5]);
    }

    fn draw_sources(&self, frame: &mut Frame<'_>, area: Rect) {
        let titles: Vec<Line> = self
            .sources
            .iter()
            .map(|entry| Line::from(entry.name))
            .collect();
        let tabs = Tabs::new(titles)
            .select(self.selected_source)
            .style(Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_PANEL_BG))
            .highlight_style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            )
            .divider("|");
        frame.render_widget(tabs, area);
    }

    fn draw_position(&self, frame: &mut Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(POSITION_FIELD_WIDTH), Constraint::Min(1)])
            .split(area);

        let max = self.navigator.max_position();
        let mut spans = vec![Span::styled(
            format!("[{}]", self.position_field.display(self.navigator.position())),
            if self.position_field.focused {
                Style::default()
                    .fg(COLOR_BG)
                    .bg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_PRIMARY)
            },
        )];
        if self.navigator.posts().is_some() {
            spans.push(Span::styled(
                format!(" /{max}"),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), chunks[0]);

        let ratio = if max == 0 {
            0.0
        } else {
            (self.navigator.position() as f64 / max as f64).clamp(0.0, 1.0)
        };
        let gauge_color = if self.navigator.controls_enabled() {
            COLOR_ACCENT
        } else {
            COLOR_TEXT_DISABLED
        };
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(gauge_color).bg(COLOR_BORDER_IDLE))
            .ratio(ratio)
            .label("");
        frame.render_widget(gauge, chunks[1]);
        self.slider_area.set(Some(chunks[1]));
    }

    fn draw_controls(&self, frame: &mut Frame<'_>, area: Rect) {
        let enabled = self.navigator.controls_enabled();
        let button = |label: String, active: bool| {
            let style = if active {
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .bg(COLOR_PANEL_FOCUSED_BG)
            } else {
                Style::default().fg(COLOR_TEXT_DISABLED).bg(COLOR_PANEL_BG)
            };
            Span::styled(format!(" {label} "), style)
        };

        let mut spans = Vec::new();
        for step in Step::ALL {
            spans.push(button(step.label().to_string(), enabled));
            spans.push(Span::raw(" "));
        }
        let play = if self.navigator.autoplay() {
            "■ Stop"
        } else {
            "▶ Play"
        };
        spans.push(Span::raw(" "));
        spans.push(button(play.to_string(), true));
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_post(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = match (self.current_source(), self.navigator.current_post()) {
            (Some(entry), Some(post_id)) => {
                format!(" {} · #{} · {} ", entry.name, self.navigator.position(), post_id)
            }
            (Some(entry), None) => format!(" {} ", entry.name),
            _ => " Posts ".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .title(Span::styled(title, Style::default().fg(COLOR_ACCENT)))
            .padding(Padding::horizontal(1))
            .style(Style::default().bg(COLOR_PANEL_BG));

        let width = embed_width(self.viewport_width, self.max_embed_width).max(10) as usize;
        let text = match self.renderer.status() {
            RenderStatus::Idle => Text::styled(
                "No posts loaded yet.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
            RenderStatus::Loading => {
                Text::styled("Loading...", Style::default().fg(COLOR_TEXT_SECONDARY))
            }
            RenderStatus::NotFound => Text::styled(
                "Not Found",
                Style::default()
                    .fg(COLOR_ERROR)
                    .add_modifier(Modifier::BOLD),
            ),
            RenderStatus::Failed(message) => Text::styled(
                format!("Failed to load post: {message}"),
                Style::default().fg(COLOR_ERROR),
            ),
            RenderStatus::Found(node) => {
                let mut lines = Vec::new();
                if let Some(author) = &node.author {
                    lines.push(Line::from(Span::styled(
                        author.clone(),
                        Style::default()
                            .fg(COLOR_SUCCESS)
                            .add_modifier(Modifier::BOLD),
                    )));
                    lines.push(Line::from(""));
                }
                let options = WrapOptions::new(width);
                for paragraph in node.text.lines() {
                    for wrapped in wrap(paragraph, &options) {
                        lines.push(Line::from(Span::styled(
                            wrapped.into_owned(),
                            Style::default().fg(COLOR_TEXT_PRIMARY),
                        )));
                    }
                }
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(
                    node.permalink.clone(),
                    Style::default()
                        .fg(COLOR_TEXT_SECONDARY)
                        .add_modifier(Modifier::ITALIC),
                )));
                Text::from(lines)
            }
        };

        let paragraph = Paragraph::new(text)
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }
}
