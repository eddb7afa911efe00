//! Dialog widgets: state, key handling and rendering.
//!
//! Each widget is a plain state struct with a `handle_key` that never touches
//! the terminal and a `render` that only draws, so the event loop in
//! [`super::terminal`] stays trivial and the key handling is testable without
//! a tty.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::dialog::MenuItem;
use crate::theme::Styles;

/// Result of feeding one key to a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome<T> {
    Pending,
    Done(T),
    Cancel,
}

/// Area of `percent_x` by `percent_y` of `area`, centered, with minimum size.
pub fn centered_rect(area: Rect, percent_x: u16, percent_y: u16, min_w: u16, min_h: u16) -> Rect {
    let scale = |len: u16, percent: u16| (u32::from(len) * u32::from(percent) / 100) as u16;
    let width = scale(area.width, percent_x).max(min_w).min(area.width);
    let height = scale(area.height, percent_y).max(min_h).min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn frame_block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Styles::border())
        .title(Span::styled(format!(" {} ", title), Styles::title()))
        .style(Styles::panel_bg())
}

/// Split a dialog into text, body and hint rows.
fn dialog_layout(inner: Rect, text_height: u16) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(text_height),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(inner);
    [chunks[0], chunks[1], chunks[2]]
}

fn render_hint(f: &mut Frame, area: Rect, hint: &str) {
    f.render_widget(
        Paragraph::new(hint)
            .alignment(Alignment::Center)
            .style(Styles::nav_hint()),
        area,
    );
}

fn is_press(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
}

// =============================================================================
// Menu
// =============================================================================

pub struct MenuWidget<'a> {
    title: &'a str,
    text: &'a str,
    items: &'a [MenuItem],
    state: ListState,
}

impl<'a> MenuWidget<'a> {
    pub fn new(title: &'a str, text: &'a str, items: &'a [MenuItem], default: Option<&str>) -> Self {
        let start = default
            .and_then(|tag| items.iter().position(|i| i.tag == tag))
            .unwrap_or(0);
        let mut state = ListState::default();
        if !items.is_empty() {
            state.select(Some(start));
        }
        Self {
            title,
            text,
            items,
            state,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.state.selected()
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome<String> {
        if !is_press(&key) {
            return KeyOutcome::Pending;
        }
        let last = self.items.len().saturating_sub(1);
        let current = self.state.selected().unwrap_or(0);
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.state.select(Some(current.saturating_sub(1))),
            KeyCode::Down | KeyCode::Char('j') => self.state.select(Some((current + 1).min(last))),
            KeyCode::Home => self.state.select(Some(0)),
            KeyCode::End => self.state.select(Some(last)),
            KeyCode::Enter => {
                return match self.state.selected().and_then(|i| self.items.get(i)) {
                    Some(item) => KeyOutcome::Done(item.tag.clone()),
                    None => KeyOutcome::Cancel,
                };
            }
            KeyCode::Esc => return KeyOutcome::Cancel,
            _ => {}
        }
        KeyOutcome::Pending
    }

    pub fn render(&mut self, f: &mut Frame) {
        let rows = u16::try_from(self.items.len()).unwrap_or(u16::MAX);
        let area = centered_rect(f.area(), 70, 60, 40, rows.saturating_add(8));
        let block = frame_block(self.title);
        let inner = block.inner(area);
        f.render_widget(Clear, area);
        f.render_widget(block, area);

        let [text_area, list_area, hint_area] = dialog_layout(inner, 2);
        f.render_widget(
            Paragraph::new(self.text).wrap(Wrap { trim: true }).style(Styles::text()),
            text_area,
        );

        let items: Vec<ListItem> = self
            .items
            .iter()
            .map(|item| ListItem::new(format!(" {}", item.label)))
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::TOP))
            .highlight_style(Styles::selected())
            .highlight_symbol("▶");
        f.render_stateful_widget(list, list_area, &mut self.state);
        render_hint(f, hint_area, "↑↓: Move | Enter: Select | Esc: Back");
    }
}

// =============================================================================
// Text and password input
// =============================================================================

pub struct TextInput<'a> {
    title: &'a str,
    prompt: &'a str,
    value: String,
    masked: bool,
}

impl<'a> TextInput<'a> {
    pub fn new(title: &'a str, prompt: &'a str, initial: &str) -> Self {
        Self {
            title,
            prompt,
            value: initial.to_string(),
            masked: false,
        }
    }

    pub fn masked(title: &'a str, prompt: &'a str) -> Self {
        Self {
            masked: true,
            ..Self::new(title, prompt, "")
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome<String> {
        if !is_press(&key) {
            return KeyOutcome::Pending;
        }
        match key.code {
            KeyCode::Enter => return KeyOutcome::Done(std::mem::take(&mut self.value)),
            KeyCode::Esc => return KeyOutcome::Cancel,
            KeyCode::Backspace => {
                self.value.pop();
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.value.clear();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.value.push(c);
            }
            _ => {}
        }
        KeyOutcome::Pending
    }

    fn display_value(&self) -> String {
        if self.masked {
            "*".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }

    pub fn render(&self, f: &mut Frame) {
        let area = centered_rect(f.area(), 60, 30, 40, 9);
        let block = frame_block(self.title);
        let inner = block.inner(area);
        f.render_widget(Clear, area);
        f.render_widget(block, area);

        let [text_area, input_area, hint_area] = dialog_layout(inner, 2);
        f.render_widget(
            Paragraph::new(self.prompt).wrap(Wrap { trim: true }).style(Styles::text()),
            text_area,
        );
        let line = Line::from(vec![
            Span::styled(self.display_value(), Styles::input()),
            Span::styled("█", Styles::nav_hint()),
        ]);
        f.render_widget(
            Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
            input_area,
        );
        render_hint(f, hint_area, "Enter: Confirm | Esc: Cancel");
    }
}

// =============================================================================
// Yes/no confirmation
// =============================================================================

pub struct Confirm<'a> {
    title: &'a str,
    text: &'a str,
    yes: bool,
}

impl<'a> Confirm<'a> {
    pub fn new(title: &'a str, text: &'a str) -> Self {
        Self {
            title,
            text,
            yes: true,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome<bool> {
        if !is_press(&key) {
            return KeyOutcome::Pending;
        }
        match key.code {
            KeyCode::Left | KeyCode::Right | KeyCode::Tab => self.yes = !self.yes,
            KeyCode::Char('y') | KeyCode::Char('Y') => return KeyOutcome::Done(true),
            KeyCode::Char('n') | KeyCode::Char('N') => return KeyOutcome::Done(false),
            KeyCode::Enter => return KeyOutcome::Done(self.yes),
            KeyCode::Esc => return KeyOutcome::Cancel,
            _ => {}
        }
        KeyOutcome::Pending
    }

    pub fn render(&self, f: &mut Frame) {
        let area = centered_rect(f.area(), 60, 40, 40, 10);
        let block = frame_block(self.title).style(Styles::panel_bg_danger());
        let inner = block.inner(area);
        f.render_widget(Clear, area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1), Constraint::Length(1)])
            .split(inner);
        f.render_widget(
            Paragraph::new(self.text).wrap(Wrap { trim: false }).style(Styles::text()),
            chunks[0],
        );
        let (yes, no) = if self.yes {
            (Styles::selected(), Styles::button_inactive())
        } else {
            (Styles::button_inactive(), Styles::selected())
        };
        let buttons = Line::from(vec![
            Span::styled("  Yes  ", yes),
            Span::raw("    "),
            Span::styled("  No  ", no),
        ]);
        f.render_widget(Paragraph::new(buttons).alignment(Alignment::Center), chunks[1]);
        render_hint(f, chunks[2], "←→: Choose | Enter: Confirm | Esc: No");
    }
}

// =============================================================================
// Message, info and file view
// =============================================================================

/// Scrollable text. Used for message boxes and file views alike; info boxes
/// are the same thing drawn once without waiting.
pub struct TextView<'a> {
    title: &'a str,
    lines: Vec<String>,
    offset: usize,
    page: usize,
}

impl<'a> TextView<'a> {
    pub fn new(title: &'a str, text: &str) -> Self {
        Self {
            title,
            lines: text.lines().map(str::to_string).collect(),
            offset: 0,
            page: 10,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(self.page)
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome<()> {
        if !is_press(&key) {
            return KeyOutcome::Pending;
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.offset = self.offset.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                self.offset = (self.offset + 1).min(self.max_offset())
            }
            KeyCode::PageUp => self.offset = self.offset.saturating_sub(self.page),
            KeyCode::PageDown => self.offset = (self.offset + self.page).min(self.max_offset()),
            KeyCode::Home => self.offset = 0,
            KeyCode::End => self.offset = self.max_offset(),
            KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q') => return KeyOutcome::Done(()),
            _ => {}
        }
        KeyOutcome::Pending
    }

    pub fn render(&mut self, f: &mut Frame, hint: Option<&str>) {
        let area = centered_rect(f.area(), 80, 70, 40, 8);
        let block = frame_block(self.title);
        let inner = block.inner(area);
        f.render_widget(Clear, area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(inner);
        self.page = usize::from(chunks[0].height).max(1);
        self.offset = self.offset.min(self.max_offset());

        let visible: Vec<Line> = self
            .lines
            .iter()
            .skip(self.offset)
            .take(self.page)
            .map(|l| Line::from(l.as_str()))
            .collect();
        f.render_widget(
            Paragraph::new(visible).wrap(Wrap { trim: false }).style(Styles::text()),
            chunks[0],
        );
        if let Some(hint) = hint {
            render_hint(f, chunks[1], hint);
        }
    }
}
