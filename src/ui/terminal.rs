//! [`Dialog`] on a real terminal.
//!
//! The terminal is put into raw mode and the alternate screen on the first
//! prompt, not at construction, so precondition failures and CLI
//! subcommands never touch it. It is restored on [`Dialog::suspend`] and on
//! drop, whichever comes first.

use std::fs;
use std::io::{self, Stdout};
use std::path::Path;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::{Frame, Terminal, backend::CrosstermBackend};
use tracing::{debug, warn};

use super::widgets::{Confirm, KeyOutcome, MenuWidget, TextInput, TextView};
use crate::dialog::{Dialog, MenuItem, non_empty};
use crate::error::Result;

type Backend = CrosstermBackend<Stdout>;

/// A widget the event loop can drive.
trait Interactive {
    type Output;

    fn draw(&mut self, f: &mut Frame);
    fn key(&mut self, key: KeyEvent) -> KeyOutcome<Self::Output>;
}

impl Interactive for MenuWidget<'_> {
    type Output = String;

    fn draw(&mut self, f: &mut Frame) {
        self.render(f);
    }

    fn key(&mut self, key: KeyEvent) -> KeyOutcome<String> {
        self.handle_key(key)
    }
}

impl Interactive for TextInput<'_> {
    type Output = String;

    fn draw(&mut self, f: &mut Frame) {
        self.render(f);
    }

    fn key(&mut self, key: KeyEvent) -> KeyOutcome<String> {
        self.handle_key(key)
    }
}

impl Interactive for Confirm<'_> {
    type Output = bool;

    fn draw(&mut self, f: &mut Frame) {
        self.render(f);
    }

    fn key(&mut self, key: KeyEvent) -> KeyOutcome<bool> {
        self.handle_key(key)
    }
}

/// Text view that waits for a key.
struct Pager<'a> {
    view: TextView<'a>,
    hint: &'static str,
}

impl Interactive for Pager<'_> {
    type Output = ();

    fn draw(&mut self, f: &mut Frame) {
        self.view.render(f, Some(self.hint));
    }

    fn key(&mut self, key: KeyEvent) -> KeyOutcome<()> {
        self.view.handle_key(key)
    }
}

/// Terminal-backed dialogs.
#[derive(Default)]
pub struct TuiDialog {
    terminal: Option<Terminal<Backend>>,
}

impl TuiDialog {
    pub fn new() -> Self {
        Self::default()
    }

    fn terminal(&mut self) -> io::Result<&mut Terminal<Backend>> {
        if self.terminal.is_none() {
            debug!("Entering terminal UI");
            enable_raw_mode()?;
            crossterm::execute!(io::stdout(), EnterAlternateScreen)?;
            let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
            terminal.clear()?;
            self.terminal = Some(terminal);
        }
        match self.terminal.as_mut() {
            Some(terminal) => Ok(terminal),
            None => Err(io::Error::other("terminal unavailable")),
        }
    }

    fn restore(&mut self) -> io::Result<()> {
        if let Some(mut terminal) = self.terminal.take() {
            debug!("Leaving terminal UI");
            disable_raw_mode()?;
            crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
            terminal.show_cursor()?;
        }
        Ok(())
    }

    /// Draw `widget` and feed it keys until it finishes.
    ///
    /// Ctrl+C is an error, not a cancel: raw mode swallows SIGINT, and the
    /// operator expects it to end the run.
    fn run<W: Interactive>(&mut self, widget: &mut W) -> Result<Option<W::Output>> {
        let terminal = self.terminal()?;
        loop {
            terminal.draw(|f| widget.draw(f))?;
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind == KeyEventKind::Press
                && key.code == KeyCode::Char('c')
                && key.modifiers.contains(KeyModifiers::CONTROL)
            {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted by operator").into());
            }
            match widget.key(key) {
                KeyOutcome::Pending => {}
                KeyOutcome::Done(value) => return Ok(Some(value)),
                KeyOutcome::Cancel => return Ok(None),
            }
        }
    }
}

impl Drop for TuiDialog {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

impl Dialog for TuiDialog {
    fn menu(
        &mut self,
        title: &str,
        text: &str,
        items: &[MenuItem],
        default: Option<&str>,
    ) -> Result<Option<String>> {
        let mut widget = MenuWidget::new(title, text, items, default);
        self.run(&mut widget)
    }

    fn input(&mut self, title: &str, prompt: &str, initial: &str) -> Result<Option<String>> {
        let mut widget = TextInput::new(title, prompt, initial);
        Ok(non_empty(self.run(&mut widget)?))
    }

    fn password(&mut self, title: &str, prompt: &str) -> Result<Option<String>> {
        let mut widget = TextInput::masked(title, prompt);
        // whitespace is a legitimate passphrase character; only "" is empty
        Ok(self.run(&mut widget)?.filter(|p| !p.is_empty()))
    }

    fn confirm(&mut self, title: &str, text: &str) -> Result<bool> {
        let mut widget = Confirm::new(title, text);
        Ok(self.run(&mut widget)?.unwrap_or(false))
    }

    fn message(&mut self, title: &str, text: &str) -> Result<()> {
        let mut pager = Pager {
            view: TextView::new(title, text),
            hint: "Enter: OK",
        };
        self.run(&mut pager).map(|_| ())
    }

    fn info(&mut self, title: &str, text: &str) -> Result<()> {
        let mut view = TextView::new(title, text);
        let terminal = self.terminal()?;
        terminal.draw(|f| view.render(f, None))?;
        Ok(())
    }

    fn text_file(&mut self, title: &str, path: &Path) -> Result<()> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => format!("Cannot read {}: {}", path.display(), e),
        };
        let mut pager = Pager {
            view: TextView::new(title, &content),
            hint: "↑↓ PgUp PgDn: Scroll | q: Close",
        };
        self.run(&mut pager).map(|_| ())
    }

    fn suspend(&mut self) -> Result<()> {
        self.restore()?;
        Ok(())
    }
}
