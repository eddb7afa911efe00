//! Colours and styles for the terminal frontend.
//!
//! All colours are defined here rather than hardcoded in the widgets.

use ratatui::style::{Color, Modifier, Style};

// =============================================================================
// COLOR PALETTE
// =============================================================================

pub struct Colors;

impl Colors {
    /// Dialog background
    pub const BG_PRIMARY: Color = Color::Rgb(20, 20, 30);

    /// Background for destructive confirmations
    pub const BG_DANGER: Color = Color::Rgb(30, 20, 20);

    pub const FG_PRIMARY: Color = Color::White;
    pub const FG_SECONDARY: Color = Color::Gray;
    pub const FG_MUTED: Color = Color::DarkGray;

    /// Borders and titles
    pub const PRIMARY: Color = Color::Cyan;

    /// Highlighted entries
    pub const SECONDARY: Color = Color::Yellow;

    pub const SUCCESS: Color = Color::Green;
    pub const ERROR: Color = Color::Red;

    /// Text on a highlighted background
    pub const SELECTED_FG: Color = Color::Black;
}

// =============================================================================
// PRE-BUILT STYLES
// =============================================================================

pub struct Styles;

impl Styles {
    pub fn text() -> Style {
        Style::default().fg(Colors::FG_PRIMARY)
    }

    pub fn title() -> Style {
        Style::default()
            .fg(Colors::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn border() -> Style {
        Style::default().fg(Colors::PRIMARY)
    }

    pub fn panel_bg() -> Style {
        Style::default().bg(Colors::BG_PRIMARY).fg(Colors::FG_PRIMARY)
    }

    pub fn panel_bg_danger() -> Style {
        Style::default().bg(Colors::BG_DANGER).fg(Colors::FG_PRIMARY)
    }

    /// Highlighted list entry or active button
    pub fn selected() -> Style {
        Style::default()
            .fg(Colors::SELECTED_FG)
            .bg(Colors::SECONDARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn button_inactive() -> Style {
        Style::default().fg(Colors::FG_SECONDARY)
    }

    pub fn input() -> Style {
        Style::default().fg(Colors::SUCCESS)
    }

    pub fn nav_hint() -> Style {
        Style::default().fg(Colors::FG_MUTED)
    }

    pub fn error() -> Style {
        Style::default().fg(Colors::ERROR)
    }
}
