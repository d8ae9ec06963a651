//! Colors and styles for the remote.

use ratatui::style::{Color, Modifier, Style};

pub const C_ACCENT: Color = Color::Rgb(255, 95, 95);
pub const C_LIVE: Color = Color::Rgb(80, 200, 120);
pub const C_WAITING: Color = Color::Rgb(255, 184, 80);
pub const C_ERROR: Color = Color::Rgb(255, 80, 80);
pub const C_MUTED: Color = Color::Rgb(72, 72, 88);
pub const C_SECONDARY: Color = Color::Rgb(115, 115, 138);
pub const C_PRIMARY: Color = Color::Rgb(210, 210, 225);
pub const C_CURSOR_BG: Color = Color::Rgb(28, 28, 40);
pub const C_BORDER: Color = Color::Rgb(120, 100, 200);

pub fn style_default() -> Style {
    Style::default().fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_muted() -> Style {
    Style::default().fg(C_MUTED)
}

pub fn style_border() -> Style {
    Style::default().fg(C_BORDER)
}

pub fn style_cursor() -> Style {
    Style::default()
        .bg(C_CURSOR_BG)
        .fg(C_PRIMARY)
        .add_modifier(Modifier::BOLD)
}

/// Row the active screen is showing.
pub fn style_live() -> Style {
    Style::default().fg(C_LIVE).add_modifier(Modifier::BOLD)
}

pub fn style_waiting() -> Style {
    Style::default().fg(C_WAITING)
}

pub fn style_error() -> Style {
    Style::default().fg(C_ERROR)
}

pub fn style_tab_active() -> Style {
    Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD)
}
