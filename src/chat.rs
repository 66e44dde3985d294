use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

use crate::text_layout::wrap_styled_line;
use crate::theme::Theme;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Agent,
    System,
}

impl ChatRole {
    fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Agent => "Agent",
            Self::System => "System",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub body: String,
}

impl ChatMessage {
    pub fn user(body: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            body: body.into(),
        }
    }

    pub fn agent(body: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Agent,
            body: body.into(),
        }
    }

    pub fn system(body: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            body: body.into(),
        }
    }
}

/// Markdown to owned ratatui text. `tui-markdown` speaks `ratatui-core`
/// types, so styles are copied over field by field.
pub fn render_markdown(markdown: &str) -> Text<'static> {
    let rendered = tui_markdown::from_str(markdown);
    let base = convert_style(rendered.style);
    let lines = rendered
        .lines
        .into_iter()
        .map(|line| {
            let spans = line
                .spans
                .into_iter()
                .map(|span| Span::styled(span.content.into_owned(), convert_style(span.style)))
                .collect::<Vec<_>>();
            Line::from(spans).style(base.patch(convert_style(line.style)))
        })
        .collect::<Vec<_>>();
    Text::from(lines)
}

/// Display lines for a transcript: role label, wrapped body, separator.
pub fn chat_lines(messages: &[ChatMessage], width: u16, theme: &Theme) -> Vec<Line<'static>> {
    let width = width.max(1);
    let mut out = Vec::new();
    for (idx, message) in messages.iter().enumerate() {
        let (label_style, body) = match message.role {
            ChatRole::User => (
                Style::default().fg(theme.user_fg).add_modifier(Modifier::BOLD),
                plain_text(&message.body, Style::default()),
            ),
            ChatRole::Agent => (
                Style::default().fg(theme.agent_fg).add_modifier(Modifier::BOLD),
                render_markdown(&message.body),
            ),
            ChatRole::System => {
                let dim = Style::default()
                    .fg(theme.muted_fg)
                    .add_modifier(Modifier::DIM);
                (dim, plain_text(&message.body, dim))
            }
        };
        out.push(Line::from(Span::styled(message.role.label(), label_style)));
        for line in &body.lines {
            out.extend(wrap_styled_line(line, width));
        }
        if idx + 1 < messages.len() {
            out.push(Line::from(Span::styled(
                "─".repeat(width as usize),
                Style::default().fg(separator_color(theme)),
            )));
        }
    }
    out
}

fn plain_text(body: &str, style: Style) -> Text<'static> {
    let lines = body
        .lines()
        .map(|line| Line::from(Span::styled(line.to_string(), style)))
        .collect::<Vec<_>>();
    Text::from(lines)
}

fn separator_color(theme: &Theme) -> Color {
    match theme.chat_bg {
        Color::Rgb(r, g, b) => Color::Rgb(
            r.saturating_add(12),
            g.saturating_add(12),
            b.saturating_add(12),
        ),
        _ => theme.muted_fg,
    }
}

fn convert_style(style: ratatui_core::style::Style) -> Style {
    let mut out = Style::default();
    out.fg = style.fg.map(convert_color);
    out.bg = style.bg.map(convert_color);
    out.add_modifier = Modifier::from_bits_truncate(style.add_modifier.bits());
    out.sub_modifier = Modifier::from_bits_truncate(style.sub_modifier.bits());
    out
}

fn convert_color(color: ratatui_core::style::Color) -> Color {
    use ratatui_core::style::Color as Core;
    match color {
        Core::Reset => Color::Reset,
        Core::Black => Color::Black,
        Core::Red => Color::Red,
        Core::Green => Color::Green,
        Core::Yellow => Color::Yellow,
        Core::Blue => Color::Blue,
        Core::Magenta => Color::Magenta,
        Core::Cyan => Color::Cyan,
        Core::Gray => Color::Gray,
        Core::DarkGray => Color::DarkGray,
        Core::LightRed => Color::LightRed,
        Core::LightGreen => Color::LightGreen,
        Core::LightYellow => Color::LightYellow,
        Core::LightBlue => Color::LightBlue,
        Core::LightMagenta => Color::LightMagenta,
        Core::LightCyan => Color::LightCyan,
        Core::White => Color::White,
        Core::Rgb(r, g, b) => Color::Rgb(r, g, b),
        Core::Indexed(idx) => Color::Indexed(idx),
    }
}

#[cfg(test)]
#[path = "../tests/unit/chat_tests.rs"]
mod tests;
