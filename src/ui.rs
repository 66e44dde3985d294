use ratatui::prelude::*;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Clear, Padding, Paragraph};

use crate::agent::{AgentStatus, StreamKind};
use crate::app::{App, CommandSuggestion, OutputLine, Pane};
use crate::chat::chat_lines;
use crate::text_layout::{wrap_styled_line, wrap_word_with_positions};
use crate::theme::Theme;

const MAX_INPUT_TEXT_LINES: u16 = 5;
const TEXT_PADDING: u16 = 1;
const STATUS_HEIGHT: u16 = 3;
const TITLE_BAR_HEIGHT: u16 = 3;
const ACTIVE_TITLE_BG: Color = Color::Rgb(90, 145, 200);
const ACTIVE_TITLE_FG: Color = Color::Black;
const STOPPING_FG: Color = Color::Rgb(255, 165, 0);
const STATUS_HELP_TEXT: &str =
    "Tab focus | Ctrl+N/P workspace | Ctrl+X stop | PgUp/PgDn output | Shift+Up/Down chat";

#[derive(Debug, Clone, Copy)]
struct ScreenAreas {
    agents: Rect,
    output: Rect,
    chat: Rect,
    status: Rect,
}

fn screen_areas(screen: Rect) -> ScreenAreas {
    let [body, status] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(STATUS_HEIGHT)]).areas(screen);
    let [left, chat] =
        Layout::horizontal([Constraint::Percentage(35), Constraint::Percentage(65)]).areas(body);
    let [agents, output] =
        Layout::vertical([Constraint::Percentage(40), Constraint::Percentage(60)]).areas(left);
    ScreenAreas {
        agents,
        output,
        chat,
        status,
    }
}

/// Splits a pane into its title bar and content.
fn pane_content(area: Rect) -> (Rect, Rect) {
    let [title, content] =
        Layout::vertical([Constraint::Length(TITLE_BAR_HEIGHT), Constraint::Min(0)]).areas(area);
    (title, content)
}

fn text_width(area: Rect) -> u16 {
    area.width.saturating_sub(TEXT_PADDING * 2).max(1)
}

/// Line counts past `u16::MAX` saturate instead of wrapping.
fn line_count(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

struct ChatLayout {
    messages: Rect,
    input: Rect,
    input_scroll: u16,
    cursor: (u16, u16),
}

fn chat_layout(content: Rect, app: &App) -> ChatLayout {
    let input_width = text_width(content);
    let input_lines = wrap_word_with_positions(app.chat_input(), input_width).line_count;
    let cursor = app.chat_cursor_line_col(input_width);
    let max_input_height = content.height.saturating_sub(1).max(1);
    let (input_height, input_scroll) = input_box_metrics(input_lines, cursor.0, max_input_height);
    let [messages, input] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(input_height)]).areas(content);
    ChatLayout {
        messages,
        input,
        input_scroll,
        cursor,
    }
}

pub fn chat_input_text_width(screen: Rect) -> u16 {
    let (_, content) = pane_content(screen_areas(screen).chat);
    text_width(content)
}

pub fn chat_max_scroll(screen: Rect, app: &App, theme: &Theme) -> u16 {
    let (_, content) = pane_content(screen_areas(screen).chat);
    if content.width < 1 || content.height < 2 {
        return 0;
    }
    let layout = chat_layout(content, app);
    let lines = chat_lines(app.visible_messages(), text_width(layout.messages), theme);
    let total = line_count(lines.len());
    let visible = layout.messages.height.saturating_sub(TEXT_PADDING * 2);
    total.saturating_sub(visible)
}

pub fn output_max_scroll(screen: Rect, app: &App, theme: &Theme) -> u16 {
    let (_, content) = pane_content(screen_areas(screen).output);
    if content.width < 1 || content.height < 1 {
        return 0;
    }
    let lines = output_display_lines(app.visible_output(), text_width(content), theme);
    let total = line_count(lines.len());
    let visible = content.height.saturating_sub(TEXT_PADDING * 2);
    total.saturating_sub(visible)
}

pub fn pane_hit_test(screen: Rect, x: u16, y: u16) -> Option<Pane> {
    let areas = screen_areas(screen);
    [
        (areas.agents, Pane::Agents),
        (areas.output, Pane::Output),
        (areas.chat, Pane::Chat),
    ]
    .into_iter()
    .find(|(rect, _)| point_in_rect(*rect, x, y))
    .map(|(_, pane)| pane)
}

/// Index of the workspace row under (x, y) in the agents pane.
pub fn agent_row_hit_test(screen: Rect, app: &App, x: u16, y: u16) -> Option<usize> {
    let (_, content) = pane_content(screen_areas(screen).agents);
    let rows = content.inner(Margin {
        horizontal: TEXT_PADDING,
        vertical: TEXT_PADDING,
    });
    if !point_in_rect(rows, x, y) {
        return None;
    }
    let idx = (y - rows.y) as usize;
    (idx < app.workspaces().count()).then_some(idx)
}

pub fn render(frame: &mut Frame, app: &App, theme: &Theme) {
    let areas = screen_areas(frame.area());
    render_agents_pane(frame, areas.agents, app, theme);
    render_output_pane(frame, areas.output, app, theme);
    render_chat_pane(frame, areas.chat, app, theme);

    frame.render_widget(
        Paragraph::new(status_line_text(app))
            .style(Style::default().bg(theme.status_bg).fg(theme.muted_fg))
            .block(
                Block::default()
                    .style(Style::default().bg(theme.status_bg))
                    .padding(Padding::uniform(TEXT_PADDING)),
            ),
        areas.status,
    );
}

fn render_title(frame: &mut Frame, area: Rect, title: &str, base_bg: Color, active: bool, theme: &Theme) {
    let title_bg = title_bar_bg(base_bg, active);
    let title_fg = if active {
        ACTIVE_TITLE_FG
    } else {
        theme.muted_fg
    };
    frame.render_widget(
        Paragraph::new(title.to_string())
            .style(Style::default().bg(title_bg).fg(title_fg))
            .block(
                Block::default()
                    .style(Style::default().bg(title_bg))
                    .padding(Padding::uniform(TEXT_PADDING)),
            ),
        area,
    );
}

fn padded_block(bg: Color) -> Block<'static> {
    Block::default()
        .style(Style::default().bg(bg))
        .padding(Padding::uniform(TEXT_PADDING))
}

fn render_agents_pane(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let (title_area, content) = pane_content(area);
    let active = app.active_pane == Pane::Agents;
    render_title(frame, title_area, "Agents", theme.agents_bg, active, theme);

    let rows = app
        .workspaces()
        .enumerate()
        .map(|(idx, convo)| {
            let selected = idx == app.selected_index();
            let marker = if selected { "> " } else { "  " };
            let name_style = if selected {
                Style::default()
                    .fg(theme.active_fg)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.text_fg)
            };
            let (label, status_fg) = status_badge(convo.status(), theme);
            Line::from(vec![
                Span::styled(format!("{marker}{}", convo.workspace().name()), name_style),
                Span::raw(" "),
                Span::styled(label, Style::default().fg(status_fg)),
            ])
        })
        .collect::<Vec<_>>();
    let body = if rows.is_empty() {
        Text::from(Line::from(Span::styled(
            "No workspaces",
            Style::default().fg(theme.muted_fg),
        )))
    } else {
        Text::from(rows)
    };
    frame.render_widget(
        Paragraph::new(body)
            .style(Style::default().bg(theme.agents_bg).fg(theme.text_fg))
            .block(padded_block(theme.agents_bg)),
        content,
    );
}

fn status_badge(status: Option<AgentStatus>, theme: &Theme) -> (String, Color) {
    match status {
        None => ("idle".to_string(), theme.muted_fg),
        Some(status @ AgentStatus::Running) => (status.label(), theme.agent_fg),
        Some(status @ AgentStatus::Stopping) => (status.label(), STOPPING_FG),
        Some(status @ AgentStatus::Exited { success: true, .. }) => (status.label(), theme.user_fg),
        Some(status) => (status.label(), theme.stderr_fg),
    }
}

fn render_output_pane(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let (title_area, content) = pane_content(area);
    let active = app.active_pane == Pane::Output;
    render_title(frame, title_area, "Output", theme.output_bg, active, theme);

    let lines = output_display_lines(app.visible_output(), text_width(content), theme);
    let max_scroll = output_max_scroll(frame.area(), app, theme);
    let top = max_scroll.saturating_sub(app.output_scroll_back().min(max_scroll));
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().bg(theme.output_bg).fg(theme.text_fg))
            .scroll((top, 0))
            .block(padded_block(theme.output_bg)),
        content,
    );
}

fn output_display_lines(output: &[OutputLine], width: u16, theme: &Theme) -> Vec<Line<'static>> {
    let mut out = Vec::with_capacity(output.len());
    for line in output {
        let style = match line.stream {
            Some(StreamKind::Stdout) => Style::default().fg(theme.text_fg),
            Some(StreamKind::Stderr) => Style::default().fg(theme.stderr_fg),
            None => Style::default()
                .fg(theme.muted_fg)
                .add_modifier(Modifier::DIM),
        };
        out.extend(wrap_styled_line(
            &Line::from(Span::styled(line.text.clone(), style)),
            width,
        ));
    }
    out
}

fn render_chat_pane(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let (title_area, content) = pane_content(area);
    let active = app.active_pane == Pane::Chat;
    let title = match app.selected_workspace() {
        Some(workspace) => format!("Chat · {}", workspace.name()),
        None => "Chat".to_string(),
    };
    render_title(frame, title_area, &title, theme.chat_bg, active, theme);

    frame.render_widget(
        Block::default().style(Style::default().bg(theme.chat_bg)),
        content,
    );
    if content.width < 1 || content.height < 2 {
        return;
    }

    let layout = chat_layout(content, app);
    let lines = chat_lines(app.visible_messages(), text_width(layout.messages), theme);
    let max_scroll = chat_max_scroll(frame.area(), app, theme);
    let top = max_scroll.saturating_sub(app.chat_scroll_back().min(max_scroll));
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .scroll((top, 0))
            .style(Style::default().bg(theme.chat_bg).fg(theme.text_fg))
            .block(padded_block(theme.chat_bg)),
        layout.messages,
    );

    let wrapped_input = wrap_word_with_positions(app.chat_input(), text_width(layout.input));
    frame.render_widget(
        Paragraph::new(wrapped_input.rendered)
            .block(padded_block(theme.input_bg))
            .style(Style::default().bg(theme.input_bg).fg(theme.text_fg))
            .scroll((layout.input_scroll, 0)),
        layout.input,
    );
    if app.should_show_command_index() {
        render_command_index(
            frame,
            app.command_suggestions(),
            layout.messages,
            layout.input,
            theme,
        );
    }

    if active {
        let input_inner = layout.input.inner(Margin {
            horizontal: TEXT_PADDING,
            vertical: TEXT_PADDING,
        });
        let (cursor_line, cursor_col) = layout.cursor;
        let visible_cursor_line = cursor_line.saturating_sub(layout.input_scroll);
        if input_inner.width > 0 && input_inner.height > 0 && visible_cursor_line < input_inner.height
        {
            frame.set_cursor_position((
                input_inner
                    .x
                    .saturating_add(cursor_col.min(input_inner.width.saturating_sub(1))),
                input_inner.y.saturating_add(visible_cursor_line),
            ));
        }
    }
}

fn render_command_index(
    frame: &mut Frame,
    suggestions: Vec<CommandSuggestion>,
    messages_area: Rect,
    input_area: Rect,
    theme: &Theme,
) {
    if suggestions.is_empty() || messages_area.height == 0 || input_area.width == 0 {
        return;
    }
    let max_items = messages_area.height.saturating_sub(2).max(1) as usize;
    let lines = suggestions
        .into_iter()
        .take(max_items)
        .enumerate()
        .map(|(idx, item)| {
            let command_fg = if idx == 0 {
                theme.active_fg
            } else {
                theme.text_fg
            };
            Line::from(vec![
                Span::styled(item.command, Style::default().fg(command_fg)),
                Span::raw(" "),
                Span::styled(item.description, Style::default().fg(theme.muted_fg)),
            ])
        })
        .collect::<Vec<_>>();
    let overlay_height = line_count(lines.len())
        .saturating_add(2)
        .min(messages_area.height.max(1));
    let y = input_area
        .y
        .saturating_sub(overlay_height)
        .max(messages_area.y);
    let overlay = Rect::new(input_area.x, y, input_area.width, overlay_height);

    frame.render_widget(Clear, overlay);
    frame.render_widget(
        Paragraph::new(lines)
            .style(Style::default().bg(theme.input_bg))
            .block(padded_block(theme.input_bg)),
        overlay,
    );
}

fn status_line_text(app: &App) -> String {
    let running = app.active_agent_count();
    let mut text = STATUS_HELP_TEXT.to_string();
    if running > 0 {
        text.push_str(&format!(" | {running} running"));
    }
    if app.is_selected_agent_active() {
        text.push_str(&format!(" | Agent working {}", working_dots(app.ticks)));
    }
    text
}

fn working_dots(ticks: u64) -> &'static str {
    const FRAMES: [&str; 6] = ["[   ]", "[.  ]", "[.. ]", "[...]", "[ ..]", "[  .]"];
    FRAMES[((ticks / 2) as usize) % FRAMES.len()]
}

fn input_box_metrics(input_text_lines: u16, cursor_line: u16, max_input_height: u16) -> (u16, u16) {
    let capped_text_lines = input_text_lines.clamp(1, MAX_INPUT_TEXT_LINES);
    let desired_height = capped_text_lines.saturating_add(TEXT_PADDING * 2);
    let input_height = desired_height.clamp(1, max_input_height.max(1));
    let visible_text_lines = input_height.saturating_sub(TEXT_PADDING * 2).max(1);
    let max_scroll = input_text_lines.saturating_sub(visible_text_lines);
    let middle_line = visible_text_lines / 2;
    let input_scroll = cursor_line.saturating_sub(middle_line).min(max_scroll);
    (input_height, input_scroll)
}

fn title_bar_bg(base: Color, active: bool) -> Color {
    if active {
        return ACTIVE_TITLE_BG;
    }
    match base {
        Color::Rgb(r, g, b) => Color::Rgb(r.saturating_sub(12), g.saturating_sub(12), b.saturating_sub(12)),
        _ => base,
    }
}

fn point_in_rect(rect: Rect, x: u16, y: u16) -> bool {
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

#[cfg(test)]
#[path = "../tests/unit/ui_tests.rs"]
mod tests;
