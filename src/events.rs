use std::io;
use std::time::Duration;

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
    MouseEventKind,
};

const POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    Tick,
    Quit,
    NextPane,
    PrevPane,
    MoveUp,
    MoveDown,
    CursorLeft,
    CursorRight,
    CursorHome,
    CursorEnd,
    ScrollChatUp,
    ScrollChatDown,
    ScrollOutputUp,
    ScrollOutputDown,
    PrevWorkspace,
    NextWorkspace,
    StopAgent,
    ClearInput,
    InputChar(char),
    Backspace,
    Submit,
    MouseScrollUp,
    MouseScrollDown,
    MouseLeftClick(u16, u16),
}

fn map_key_event(key_event: KeyEvent) -> AppEvent {
    if key_event.kind != KeyEventKind::Press {
        return AppEvent::Tick;
    }

    let ctrl = key_event.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key_event.modifiers.contains(KeyModifiers::SHIFT);
    if ctrl && let KeyCode::Char(c) = key_event.code {
        return match c {
            'c' => AppEvent::Quit,
            'u' => AppEvent::ScrollOutputUp,
            'd' => AppEvent::ScrollOutputDown,
            'p' => AppEvent::PrevWorkspace,
            'n' => AppEvent::NextWorkspace,
            'x' => AppEvent::StopAgent,
            _ => AppEvent::Tick,
        };
    }

    match key_event.code {
        KeyCode::Tab => AppEvent::NextPane,
        KeyCode::BackTab => AppEvent::PrevPane,
        KeyCode::Up if shift || ctrl => AppEvent::ScrollChatUp,
        KeyCode::Down if shift || ctrl => AppEvent::ScrollChatDown,
        KeyCode::PageUp => AppEvent::ScrollOutputUp,
        KeyCode::PageDown => AppEvent::ScrollOutputDown,
        KeyCode::Up => AppEvent::MoveUp,
        KeyCode::Down => AppEvent::MoveDown,
        KeyCode::Left => AppEvent::CursorLeft,
        KeyCode::Right => AppEvent::CursorRight,
        KeyCode::Home => AppEvent::CursorHome,
        KeyCode::End => AppEvent::CursorEnd,
        KeyCode::Esc => AppEvent::ClearInput,
        KeyCode::Backspace => AppEvent::Backspace,
        KeyCode::Enter => AppEvent::Submit,
        KeyCode::Char(c) => AppEvent::InputChar(c),
        _ => AppEvent::Tick,
    }
}

fn map_mouse_event(mouse_event: MouseEvent) -> AppEvent {
    match mouse_event.kind {
        MouseEventKind::ScrollUp => AppEvent::MouseScrollUp,
        MouseEventKind::ScrollDown => AppEvent::MouseScrollDown,
        MouseEventKind::Down(MouseButton::Left) => {
            AppEvent::MouseLeftClick(mouse_event.column, mouse_event.row)
        }
        _ => AppEvent::Tick,
    }
}

pub fn next_event() -> io::Result<AppEvent> {
    if !event::poll(POLL_INTERVAL)? {
        return Ok(AppEvent::Tick);
    }
    Ok(match event::read()? {
        Event::Key(key_event) => map_key_event(key_event),
        Event::Mouse(mouse_event) => map_mouse_event(mouse_event),
        _ => AppEvent::Tick,
    })
}
