use crate::agent::{AgentEvent, AgentId, AgentStatus, StreamKind};
use crate::bus::BusEvent;
use crate::chat::ChatMessage;
use crate::registry::{AgentSummary, WorkspaceKey};
use crate::text_layout::wrap_word_with_positions;

const COMMAND_INDEX: [(&str, &str); 7] = [
    ("/workspace", "Add a workspace: /workspace <path>"),
    ("/stop", "Stop the selected agent (SIGTERM)"),
    ("/kill", "Kill the selected agent (SIGKILL)"),
    ("/new", "Start a fresh assistant session"),
    ("/remove", "Remove the selected workspace"),
    ("/quit", "Quit app"),
    ("/exit", "Quit app"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSuggestion {
    pub command: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Agents,
    Output,
    Chat,
}

/// What the user asked for when pressing Enter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Prompt(String),
    AddWorkspace(String),
    Stop,
    Kill,
    NewSession,
    Remove,
    Quit,
    Unknown(String),
}

pub fn parse_submission(message: &str) -> Submission {
    let trimmed = message.trim();
    if !trimmed.starts_with('/') {
        return Submission::Prompt(trimmed.to_string());
    }
    let (command, rest) = trimmed
        .split_once(char::is_whitespace)
        .map(|(command, rest)| (command, rest.trim()))
        .unwrap_or((trimmed, ""));
    match command {
        "/workspace" | "/ws" => Submission::AddWorkspace(rest.to_string()),
        "/stop" => Submission::Stop,
        "/kill" => Submission::Kill,
        "/new" => Submission::NewSession,
        "/remove" => Submission::Remove,
        "/quit" | "/exit" => Submission::Quit,
        _ => Submission::Unknown(command.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Option<StreamKind>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    workspace: WorkspaceKey,
    messages: Vec<ChatMessage>,
    output: Vec<OutputLine>,
    status: Option<AgentStatus>,
    agent_id: Option<AgentId>,
    open_reply: Option<usize>,
}

impl Conversation {
    fn new(workspace: WorkspaceKey) -> Self {
        Self {
            workspace,
            messages: Vec::new(),
            output: Vec::new(),
            status: None,
            agent_id: None,
            open_reply: None,
        }
    }

    pub fn workspace(&self) -> &WorkspaceKey {
        &self.workspace
    }

    pub fn status(&self) -> Option<AgentStatus> {
        self.status
    }

    fn append_reply_line(&mut self, line: &str) {
        match self.open_reply {
            Some(idx) if idx < self.messages.len() => {
                let body = &mut self.messages[idx].body;
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(line);
            }
            _ => {
                self.messages.push(ChatMessage::agent(line));
                self.open_reply = Some(self.messages.len() - 1);
            }
        }
    }
}

#[derive(Debug)]
pub struct App {
    pub running: bool,
    pub ticks: u64,
    pub active_pane: Pane,
    conversations: Vec<Conversation>,
    selected: usize,
    notices: Vec<ChatMessage>,
    max_output_lines: usize,
    chat_input: String,
    chat_cursor: usize,
    chat_cursor_goal_col: Option<u16>,
    chat_scroll_back: u16,
    output_scroll_back: u16,
}

impl Default for App {
    fn default() -> Self {
        Self::new(2000)
    }
}

impl App {
    pub fn new(max_output_lines: usize) -> Self {
        Self {
            running: true,
            ticks: 0,
            active_pane: Pane::Chat,
            conversations: Vec::new(),
            selected: 0,
            notices: vec![ChatMessage::system(
                "No workspace yet. Add one with /workspace <path>.",
            )],
            max_output_lines: max_output_lines.max(1),
            chat_input: String::new(),
            chat_cursor: 0,
            chat_cursor_goal_col: None,
            chat_scroll_back: 0,
            output_scroll_back: 0,
        }
    }

    pub fn on_tick(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
    }

    pub fn quit(&mut self) {
        self.running = false;
    }

    pub fn next_pane(&mut self) {
        self.active_pane = match self.active_pane {
            Pane::Agents => Pane::Output,
            Pane::Output => Pane::Chat,
            Pane::Chat => Pane::Agents,
        };
    }

    pub fn prev_pane(&mut self) {
        self.active_pane = match self.active_pane {
            Pane::Agents => Pane::Chat,
            Pane::Output => Pane::Agents,
            Pane::Chat => Pane::Output,
        };
    }

    // Workspaces

    /// Adds (or re-selects) a workspace and focuses it.
    pub fn add_workspace(&mut self, workspace: WorkspaceKey) {
        let idx = match self
            .conversations
            .iter()
            .position(|c| c.workspace == workspace)
        {
            Some(idx) => idx,
            None => {
                self.conversations.push(Conversation::new(workspace));
                self.conversations.len() - 1
            }
        };
        self.select(idx);
    }

    pub fn remove_workspace(&mut self, workspace: &WorkspaceKey) {
        self.conversations.retain(|c| &c.workspace != workspace);
        let last = self.conversations.len().saturating_sub(1);
        self.select(self.selected.min(last));
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected_workspace(&self) -> Option<&WorkspaceKey> {
        self.conversations.get(self.selected).map(|c| &c.workspace)
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.conversations.get(self.selected)
    }

    pub fn select_prev_workspace(&mut self) {
        self.select(self.selected.saturating_sub(1));
    }

    pub fn select_next_workspace(&mut self) {
        let last = self.conversations.len().saturating_sub(1);
        self.select((self.selected + 1).min(last));
    }

    pub fn select_workspace(&mut self, idx: usize) {
        if idx < self.conversations.len() {
            self.select(idx);
        }
    }

    fn select(&mut self, idx: usize) {
        if idx != self.selected {
            self.chat_scroll_back = 0;
            self.output_scroll_back = 0;
        }
        self.selected = idx;
    }

    // Agent lifecycle

    pub fn begin_turn(&mut self, workspace: &WorkspaceKey, prompt: &str, agent_id: AgentId) {
        let convo = self.conversation_mut(workspace);
        convo.messages.push(ChatMessage::user(prompt));
        convo.agent_id = Some(agent_id);
        convo.status = Some(AgentStatus::Running);
        convo.open_reply = None;
        self.chat_scroll_back = 0;
    }

    pub fn on_bus_event(&mut self, bus_event: BusEvent) {
        let max_output = self.max_output_lines;
        let Some(convo) = self
            .conversations
            .iter_mut()
            .find(|c| c.workspace == bus_event.workspace)
        else {
            return;
        };
        // Late events from a replaced agent are dropped.
        if convo.agent_id.as_ref() != Some(&bus_event.agent_id) {
            return;
        }
        match bus_event.event {
            AgentEvent::Output { stream, line } => {
                if stream == StreamKind::Stdout {
                    convo.append_reply_line(&line);
                }
                push_output(convo, max_output, Some(stream), line);
            }
            AgentEvent::System(line) => {
                convo.messages.push(ChatMessage::system(line.clone()));
                push_output(convo, max_output, None, line);
            }
            AgentEvent::Completed { success, code } => {
                if convo.open_reply.is_none() && success {
                    convo
                        .messages
                        .push(ChatMessage::system("Assistant finished without output."));
                }
                convo.open_reply = None;
                convo.status = Some(AgentStatus::Exited { success, code });
                push_output(
                    convo,
                    max_output,
                    None,
                    format!("exited with code {code}"),
                );
            }
        }
    }

    /// Refreshes statuses from the registry; `Stopping` has no bus event.
    pub fn sync_agents(&mut self, agents: &[AgentSummary]) {
        for summary in agents {
            if let Some(convo) = self
                .conversations
                .iter_mut()
                .find(|c| c.workspace == summary.workspace)
                && convo.agent_id.as_ref() == Some(&summary.id)
            {
                convo.status = Some(summary.status);
            }
        }
    }

    pub fn push_system_message(&mut self, message: impl Into<String>) {
        let message = ChatMessage::system(message);
        match self.conversations.get_mut(self.selected) {
            Some(convo) => convo.messages.push(message),
            None => self.notices.push(message),
        }
        self.chat_scroll_back = 0;
    }

    pub fn visible_messages(&self) -> &[ChatMessage] {
        match self.conversations.get(self.selected) {
            Some(convo) => &convo.messages,
            None => &self.notices,
        }
    }

    pub fn visible_output(&self) -> &[OutputLine] {
        self.conversations
            .get(self.selected)
            .map(|c| c.output.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_selected_agent_active(&self) -> bool {
        self.selected_conversation()
            .and_then(Conversation::status)
            .is_some_and(AgentStatus::is_active)
    }

    pub fn active_agent_count(&self) -> usize {
        self.conversations
            .iter()
            .filter(|c| c.status.is_some_and(AgentStatus::is_active))
            .count()
    }

    fn conversation_mut(&mut self, workspace: &WorkspaceKey) -> &mut Conversation {
        let idx = match self
            .conversations
            .iter()
            .position(|c| &c.workspace == workspace)
        {
            Some(idx) => idx,
            None => {
                self.conversations.push(Conversation::new(workspace.clone()));
                self.conversations.len() - 1
            }
        };
        &mut self.conversations[idx]
    }

    // Scrolling. Offsets count lines back from the newest content.

    pub fn chat_scroll_back(&self) -> u16 {
        self.chat_scroll_back
    }

    pub fn output_scroll_back(&self) -> u16 {
        self.output_scroll_back
    }

    pub fn scroll_chat_up(&mut self, max_scroll: u16) {
        self.chat_scroll_back = self.chat_scroll_back.saturating_add(1).min(max_scroll);
    }

    pub fn scroll_chat_down(&mut self) {
        self.chat_scroll_back = self.chat_scroll_back.saturating_sub(1);
    }

    pub fn scroll_output_up(&mut self, lines: u16, max_scroll: u16) {
        self.output_scroll_back = self.output_scroll_back.saturating_add(lines).min(max_scroll);
    }

    pub fn scroll_output_down(&mut self, lines: u16) {
        self.output_scroll_back = self.output_scroll_back.saturating_sub(lines);
    }

    // Input editing

    pub fn input_char(&mut self, c: char) {
        let byte_idx = char_to_byte_idx(&self.chat_input, self.chat_cursor);
        self.chat_input.insert(byte_idx, c);
        self.chat_cursor = self.chat_cursor.saturating_add(1);
        self.chat_cursor_goal_col = None;
    }

    pub fn backspace_input(&mut self) {
        if self.chat_cursor == 0 {
            return;
        }
        let start = char_to_byte_idx(&self.chat_input, self.chat_cursor.saturating_sub(1));
        let end = char_to_byte_idx(&self.chat_input, self.chat_cursor);
        self.chat_input.drain(start..end);
        self.chat_cursor = self.chat_cursor.saturating_sub(1);
        self.chat_cursor_goal_col = None;
    }

    pub fn move_cursor_left(&mut self) {
        self.chat_cursor = self.chat_cursor.saturating_sub(1);
        self.chat_cursor_goal_col = None;
    }

    pub fn move_cursor_right(&mut self) {
        let char_len = self.chat_input.chars().count();
        self.chat_cursor = (self.chat_cursor + 1).min(char_len);
        self.chat_cursor_goal_col = None;
    }

    pub fn move_cursor_home(&mut self) {
        self.chat_cursor = 0;
        self.chat_cursor_goal_col = None;
    }

    pub fn move_cursor_end(&mut self) {
        self.chat_cursor = self.chat_input.chars().count();
        self.chat_cursor_goal_col = None;
    }

    pub fn clear_input(&mut self) {
        self.chat_input.clear();
        self.chat_cursor = 0;
        self.chat_cursor_goal_col = None;
    }

    pub fn move_cursor_up(&mut self, width: u16) {
        let positions = wrap_word_with_positions(&self.chat_input, width.max(1)).positions;
        let (line, col) = positions[self.chat_cursor];
        if line == 0 {
            return;
        }
        let goal_col = self.chat_cursor_goal_col.unwrap_or(col);
        self.chat_cursor = nearest_index_for_line_col(&positions, line - 1, goal_col);
        self.chat_cursor_goal_col = Some(goal_col);
    }

    pub fn move_cursor_down(&mut self, width: u16) {
        let positions = wrap_word_with_positions(&self.chat_input, width.max(1)).positions;
        let (line, col) = positions[self.chat_cursor];
        let max_line = positions.last().map_or(0, |(l, _)| *l);
        if line >= max_line {
            return;
        }
        let goal_col = self.chat_cursor_goal_col.unwrap_or(col);
        self.chat_cursor = nearest_index_for_line_col(&positions, line + 1, goal_col);
        self.chat_cursor_goal_col = Some(goal_col);
    }

    pub fn chat_input(&self) -> &str {
        &self.chat_input
    }

    pub fn chat_cursor_line_col(&self, width: u16) -> (u16, u16) {
        let positions = wrap_word_with_positions(&self.chat_input, width.max(1)).positions;
        positions[self.chat_cursor]
    }

    /// Takes the trimmed input, leaving the box empty.
    pub fn take_submission(&mut self) -> Option<Submission> {
        let message = self.chat_input.trim().to_string();
        self.chat_input.clear();
        self.chat_cursor = 0;
        self.chat_cursor_goal_col = None;
        if message.is_empty() {
            None
        } else {
            Some(parse_submission(&message))
        }
    }

    pub fn command_suggestions(&self) -> Vec<CommandSuggestion> {
        let Some(query) = command_query(&self.chat_input) else {
            return Vec::new();
        };
        COMMAND_INDEX
            .iter()
            .filter(|(command, _)| command.starts_with(query))
            .map(|(command, description)| CommandSuggestion {
                command,
                description,
            })
            .collect()
    }

    pub fn should_show_command_index(&self) -> bool {
        !self.chat_input.trim_start().contains(char::is_whitespace)
            && !self.command_suggestions().is_empty()
    }

    pub fn autocomplete_top_command(&mut self) -> bool {
        if !self.should_show_command_index() {
            return false;
        }
        let Some(top) = self.command_suggestions().first().copied() else {
            return false;
        };
        self.chat_input = top.command.to_string();
        if top.command == "/workspace" {
            self.chat_input.push(' ');
        }
        self.chat_cursor = self.chat_input.chars().count();
        self.chat_cursor_goal_col = None;
        true
    }
}

fn push_output(convo: &mut Conversation, max_lines: usize, stream: Option<StreamKind>, text: String) {
    convo.output.push(OutputLine { stream, text });
    if convo.output.len() > max_lines {
        let overflow = convo.output.len() - max_lines;
        convo.output.drain(0..overflow);
    }
}

fn char_to_byte_idx(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(byte_idx, _)| byte_idx)
        .unwrap_or(s.len())
}

fn nearest_index_for_line_col(positions: &[(u16, u16)], target_line: u16, goal_col: u16) -> usize {
    let on_line = positions
        .iter()
        .enumerate()
        .filter(|(_, (line, _))| *line == target_line);
    let mut fallback = None;
    let mut best: Option<(usize, u16)> = None;
    for (idx, (_, col)) in on_line {
        fallback.get_or_insert(idx);
        if *col <= goal_col && best.is_none_or(|(_, best_col)| *col > best_col) {
            best = Some((idx, *col));
        }
    }
    best.map(|(idx, _)| idx)
        .or(fallback)
        .unwrap_or(positions.len().saturating_sub(1))
}

fn command_query(input: &str) -> Option<&str> {
    let trimmed = input.trim_start();
    if !trimmed.starts_with('/') {
        return None;
    }
    Some(trimmed.split_whitespace().next().unwrap_or(trimmed))
}

#[cfg(test)]
#[path = "../tests/unit/app_tests.rs"]
mod tests;
