use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::cursor::SetCursorStyle;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::prelude::*;
use tracing_subscriber::EnvFilter;

mod agent;
mod app;
mod bus;
mod chat;
mod config;
mod error;
mod events;
mod headless;
mod output_log;
mod registry;
mod text_layout;
mod theme;
mod ui;

use agent::AssistantCommandConfig;
use app::{App, Pane, Submission};
use bus::Subscription;
use config::{DeckConfig, expand_home};
use error::DeckError;
use events::AppEvent;
use registry::{AgentRegistry, RegistrySettings, WorkspaceKey};
use theme::Theme;

const LOG_ENV: &str = "DECKHAND_LOG";
const MAX_BUS_EVENTS_PER_LOOP: usize = 128;
const OUTPUT_SCROLL_LINES: u16 = 5;
const SHUTDOWN_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(
    name = "deckhand",
    version,
    about = "Run coding assistants side by side, one per workspace"
)]
struct Cli {
    /// Config file (default: ~/.deckhand/config.toml when present).
    #[arg(long, global = true, env = "DECKHAND_CONFIG")]
    config: Option<PathBuf>,
    /// Workspace to list in the agents pane at startup; repeatable.
    #[arg(long = "workspace", short = 'w')]
    workspaces: Vec<PathBuf>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run one prompt without the terminal UI.
    Run(headless::RunArgs),
    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();
    let config = match DeckConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("deckhand: {err}");
            std::process::exit(2);
        }
    };
    match cli.command {
        Some(CliCommand::Run(args)) => {
            init_stderr_logging();
            match headless::run(&config, args) {
                Ok(code) => std::process::exit(code),
                Err(err) => {
                    eprintln!("deckhand: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some(CliCommand::Config) => {
            print!("{}", config.to_toml_string());
            Ok(())
        }
        None => {
            let command = match config.assistant_command() {
                Ok(command) => command,
                Err(err) => {
                    eprintln!("deckhand: {err}");
                    std::process::exit(2);
                }
            };
            run_tui(&config, command, &cli.workspaces)
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// The alternate screen owns the terminal, so diagnostics go to a file.
fn init_file_logging(log_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("deckhand.log"))?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}

fn run_tui(
    config: &DeckConfig,
    command: AssistantCommandConfig,
    workspaces: &[PathBuf],
) -> io::Result<()> {
    let log_dir = config.log_dir()?;
    init_file_logging(&log_dir)?;
    let theme = match config.theme_path() {
        Ok(path) => Theme::load_or_default(path),
        Err(_) => Theme::default(),
    };
    let mut registry = AgentRegistry::new(RegistrySettings {
        command,
        log_root: log_dir,
        stop_grace: config.stop_grace(),
    });
    let subscription = registry.subscribe();

    let mut app = App::new(config.ui.max_output_lines);
    for workspace in workspaces {
        match WorkspaceKey::resolve(workspace) {
            Ok(key) => app.add_workspace(key),
            Err(err) => app.push_system_message(err.to_string()),
        }
    }
    app.select_workspace(0);

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        SetCursorStyle::SteadyBar
    )?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    let result = run_app(&mut terminal, app, &mut registry, &subscription, &theme);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        SetCursorStyle::DefaultUserShape,
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    registry.shutdown(registry.settings().stop_grace + SHUTDOWN_SLACK);
    result
}

fn screen_rect(terminal: &Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<Rect> {
    let size = terminal.size()?;
    Ok(Rect::new(0, 0, size.width, size.height))
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
    registry: &mut AgentRegistry,
    subscription: &Subscription,
    theme: &Theme,
) -> io::Result<()> {
    while app.running {
        for bus_event in subscription.drain_limited(MAX_BUS_EVENTS_PER_LOOP) {
            app.on_bus_event(bus_event);
        }
        app.sync_agents(&registry.list());

        terminal.draw(|frame| ui::render(frame, &app, theme))?;

        let screen = screen_rect(terminal)?;
        match events::next_event()? {
            AppEvent::Tick => app.on_tick(),
            AppEvent::Quit => app.quit(),
            AppEvent::NextPane => {
                if app.active_pane == Pane::Chat && app.autocomplete_top_command() {
                    // keep focus in input when command autocomplete is applied
                } else {
                    app.next_pane();
                }
            }
            AppEvent::PrevPane => app.prev_pane(),
            AppEvent::MoveUp => match app.active_pane {
                Pane::Agents => app.select_prev_workspace(),
                Pane::Output => app.scroll_output_up(1, ui::output_max_scroll(screen, &app, theme)),
                Pane::Chat => app.move_cursor_up(ui::chat_input_text_width(screen)),
            },
            AppEvent::MoveDown => match app.active_pane {
                Pane::Agents => app.select_next_workspace(),
                Pane::Output => app.scroll_output_down(1),
                Pane::Chat => app.move_cursor_down(ui::chat_input_text_width(screen)),
            },
            AppEvent::CursorLeft => {
                if app.active_pane == Pane::Chat {
                    app.move_cursor_left();
                }
            }
            AppEvent::CursorRight => {
                if app.active_pane == Pane::Chat {
                    app.move_cursor_right();
                }
            }
            AppEvent::CursorHome => {
                if app.active_pane == Pane::Chat {
                    app.move_cursor_home();
                }
            }
            AppEvent::CursorEnd => {
                if app.active_pane == Pane::Chat {
                    app.move_cursor_end();
                }
            }
            AppEvent::ScrollChatUp => app.scroll_chat_up(ui::chat_max_scroll(screen, &app, theme)),
            AppEvent::ScrollChatDown => app.scroll_chat_down(),
            AppEvent::ScrollOutputUp => app.scroll_output_up(
                OUTPUT_SCROLL_LINES,
                ui::output_max_scroll(screen, &app, theme),
            ),
            AppEvent::ScrollOutputDown => app.scroll_output_down(OUTPUT_SCROLL_LINES),
            AppEvent::PrevWorkspace => app.select_prev_workspace(),
            AppEvent::NextWorkspace => app.select_next_workspace(),
            AppEvent::StopAgent => handle_submission(&mut app, registry, Submission::Stop),
            AppEvent::ClearInput => app.clear_input(),
            AppEvent::InputChar(c) => {
                app.active_pane = Pane::Chat;
                app.input_char(c);
            }
            AppEvent::Backspace => {
                if app.active_pane == Pane::Chat {
                    app.backspace_input();
                }
            }
            AppEvent::Submit => {
                if app.active_pane == Pane::Chat
                    && let Some(submission) = app.take_submission()
                {
                    handle_submission(&mut app, registry, submission);
                }
            }
            AppEvent::MouseScrollUp => match app.active_pane {
                Pane::Agents => app.select_prev_workspace(),
                Pane::Output => app.scroll_output_up(1, ui::output_max_scroll(screen, &app, theme)),
                Pane::Chat => app.scroll_chat_up(ui::chat_max_scroll(screen, &app, theme)),
            },
            AppEvent::MouseScrollDown => match app.active_pane {
                Pane::Agents => app.select_next_workspace(),
                Pane::Output => app.scroll_output_down(1),
                Pane::Chat => app.scroll_chat_down(),
            },
            AppEvent::MouseLeftClick(column, row) => {
                if let Some(pane) = ui::pane_hit_test(screen, column, row) {
                    app.active_pane = pane;
                }
                if let Some(idx) = ui::agent_row_hit_test(screen, &app, column, row) {
                    app.select_workspace(idx);
                }
            }
        }
    }

    Ok(())
}

fn handle_submission(app: &mut App, registry: &mut AgentRegistry, submission: Submission) {
    match submission {
        Submission::Quit => app.quit(),
        Submission::Unknown(command) => {
            app.push_system_message(format!("Unknown command: {command}"));
        }
        Submission::AddWorkspace(raw) => {
            if raw.is_empty() {
                app.push_system_message("Usage: /workspace <path>");
                return;
            }
            let resolved = expand_home(&raw)
                .map_err(DeckError::from)
                .and_then(|path| WorkspaceKey::resolve(&path));
            match resolved {
                Ok(key) => {
                    let label = key.to_string();
                    app.add_workspace(key);
                    app.push_system_message(format!("Workspace ready: {label}"));
                }
                Err(err) => app.push_system_message(err.to_string()),
            }
        }
        Submission::Prompt(prompt) => {
            let Some(workspace) = selected_or_notice(app) else {
                return;
            };
            match registry.launch(workspace.path(), &prompt) {
                Ok(agent_id) => app.begin_turn(&workspace, &prompt, agent_id),
                Err(err) => app.push_system_message(err.to_string()),
            }
        }
        Submission::Stop => {
            let Some(workspace) = selected_or_notice(app) else {
                return;
            };
            if !registry.status(workspace.path()).is_some_and(|s| s.is_active()) {
                app.push_system_message("No running agent to stop.");
                return;
            }
            match registry.stop(workspace.path()) {
                Ok(()) => app.push_system_message("Stopping agent..."),
                Err(err) => app.push_system_message(err.to_string()),
            }
        }
        Submission::Kill => {
            let Some(workspace) = selected_or_notice(app) else {
                return;
            };
            if !registry.status(workspace.path()).is_some_and(|s| s.is_active()) {
                app.push_system_message("No running agent to kill.");
                return;
            }
            if let Err(err) = registry.kill(workspace.path()) {
                app.push_system_message(err.to_string());
            }
        }
        Submission::NewSession => {
            let Some(workspace) = selected_or_notice(app) else {
                return;
            };
            if registry.get(workspace.path()).is_some()
                && let Err(err) = registry.reset_session(workspace.path())
            {
                app.push_system_message(err.to_string());
                return;
            }
            app.push_system_message("The next prompt starts a new assistant session.");
        }
        Submission::Remove => {
            let Some(workspace) = selected_or_notice(app) else {
                return;
            };
            if registry.get(workspace.path()).is_some()
                && let Err(err) = registry.remove(workspace.path())
            {
                app.push_system_message(err.to_string());
                return;
            }
            app.remove_workspace(&workspace);
            app.push_system_message(format!("Removed workspace {workspace}"));
        }
    }
}

fn selected_or_notice(app: &mut App) -> Option<WorkspaceKey> {
    let workspace = app.selected_workspace().cloned();
    if workspace.is_none() {
        app.push_system_message("Add a workspace first: /workspace <path>");
    }
    workspace
}
